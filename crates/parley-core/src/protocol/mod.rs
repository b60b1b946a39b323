//! Envelope and message model.
//!
//! - `public_id`: namespaced `author/name:version` identifiers.
//! - `envelope`: the addressed unit carried by every connection.
//! - `wire`: the binary envelope record (panic-free decoder).
//! - `message`: generic `Message<P>` and the `Protocol` trait.
//!
//! Malformed input is reported as `ParleyError` instead of panicking, so a
//! hostile peer cannot crash the process.

pub mod envelope;
pub mod message;
pub mod public_id;
pub mod wire;

pub use envelope::{Address, ConnectionId, Envelope, EnvelopeContext};
pub use message::{DialogueReference, Message, Protocol};
pub use public_id::{ProtocolId, PublicId};
pub use wire::{decode_envelope, encode_envelope};
