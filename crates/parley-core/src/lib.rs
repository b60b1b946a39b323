//! parley core: transport-agnostic agent messaging primitives.
//!
//! Envelopes and their wire record, the generic message/protocol model, the
//! dialogue state machine and registry, and the FIPA contract-net protocol.
//! The crate carries no runtime dependency so dialogues can be driven from
//! tests, tools or any executor.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Every fallible path
//! surfaces as `ParleyError`/`Result`; malformed traffic never crashes the
//! process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod dialogue;
pub mod error;
pub mod fipa;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorKind, ParleyError, Result};
