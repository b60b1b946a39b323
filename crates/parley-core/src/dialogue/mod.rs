//! Dialogue state machine and registry.
//!
//! A `Dialogue` is one conversation with one counterparty under one
//! protocol. `Dialogues` owns every dialogue of an agent for a protocol and
//! is the single entry point for absorbing messages.

pub mod label;
pub mod registry;
pub mod rules;
pub mod state;
pub mod stats;

pub use label::DialogueLabel;
pub use registry::{DialogueHandle, Dialogues, RoleFn, TerminalHook};
pub use rules::{DialogueRules, EndStateRule};
pub use state::{Dialogue, DialogueState};
pub use stats::DialogueStats;
