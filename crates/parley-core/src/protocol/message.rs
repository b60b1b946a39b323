//! Generic protocol message model.
//!
//! A `Message<P>` is the decoded payload of an envelope for protocol `P`: the
//! dialogue bookkeeping fields plus a body that is one enum variant per
//! performative. The `Protocol` trait ties a concrete protocol's types,
//! dialogue rules and codec together.

use std::fmt;
use std::hash::Hash;

use bytes::Bytes;

use crate::dialogue::rules::DialogueRules;
use crate::error::{ParleyError, Result};
use crate::protocol::envelope::Address;
use crate::protocol::public_id::ProtocolId;

/// Two-part dialogue reference: (starter-assigned, responder-assigned).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogueReference {
    pub starter: String,
    pub responder: String,
}

impl DialogueReference {
    pub fn new(starter: impl Into<String>, responder: impl Into<String>) -> Self {
        Self {
            starter: starter.into(),
            responder: responder.into(),
        }
    }

    /// Reference as issued by the starter (responder half empty).
    pub fn incomplete(starter: impl Into<String>) -> Self {
        Self::new(starter, "")
    }

    pub fn is_complete(&self) -> bool {
        !self.starter.is_empty() && !self.responder.is_empty()
    }

    /// Same reference with the responder half dropped.
    pub fn to_incomplete(&self) -> Self {
        Self::incomplete(self.starter.clone())
    }
}

impl fmt::Display for DialogueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.starter, self.responder)
    }
}

/// A concrete interaction protocol.
///
/// Implementors are zero-sized markers; all state lives in messages and
/// dialogues.
pub trait Protocol: Sized + Send + Sync + 'static {
    /// Speech-act tag.
    type Performative: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    /// Performative-specific content, one variant per performative.
    type Body: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;
    /// Dialogue-scoped role of this agent.
    type Role: Copy + Eq + fmt::Debug + Send + Sync + 'static;
    /// Outcome recorded when a dialogue ends.
    type EndState: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn protocol_id() -> ProtocolId;

    fn performative(body: &Self::Body) -> Self::Performative;

    /// Legal openers, legal replies, terminal set and end-state table.
    fn rules() -> DialogueRules<Self>;

    /// Role of `self_address` in a dialogue opened by `first`.
    fn role_from_first_message(first: &Message<Self>, self_address: &str) -> Self::Role;

    /// Encode bookkeeping fields and body. Sender and recipient travel in
    /// the envelope, not the payload.
    fn encode(message: &Message<Self>) -> Result<Bytes>;

    /// Decode a payload. Must fail closed on unknown performatives or
    /// content mismatches. The returned message has empty sender/to.
    fn decode(payload: &[u8]) -> Result<Message<Self>>;
}

pub struct Message<P: Protocol> {
    pub dialogue_reference: DialogueReference,
    pub message_id: u64,
    pub target: u64,
    pub sender: Address,
    pub to: Address,
    pub body: P::Body,
}

impl<P: Protocol> Message<P> {
    pub fn new(
        dialogue_reference: DialogueReference,
        message_id: u64,
        target: u64,
        sender: impl Into<Address>,
        to: impl Into<Address>,
        body: P::Body,
    ) -> Self {
        Self {
            dialogue_reference,
            message_id,
            target,
            sender: sender.into(),
            to: to.into(),
            body,
        }
    }

    pub fn performative(&self) -> P::Performative {
        P::performative(&self.body)
    }

    /// True when this message would open a dialogue.
    pub fn is_opener(&self) -> bool {
        self.message_id == 1 && self.target == 0
    }

    /// Structural checks independent of any dialogue.
    pub fn validate(&self) -> Result<()> {
        if self.message_id == 0 {
            return Err(ParleyError::InvalidMessage("message_id must be >= 1".into()));
        }
        if self.message_id == 1 && self.target != 0 {
            return Err(ParleyError::InvalidMessage(format!(
                "first message must have target 0, got {}",
                self.target
            )));
        }
        if self.target >= self.message_id {
            return Err(ParleyError::InvalidMessage(format!(
                "target {} must precede message_id {}",
                self.target, self.message_id
            )));
        }
        if self.dialogue_reference.starter.is_empty() {
            return Err(ParleyError::InvalidMessage(
                "dialogue reference has an empty starter half".into(),
            ));
        }
        Ok(())
    }
}

impl<P: Protocol> Clone for Message<P> {
    fn clone(&self) -> Self {
        Self {
            dialogue_reference: self.dialogue_reference.clone(),
            message_id: self.message_id,
            target: self.target,
            sender: self.sender.clone(),
            to: self.to.clone(),
            body: self.body.clone(),
        }
    }
}

impl<P: Protocol> PartialEq for Message<P> {
    fn eq(&self, other: &Self) -> bool {
        self.dialogue_reference == other.dialogue_reference
            && self.message_id == other.message_id
            && self.target == other.target
            && self.sender == other.sender
            && self.to == other.to
            && self.body == other.body
    }
}

impl<P: Protocol> fmt::Debug for Message<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("protocol", &P::protocol_id().to_string())
            .field("dialogue_reference", &self.dialogue_reference)
            .field("message_id", &self.message_id)
            .field("target", &self.target)
            .field("sender", &self.sender)
            .field("to", &self.to)
            .field("body", &self.body)
            .finish()
    }
}
