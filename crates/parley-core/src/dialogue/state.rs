//! One conversation: an ordered message history with one counterparty.

use std::sync::Arc;

use crate::dialogue::label::DialogueLabel;
use crate::dialogue::rules::DialogueRules;
use crate::dialogue::stats::DialogueStats;
use crate::error::{ParleyError, Result};
use crate::protocol::envelope::Address;
use crate::protocol::message::{Message, Protocol};

/// Coarse lifecycle of a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// Exactly one message.
    Opened,
    /// Two or more messages, last one non-terminal.
    Active,
    /// Last performative is terminal. No transition leaves this state.
    Ended,
}

pub struct Dialogue<P: Protocol> {
    label: DialogueLabel,
    self_address: Address,
    role: P::Role,
    rules: Arc<DialogueRules<P>>,
    stats: Arc<DialogueStats<P::EndState>>,
    /// Arrival order; ids are 1..=len.
    messages: Vec<Message<P>>,
    end_state: Option<P::EndState>,
}

impl<P: Protocol> Dialogue<P> {
    pub(crate) fn new(
        label: DialogueLabel,
        self_address: Address,
        role: P::Role,
        rules: Arc<DialogueRules<P>>,
        stats: Arc<DialogueStats<P::EndState>>,
    ) -> Self {
        Self {
            label,
            self_address,
            role,
            rules,
            stats,
            messages: Vec::new(),
            end_state: None,
        }
    }

    pub fn label(&self) -> &DialogueLabel {
        &self.label
    }

    pub(crate) fn set_label(&mut self, label: DialogueLabel) {
        self.label = label;
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    pub fn role(&self) -> P::Role {
        self.role
    }

    pub fn end_state(&self) -> Option<P::EndState> {
        self.end_state
    }

    pub fn is_self_initiated(&self) -> bool {
        self.label.starter == self.self_address
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn state(&self) -> DialogueState {
        match self.messages.last() {
            Some(m) if self.rules.is_terminal(m.performative()) => DialogueState::Ended,
            _ if self.messages.len() <= 1 => DialogueState::Opened,
            _ => DialogueState::Active,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state() == DialogueState::Ended
    }

    /// All messages in arrival order.
    pub fn messages(&self) -> &[Message<P>] {
        &self.messages
    }

    pub fn incoming_messages(&self) -> impl Iterator<Item = &Message<P>> + '_ {
        self.messages.iter().filter(move |m| !self.is_outgoing(m))
    }

    pub fn outgoing_messages(&self) -> impl Iterator<Item = &Message<P>> + '_ {
        self.messages.iter().filter(move |m| self.is_outgoing(m))
    }

    pub fn last_message(&self) -> Option<&Message<P>> {
        self.messages.last()
    }

    pub fn last_incoming_message(&self) -> Option<&Message<P>> {
        self.messages.iter().rev().find(|m| !self.is_outgoing(m))
    }

    pub fn last_outgoing_message(&self) -> Option<&Message<P>> {
        self.messages.iter().rev().find(|m| self.is_outgoing(m))
    }

    pub fn get_message(&self, message_id: u64) -> Option<&Message<P>> {
        let idx = usize::try_from(message_id).ok()?.checked_sub(1)?;
        self.messages.get(idx)
    }

    fn is_outgoing(&self, m: &Message<P>) -> bool {
        m.sender == self.self_address
    }

    pub fn is_valid_next(&self, message: &Message<P>) -> bool {
        self.check_next(message).is_ok()
    }

    /// Why `message` cannot be appended, if it cannot.
    pub fn check_next(&self, message: &Message<P>) -> Result<()> {
        message.validate()?;

        if message.dialogue_reference.starter != self.label.reference.starter {
            return Err(ParleyError::ProtocolViolation(format!(
                "reference {} does not belong to dialogue {}",
                message.dialogue_reference, self.label
            )));
        }
        let responder = &message.dialogue_reference.responder;
        if !responder.is_empty()
            && !self.label.reference.responder.is_empty()
            && *responder != self.label.reference.responder
        {
            return Err(ParleyError::ProtocolViolation(format!(
                "reference {} does not belong to dialogue {}",
                message.dialogue_reference, self.label
            )));
        }

        let opponent = &self.label.opponent;
        let between_parties = (message.sender == self.self_address && message.to == *opponent)
            || (message.sender == *opponent && message.to == self.self_address);
        if !between_parties {
            return Err(ParleyError::ProtocolViolation(format!(
                "message {} -> {} is not between {} and {}",
                message.sender, message.to, self.self_address, opponent
            )));
        }

        let performative = message.performative();
        let Some(last) = self.messages.last() else {
            if !message.is_opener() {
                return Err(ParleyError::ProtocolViolation(format!(
                    "first message must have id 1 and target 0, got id {} target {}",
                    message.message_id, message.target
                )));
            }
            if !self.rules.is_initial(performative) {
                return Err(ParleyError::ProtocolViolation(format!(
                    "{performative} cannot open a dialogue"
                )));
            }
            return Ok(());
        };

        let last_performative = last.performative();
        if self.rules.is_terminal(last_performative) {
            return Err(ParleyError::ProtocolViolation(format!(
                "dialogue {} has ended with {last_performative}",
                self.label
            )));
        }
        if message.message_id != last.message_id + 1 {
            return Err(ParleyError::ProtocolViolation(format!(
                "expected message_id {}, got {}",
                last.message_id + 1,
                message.message_id
            )));
        }
        if self.get_message(message.target).is_none() {
            return Err(ParleyError::ProtocolViolation(format!(
                "target {} is not a message of this dialogue",
                message.target
            )));
        }
        if !self.rules.is_valid_reply(last_performative, performative) {
            return Err(ParleyError::ProtocolViolation(format!(
                "{performative} is not a valid reply to {last_performative}"
            )));
        }
        Ok(())
    }

    /// Build the next outgoing message replying to `target` (which must be
    /// the most recent message) and append it.
    pub fn reply(&mut self, target: &Message<P>, body: P::Body) -> Result<Message<P>> {
        let last_id = self.messages.last().map(|m| m.message_id).unwrap_or(0);
        if target.message_id != last_id || self.get_message(target.message_id) != Some(target) {
            return Err(ParleyError::ProtocolViolation(format!(
                "reply target {} is not the most recent message {last_id}",
                target.message_id
            )));
        }
        self.reply_to_last(body)
    }

    /// Reply to whatever message is most recent.
    pub fn reply_to_last(&mut self, body: P::Body) -> Result<Message<P>> {
        let Some(last) = self.messages.last() else {
            return Err(ParleyError::ProtocolViolation(format!(
                "dialogue {} has no message to reply to",
                self.label
            )));
        };
        let message = Message::new(
            self.label.reference.clone(),
            last.message_id + 1,
            last.message_id,
            self.self_address.clone(),
            self.label.opponent.clone(),
            body,
        );
        self.append(message.clone())?;
        Ok(message)
    }

    /// Validate and append. Records the end state once a terminal
    /// performative lands.
    pub(crate) fn append(&mut self, message: Message<P>) -> Result<()> {
        self.check_next(&message)?;

        let performative = message.performative();
        if self.rules.is_terminal(performative) {
            let replied_to = self.get_message(message.target).map(|m| m.performative());
            self.end_state = self.rules.end_state_for(performative, replied_to);
            if let Some(end_state) = self.end_state {
                self.stats.add_end_state(end_state, self.is_self_initiated());
            }
        }
        tracing::trace!(
            dialogue = %self.label,
            message_id = message.message_id,
            performative = %performative,
            "dialogue append"
        );
        self.messages.push(message);
        Ok(())
    }
}

impl<P: Protocol> std::fmt::Debug for Dialogue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialogue")
            .field("label", &self.label)
            .field("self_address", &self.self_address)
            .field("role", &self.role)
            .field("messages", &self.messages.len())
            .field("end_state", &self.end_state)
            .finish()
    }
}
