//! Per-protocol dialogue rules: openers, legal replies, terminal set and the
//! terminal-to-end-state table.

use std::collections::{HashMap, HashSet};

use crate::protocol::message::Protocol;

/// One row of the end-state table: a dialogue whose last performative is
/// `on`, replying to a message with performative `after` (any when `None`),
/// ends in `end_state`.
pub struct EndStateRule<P: Protocol> {
    pub on: P::Performative,
    pub after: Option<P::Performative>,
    pub end_state: P::EndState,
}

/// Declared state machine of a protocol.
pub struct DialogueRules<P: Protocol> {
    initial: HashSet<P::Performative>,
    terminal: HashSet<P::Performative>,
    valid_replies: HashMap<P::Performative, HashSet<P::Performative>>,
    end_states: Vec<EndStateRule<P>>,
}

impl<P: Protocol> DialogueRules<P> {
    pub fn new(
        initial: impl IntoIterator<Item = P::Performative>,
        terminal: impl IntoIterator<Item = P::Performative>,
    ) -> Self {
        Self {
            initial: initial.into_iter().collect(),
            terminal: terminal.into_iter().collect(),
            valid_replies: HashMap::new(),
            end_states: Vec::new(),
        }
    }

    /// Declare the legal replies to `from`. Performatives never declared
    /// accept no reply.
    pub fn replies(
        mut self,
        from: P::Performative,
        to: impl IntoIterator<Item = P::Performative>,
    ) -> Self {
        self.valid_replies.entry(from).or_default().extend(to);
        self
    }

    /// Append an end-state row. Rows are matched in declaration order.
    pub fn end_state(
        mut self,
        on: P::Performative,
        after: Option<P::Performative>,
        end_state: P::EndState,
    ) -> Self {
        self.end_states.push(EndStateRule { on, after, end_state });
        self
    }

    pub fn is_initial(&self, p: P::Performative) -> bool {
        self.initial.contains(&p)
    }

    pub fn is_terminal(&self, p: P::Performative) -> bool {
        self.terminal.contains(&p)
    }

    pub fn is_valid_reply(&self, to: P::Performative, reply: P::Performative) -> bool {
        self.valid_replies
            .get(&to)
            .map(|set| set.contains(&reply))
            .unwrap_or(false)
    }

    pub fn valid_replies(&self, to: P::Performative) -> impl Iterator<Item = P::Performative> + '_ {
        self.valid_replies.get(&to).into_iter().flatten().copied()
    }

    /// End state for a dialogue closed by `last` in reply to `replied_to`.
    /// First matching row wins.
    pub fn end_state_for(
        &self,
        last: P::Performative,
        replied_to: Option<P::Performative>,
    ) -> Option<P::EndState> {
        self.end_states
            .iter()
            .find(|r| r.on == last && (r.after.is_none() || r.after == replied_to))
            .map(|r| r.end_state)
    }
}
