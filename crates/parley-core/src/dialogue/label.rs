//! Dialogue labels.

use std::fmt;

use crate::protocol::envelope::Address;
use crate::protocol::message::DialogueReference;

/// Unique key of a dialogue: reference plus the two parties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogueLabel {
    pub reference: DialogueReference,
    pub opponent: Address,
    pub starter: Address,
}

impl DialogueLabel {
    pub fn new(reference: DialogueReference, opponent: impl Into<Address>, starter: impl Into<Address>) -> Self {
        Self {
            reference,
            opponent: opponent.into(),
            starter: starter.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.reference.is_complete()
    }

    /// Label as known before the responder filled in its half.
    pub fn incomplete(&self) -> Self {
        Self {
            reference: self.reference.to_incomplete(),
            opponent: self.opponent.clone(),
            starter: self.starter.clone(),
        }
    }
}

impl fmt::Display for DialogueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.reference.starter, self.reference.responder, self.opponent, self.starter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_drops_responder_half() {
        let l = DialogueLabel::new(DialogueReference::new("7", "3"), "bob", "alice");
        assert!(l.is_complete());
        let inc = l.incomplete();
        assert!(!inc.is_complete());
        assert_eq!(inc.reference.starter, "7");
        assert_eq!(inc.opponent, "bob");
        assert_eq!(l.to_string(), "7_3_bob_alice");
    }
}
