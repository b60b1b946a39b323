//! FIPA contract-net negotiation (`fetchai/fipa:1.0.0`).
//!
//! A buyer opens with `cfp`, sellers answer with `propose` or `decline`, and a
//! successful negotiation runs accept, match_accept and inform until one side
//! sends `end`.

pub mod codec;
pub mod message;

use bytes::Bytes;

use crate::dialogue::{DialogueRules, Dialogues};
use crate::error::Result;
use crate::protocol::message::{Message, Protocol};
use crate::protocol::public_id::{ProtocolId, PublicId};

pub use message::{
    AttributeValue, Constraint, Description, FipaBody, FipaPerformative, Info, Query, Relation,
};

pub const FIPA_AUTHOR: &str = "fetchai";
pub const FIPA_NAME: &str = "fipa";
pub const FIPA_VERSION: &str = "1.0.0";

/// Marker type for the FIPA protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fipa;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FipaRole {
    Buyer,
    Seller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FipaEndState {
    Successful,
    DeclinedCfp,
    DeclinedPropose,
    DeclinedAccept,
}

pub type FipaMessage = Message<Fipa>;
pub type FipaDialogues = Dialogues<Fipa>;

impl Protocol for Fipa {
    type Performative = FipaPerformative;
    type Body = FipaBody;
    type Role = FipaRole;
    type EndState = FipaEndState;

    fn protocol_id() -> ProtocolId {
        PublicId::from_static(FIPA_AUTHOR, FIPA_NAME, FIPA_VERSION)
    }

    fn performative(body: &FipaBody) -> FipaPerformative {
        body.performative()
    }

    fn rules() -> DialogueRules<Self> {
        use FipaEndState as E;
        use FipaPerformative::*;

        DialogueRules::new([Cfp], [Decline, End])
            .replies(Cfp, [Propose, Decline])
            .replies(Propose, [Accept, AcceptWInform, Decline, Propose])
            .replies(Accept, [Decline, MatchAccept, MatchAcceptWInform])
            .replies(AcceptWInform, [Decline, MatchAccept, MatchAcceptWInform])
            .replies(MatchAccept, [Inform, End])
            .replies(MatchAcceptWInform, [Inform, End])
            .replies(Inform, [Inform, End])
            .end_state(End, None, E::Successful)
            .end_state(Decline, Some(Cfp), E::DeclinedCfp)
            .end_state(Decline, Some(Propose), E::DeclinedPropose)
            .end_state(Decline, Some(Accept), E::DeclinedAccept)
            .end_state(Decline, Some(AcceptWInform), E::DeclinedAccept)
    }

    fn role_from_first_message(first: &Message<Self>, self_address: &str) -> FipaRole {
        if first.sender == self_address {
            FipaRole::Buyer
        } else {
            FipaRole::Seller
        }
    }

    fn encode(message: &Message<Self>) -> Result<Bytes> {
        codec::encode(message)
    }

    fn decode(payload: &[u8]) -> Result<Message<Self>> {
        codec::decode(payload)
    }
}
