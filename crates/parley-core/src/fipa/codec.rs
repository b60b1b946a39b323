//! FIPA payload codec (JSON).
//!
//! ```text
//! {"dialogue_reference":["<starter>","<responder>"],"message_id":2,"target":1,
//!  "performative":"propose","content":{"proposal":{"price":10}}}
//! ```
//!
//! Decoding fails closed: unknown performatives, unknown top-level fields and
//! any missing or extra content key are rejected before a message exists.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ParleyError, Result};
use crate::fipa::message::{FipaBody, FipaPerformative};
use crate::fipa::Fipa;
use crate::protocol::message::{DialogueReference, Message};

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMessage {
    dialogue_reference: (String, String),
    message_id: u64,
    target: u64,
    performative: String,
    content: Map<String, Value>,
}

pub fn encode(message: &Message<Fipa>) -> Result<Bytes> {
    let mut content = Map::new();
    match &message.body {
        FipaBody::Cfp { query } => {
            content.insert("query".into(), to_value(query)?);
        }
        FipaBody::Propose { proposal } => {
            content.insert("proposal".into(), to_value(proposal)?);
        }
        FipaBody::AcceptWInform { info }
        | FipaBody::Inform { info }
        | FipaBody::MatchAcceptWInform { info } => {
            content.insert("info".into(), to_value(info)?);
        }
        FipaBody::Accept | FipaBody::Decline | FipaBody::End | FipaBody::MatchAccept => {}
    }

    let wire = WireMessage {
        dialogue_reference: (
            message.dialogue_reference.starter.clone(),
            message.dialogue_reference.responder.clone(),
        ),
        message_id: message.message_id,
        target: message.target,
        performative: message.body.performative().as_str().to_string(),
        content,
    };
    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(|e| ParleyError::Internal(format!("fipa encode: {e}")))
}

pub fn decode(payload: &[u8]) -> Result<Message<Fipa>> {
    let wire: WireMessage = serde_json::from_slice(payload)
        .map_err(|e| ParleyError::Malformed(format!("fipa payload: {e}")))?;
    let performative: FipaPerformative = wire.performative.parse()?;
    let mut content = wire.content;

    let body = match performative {
        FipaPerformative::Cfp => {
            expect_keys(performative, &content, &["query"])?;
            FipaBody::Cfp {
                query: take(&mut content, "query")?,
            }
        }
        FipaPerformative::Propose => {
            expect_keys(performative, &content, &["proposal"])?;
            FipaBody::Propose {
                proposal: take(&mut content, "proposal")?,
            }
        }
        FipaPerformative::AcceptWInform => {
            expect_keys(performative, &content, &["info"])?;
            FipaBody::AcceptWInform {
                info: take(&mut content, "info")?,
            }
        }
        FipaPerformative::Inform => {
            expect_keys(performative, &content, &["info"])?;
            FipaBody::Inform {
                info: take(&mut content, "info")?,
            }
        }
        FipaPerformative::MatchAcceptWInform => {
            expect_keys(performative, &content, &["info"])?;
            FipaBody::MatchAcceptWInform {
                info: take(&mut content, "info")?,
            }
        }
        FipaPerformative::Accept => {
            expect_keys(performative, &content, &[])?;
            FipaBody::Accept
        }
        FipaPerformative::Decline => {
            expect_keys(performative, &content, &[])?;
            FipaBody::Decline
        }
        FipaPerformative::End => {
            expect_keys(performative, &content, &[])?;
            FipaBody::End
        }
        FipaPerformative::MatchAccept => {
            expect_keys(performative, &content, &[])?;
            FipaBody::MatchAccept
        }
    };

    let (starter, responder) = wire.dialogue_reference;
    Ok(Message::new(
        DialogueReference::new(starter, responder),
        wire.message_id,
        wire.target,
        String::new(),
        String::new(),
        body,
    ))
}

fn to_value<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| ParleyError::Internal(format!("fipa encode: {e}")))
}

fn expect_keys(p: FipaPerformative, content: &Map<String, Value>, required: &[&str]) -> Result<()> {
    let exact = content.len() == required.len() && required.iter().all(|k| content.contains_key(*k));
    if exact {
        return Ok(());
    }
    let mut got: Vec<&str> = content.keys().map(String::as_str).collect();
    got.sort_unstable();
    Err(ParleyError::Malformed(format!(
        "{p} requires content {required:?}, got {got:?}"
    )))
}

fn take<T: DeserializeOwned>(content: &mut Map<String, Value>, key: &str) -> Result<T> {
    let v = content
        .remove(key)
        .ok_or_else(|| ParleyError::Malformed(format!("missing content field {key}")))?;
    serde_json::from_value(v).map_err(|e| ParleyError::Malformed(format!("content field {key}: {e}")))
}
