//! Addressed envelope: the unit every connection carries.
//!
//! The payload is opaque protocol-encoded bytes; `seal`/`open` convert to and
//! from typed messages through the protocol's codec.

use std::fmt;

use bytes::Bytes;

use crate::error::{ParleyError, Result};
use crate::protocol::message::{Message, Protocol};
use crate::protocol::public_id::{ProtocolId, PublicId};

/// Agent address (or namespaced component id).
pub type Address = String;

/// Identifier of a connection owned by a multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Optional routing context attached to an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeContext {
    /// Explicit routing hint. Local only, never written to the wire.
    pub connection_id: Option<ConnectionId>,
    /// Transport-level uri (carried on the wire).
    pub uri: Option<String>,
}

impl EnvelopeContext {
    pub fn via(connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            uri: None,
        }
    }
}

/// Addressed container for one protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub to: Address,
    pub sender: Address,
    pub protocol_id: ProtocolId,
    pub payload: Bytes,
    pub context: Option<EnvelopeContext>,
}

impl Envelope {
    /// Build an envelope, enforcing that `to` and `sender` are either both
    /// agent addresses or both public ids.
    pub fn new(
        to: impl Into<Address>,
        sender: impl Into<Address>,
        protocol_id: ProtocolId,
        payload: Bytes,
        context: Option<EnvelopeContext>,
    ) -> Result<Self> {
        let to = to.into();
        let sender = sender.into();
        check_addresses(&to, &sender)?;
        Ok(Self {
            to,
            sender,
            protocol_id,
            payload,
            context,
        })
    }

    /// Encode `message` with its protocol codec and wrap it.
    pub fn seal<P: Protocol>(message: &Message<P>, context: Option<EnvelopeContext>) -> Result<Self> {
        message.validate()?;
        let payload = P::encode(message)?;
        Envelope::new(
            message.to.clone(),
            message.sender.clone(),
            P::protocol_id(),
            payload,
            context,
        )
    }

    /// Decode the payload as a `P` message. Sender and recipient are taken
    /// from the envelope.
    pub fn open<P: Protocol>(&self) -> Result<Message<P>> {
        let expected = P::protocol_id();
        if self.protocol_id != expected {
            return Err(ParleyError::Malformed(format!(
                "protocol mismatch: envelope carries {}, expected {}",
                self.protocol_id, expected
            )));
        }
        let mut message = P::decode(&self.payload)?;
        message.sender = self.sender.clone();
        message.to = self.to.clone();
        message.validate()?;
        Ok(message)
    }

    /// Routing hint, if any.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.context.as_ref().and_then(|c| c.connection_id.as_ref())
    }

    pub fn uri(&self) -> Option<&str> {
        self.context.as_ref().and_then(|c| c.uri.as_deref())
    }

    /// True when both ends are namespaced component ids.
    pub fn is_component_to_component(&self) -> bool {
        PublicId::is_public_id(&self.to)
    }
}

pub(crate) fn check_addresses(to: &str, sender: &str) -> Result<()> {
    if to.is_empty() || sender.is_empty() {
        return Err(ParleyError::Malformed("envelope to/sender must not be empty".into()));
    }
    if PublicId::is_public_id(to) != PublicId::is_public_id(sender) {
        return Err(ParleyError::Malformed(format!(
            "envelope mixes address kinds: to={to}, sender={sender}"
        )));
    }
    Ok(())
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope(to={}, sender={}, protocol_id={}, payload_len={})",
            self.to,
            self.sender,
            self.protocol_id,
            self.payload.len()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pid() -> ProtocolId {
        "fetchai/fipa:1.0.0".parse().unwrap()
    }

    #[test]
    fn mixed_address_kinds_rejected() {
        let err = Envelope::new("agent_b", "fetchai/skill:0.1.0", pid(), Bytes::new(), None)
            .expect_err("must fail");
        assert_eq!(err.kind().as_str(), "MALFORMED");

        assert!(Envelope::new("agent_b", "agent_a", pid(), Bytes::new(), None).is_ok());
        assert!(Envelope::new(
            "fetchai/ledger:0.1.0",
            "fetchai/skill:0.1.0",
            pid(),
            Bytes::new(),
            None
        )
        .unwrap()
        .is_component_to_component());
    }

    #[test]
    fn routing_hint_accessor() {
        let env = Envelope::new("b", "a", pid(), Bytes::new(), Some(EnvelopeContext::via("beta"))).unwrap();
        assert_eq!(env.connection_id().map(|c| c.as_str()), Some("beta"));
        assert_eq!(env.uri(), None);
    }
}
