//! Envelope wire record (panic-free).
//!
//! Layout (little-endian):
//! `v:u8 | flags:u8 | to:u16+bytes | sender:u16+bytes | protocol_id:u16+bytes |
//! payload:u32+bytes | [uri:u16+bytes]`
//!
//! Parsing rules:
//! - Never index (`buf[0]`); use `Buf` with `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ParleyError, Result};
use crate::protocol::envelope::{check_addresses, Envelope, EnvelopeContext};
use crate::protocol::public_id::ProtocolId;

/// Wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Flag: a uri trailer is present.
pub const FLAG_URI_PRESENT: u8 = 0x01;

/// Encode an envelope. The local routing hint (`context.connection_id`) is
/// not part of the record.
pub fn encode_envelope(env: &Envelope) -> Result<Bytes> {
    let protocol_id = env.protocol_id.to_string();
    let uri = env.uri();

    let mut out = BytesMut::with_capacity(
        2 + 6 + 4 + env.to.len() + env.sender.len() + protocol_id.len() + env.payload.len()
            + uri.map(|u| 2 + u.len()).unwrap_or(0),
    );
    out.put_u8(WIRE_VERSION);
    out.put_u8(if uri.is_some() { FLAG_URI_PRESENT } else { 0 });
    put_str16(&mut out, "to", &env.to)?;
    put_str16(&mut out, "sender", &env.sender)?;
    put_str16(&mut out, "protocol_id", &protocol_id)?;

    let payload_len = u32::try_from(env.payload.len())
        .map_err(|_| ParleyError::Malformed("payload exceeds u32 length".into()))?;
    out.put_u32_le(payload_len);
    out.put_slice(&env.payload);

    if let Some(uri) = uri {
        put_str16(&mut out, "uri", uri)?;
    }
    Ok(out.freeze())
}

/// Decode an envelope record. The payload is a zero-copy slice of `buf`.
pub fn decode_envelope(mut buf: Bytes) -> Result<Envelope> {
    if buf.remaining() < 2 {
        return Err(ParleyError::Malformed("envelope too short".into()));
    }

    let v = buf.get_u8();
    if v != WIRE_VERSION {
        return Err(ParleyError::Malformed(format!("unsupported wire version: {v}")));
    }
    let flags = buf.get_u8();
    if flags & !FLAG_URI_PRESENT != 0 {
        return Err(ParleyError::Malformed(format!("unknown flags: {flags:#04x}")));
    }

    let to = get_str16(&mut buf, "to")?;
    let sender = get_str16(&mut buf, "sender")?;
    let protocol_id: ProtocolId = get_str16(&mut buf, "protocol_id")?.parse()?;

    if buf.remaining() < 4 {
        return Err(ParleyError::Malformed("missing payload length".into()));
    }
    let payload_len = buf.get_u32_le() as usize;
    if buf.remaining() < payload_len {
        return Err(ParleyError::Malformed(format!(
            "payload truncated: need {payload_len} bytes, have {}",
            buf.remaining()
        )));
    }
    let payload = buf.copy_to_bytes(payload_len);

    let context = if flags & FLAG_URI_PRESENT != 0 {
        Some(EnvelopeContext {
            connection_id: None,
            uri: Some(get_str16(&mut buf, "uri")?),
        })
    } else {
        None
    };

    if buf.has_remaining() {
        return Err(ParleyError::Malformed(format!(
            "{} trailing bytes after envelope",
            buf.remaining()
        )));
    }

    check_addresses(&to, &sender)?;
    Ok(Envelope {
        to,
        sender,
        protocol_id,
        payload,
        context,
    })
}

fn put_str16(out: &mut BytesMut, field: &str, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| ParleyError::Malformed(format!("{field} exceeds u16 length")))?;
    out.put_u16_le(len);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn get_str16(buf: &mut Bytes, field: &str) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(ParleyError::Malformed(format!("missing {field} length")));
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(ParleyError::Malformed(format!("{field} truncated")));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ParleyError::Malformed(format!("{field} is not valid utf-8")))
}
