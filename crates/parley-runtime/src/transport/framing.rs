//! Length-prefixed framing for stream transports.
//!
//! Each frame is `len:u32 (LE) | bytes`. Any `AsyncRead`/`AsyncWrite` works,
//! so TCP, unix sockets and in-memory duplex pipes share one codec.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use parley_core::error::{ParleyError, Result};

/// Default upper bound for one frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &[u8]) -> Result<()> {
    let len = u32::try_from(frame.len())
        .map_err(|_| ParleyError::Connection(format!("frame too large: {} bytes", frame.len())))?;
    w.write_u32_le(len).await.map_err(io_err)?;
    w.write_all(frame).await.map_err(io_err)?;
    w.flush().await.map_err(io_err)
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
///
/// A frame larger than `max_frame_bytes` is an error: the stream cannot be
/// resynchronized after it.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, max_frame_bytes: usize) -> Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    let mut got = 0;
    while got < len_buf.len() {
        let n = r.read(&mut len_buf[got..]).await.map_err(io_err)?;
        if n == 0 {
            if got == 0 {
                return Ok(None);
            }
            return Err(ParleyError::Connection("stream closed inside frame header".into()));
        }
        got += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(ParleyError::Connection(format!(
            "frame of {len} bytes exceeds limit {max_frame_bytes}"
        )));
    }

    let mut buf = BytesMut::zeroed(len);
    r.read_exact(&mut buf).await.map_err(io_err)?;
    Ok(Some(buf.freeze()))
}

fn io_err(e: std::io::Error) -> ParleyError {
    ParleyError::Connection(format!("io: {e}"))
}
