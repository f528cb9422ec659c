//! Async frame reader and writer.
//!
//! Readers pull exactly one header and then exactly `payload_length`
//! bytes, looping over partial reads. A peer that goes away in the middle
//! of either stage is reported as a hard error, never as a short frame.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::Frame;
use super::wire_format::{Header, HEADER_SIZE};
use crate::error::{WireError, WireResult};

/// Fill `buf` completely. Returns the number of bytes read before EOF.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> WireResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(filled)
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean EOF before the first header byte, so
/// servers can tell an orderly disconnect from a truncated frame.
pub async fn read_frame_opt<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_size: u32,
) -> WireResult<Option<Frame>> {
    let mut header_buf = [0u8; HEADER_SIZE];
    let got = fill(reader, &mut header_buf).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_SIZE {
        return Err(WireError::IncompleteHeader {
            received: got,
            expected: HEADER_SIZE,
        });
    }

    let header = Header::decode(&header_buf).ok_or(WireError::IncompleteHeader {
        received: got,
        expected: HEADER_SIZE,
    })?;
    header.validate(max_payload_size)?;

    let len = header.payload_length as usize;
    let mut payload = BytesMut::zeroed(len);
    let got = fill(reader, &mut payload).await?;
    if got < len {
        return Err(WireError::IncompletePayload {
            received: got,
            expected: len,
        });
    }

    tracing::trace!(
        service_type = header.service_type,
        payload_length = header.payload_length,
        "frame received"
    );
    Ok(Some(Frame::new(header, payload.freeze())))
}

/// Read one frame. EOF before the header is `IncompleteHeader`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_size: u32,
) -> WireResult<Frame> {
    read_frame_opt(reader, max_payload_size)
        .await?
        .ok_or(WireError::IncompleteHeader {
            received: 0,
            expected: HEADER_SIZE,
        })
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> WireResult<()> {
    writer.write_all(&frame.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
