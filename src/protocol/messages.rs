//! Typed ETSI 004 message payloads.
//!
//! Every request and response has a fixed binary layout. Integers are
//! Big Endian; URIs are NUL-terminated; the QoS mimetype is a 256-byte
//! zero-padded field. Nothing is length-prefixed text.

use bytes::{Buf, BufMut, BytesMut};

use super::frame::Frame;
use super::wire_format::ServiceType;
use crate::error::{WireError, WireResult};
use crate::etsi004::{Ksid, Qos, StreamStatus, MIMETYPE_LEN};

/// Encoded size of a QoS record: seven u32 fields plus the mimetype.
pub const QOS_RECORD_LEN: usize = 7 * 4 + MIMETYPE_LEN;

/// Encoded size of a KSID.
pub const KSID_LEN: usize = 16;

/// A message with a fixed service type and binary payload layout.
pub trait Message: Sized {
    const SERVICE_TYPE: ServiceType;

    /// Append the payload bytes to `buf`.
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Parse a payload. Trailing bytes are rejected.
    fn decode_payload(payload: &[u8]) -> WireResult<Self>;

    /// Wrap the encoded payload in a frame.
    fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::new();
        self.encode_payload(&mut buf);
        Frame::with_payload(Self::SERVICE_TYPE, buf.freeze())
    }

    /// Check the service type and decode the payload.
    fn from_frame(frame: &Frame) -> WireResult<Self> {
        frame.expect(Self::SERVICE_TYPE)?;
        Self::decode_payload(frame.payload())
    }
}

/// OPEN_CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectRequest {
    pub source: String,
    pub destination: String,
    pub qos: Qos,
    /// All-zero for an initiator.
    pub ksid: Ksid,
}

/// OPEN_CONNECT response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConnectResponse {
    pub status: u32,
    /// Agreed QoS and KSID. Always present for Success and QosNotMet;
    /// optional for PeerDisconnected, where some peers send the bare status.
    pub granted: Option<(Qos, Ksid)>,
}

/// GET_KEY request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetKeyRequest {
    pub ksid: Ksid,
    pub index: u32,
    /// Capacity of the caller's metadata buffer.
    pub metadata_capacity: u32,
}

/// GET_KEY response. Index, key and metadata are only encoded on Success.
#[derive(Clone, PartialEq, Eq)]
pub struct GetKeyResponse {
    pub status: u32,
    pub index: u32,
    pub key: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// CLOSE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub ksid: Ksid,
}

/// CLOSE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseResponse {
    pub status: u32,
}

impl OpenConnectResponse {
    fn requires_grant(status: u32) -> bool {
        status == StreamStatus::Success.code() || status == StreamStatus::QosNotMet.code()
    }

    fn may_carry_grant(status: u32) -> bool {
        status == StreamStatus::PeerDisconnected.code()
    }
}

impl GetKeyResponse {
    /// A response carrying only a failure status.
    pub fn failure(status: StreamStatus) -> Self {
        Self {
            status: status.code(),
            index: 0,
            key: Vec::new(),
            metadata: Vec::new(),
        }
    }
}

impl std::fmt::Debug for GetKeyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetKeyResponse")
            .field("status", &self.status)
            .field("index", &self.index)
            .field("key_len", &self.key.len())
            .field("metadata_len", &self.metadata.len())
            .finish()
    }
}

impl Message for OpenConnectRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::OpenConnectRequest;

    fn encode_payload(&self, buf: &mut BytesMut) {
        put_cstr(buf, &self.source);
        put_cstr(buf, &self.destination);
        put_qos(buf, &self.qos);
        buf.put_slice(self.ksid.as_bytes());
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let source = get_cstr(&mut cur, "source")?;
        let destination = get_cstr(&mut cur, "destination")?;
        let qos = get_qos(&mut cur)?;
        let ksid = get_ksid(&mut cur)?;
        finish(cur)?;
        Ok(Self {
            source,
            destination,
            qos,
            ksid,
        })
    }
}

impl Message for OpenConnectResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::OpenConnectResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u32(self.status);
        if Self::requires_grant(self.status) {
            let (qos, ksid) = match &self.granted {
                Some((qos, ksid)) => (qos.clone(), *ksid),
                None => (Qos::default(), Ksid::NIL),
            };
            put_qos(buf, &qos);
            buf.put_slice(ksid.as_bytes());
        } else if Self::may_carry_grant(self.status) {
            if let Some((qos, ksid)) = &self.granted {
                put_qos(buf, qos);
                buf.put_slice(ksid.as_bytes());
            }
        }
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let status = get_u32(&mut cur, "status")?;
        let has_grant = Self::requires_grant(status)
            || (Self::may_carry_grant(status) && !cur.is_empty());
        let granted = if has_grant {
            let qos = get_qos(&mut cur)?;
            let ksid = get_ksid(&mut cur)?;
            Some((qos, ksid))
        } else {
            None
        };
        finish(cur)?;
        Ok(Self { status, granted })
    }
}

impl Message for GetKeyRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::GetKeyRequest;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(self.ksid.as_bytes());
        buf.put_u32(self.index);
        buf.put_u32(self.metadata_capacity);
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let ksid = get_ksid(&mut cur)?;
        let index = get_u32(&mut cur, "index")?;
        let metadata_capacity = get_u32(&mut cur, "metadata capacity")?;
        finish(cur)?;
        Ok(Self {
            ksid,
            index,
            metadata_capacity,
        })
    }
}

impl Message for GetKeyResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::GetKeyResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u32(self.status);
        if self.status == StreamStatus::Success.code() {
            buf.put_u32(self.index);
            buf.put_u32(self.key.len() as u32);
            buf.put_slice(&self.key);
            buf.put_u32(self.metadata.len() as u32);
            buf.put_slice(&self.metadata);
        }
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let status = get_u32(&mut cur, "status")?;
        if status != StreamStatus::Success.code() {
            finish(cur)?;
            return Ok(Self {
                status,
                index: 0,
                key: Vec::new(),
                metadata: Vec::new(),
            });
        }
        let index = get_u32(&mut cur, "index")?;
        let key = get_sized(&mut cur, "key")?;
        let metadata = get_sized(&mut cur, "metadata")?;
        finish(cur)?;
        Ok(Self {
            status,
            index,
            key,
            metadata,
        })
    }
}

impl Message for CloseRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::CloseRequest;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(self.ksid.as_bytes());
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let ksid = get_ksid(&mut cur)?;
        finish(cur)?;
        Ok(Self { ksid })
    }
}

impl Message for CloseResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::CloseResponse;

    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u32(self.status);
    }

    fn decode_payload(payload: &[u8]) -> WireResult<Self> {
        let mut cur = payload;
        let status = get_u32(&mut cur, "status")?;
        finish(cur)?;
        Ok(Self { status })
    }
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    // Interior NULs would split the field; cut there.
    let bytes = s.as_bytes();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    buf.put_slice(&bytes[..end]);
    buf.put_u8(0);
}

fn put_qos(buf: &mut BytesMut, qos: &Qos) {
    buf.put_u32(qos.key_chunk_size);
    buf.put_u32(qos.max_bps);
    buf.put_u32(qos.min_bps);
    buf.put_u32(qos.jitter);
    buf.put_u32(qos.priority);
    buf.put_u32(qos.timeout);
    buf.put_u32(qos.ttl);

    let mut mime = [0u8; MIMETYPE_LEN];
    let src = qos.metadata_mimetype.as_bytes();
    let n = src.len().min(MIMETYPE_LEN);
    mime[..n].copy_from_slice(&src[..n]);
    buf.put_slice(&mime);
}

fn need(cur: &[u8], n: usize, field: &str) -> WireResult<()> {
    if cur.remaining() < n {
        return Err(WireError::Malformed(format!(
            "{} needs {} bytes, {} left",
            field,
            n,
            cur.remaining()
        )));
    }
    Ok(())
}

fn get_u32(cur: &mut &[u8], field: &str) -> WireResult<u32> {
    need(cur, 4, field)?;
    Ok(cur.get_u32())
}

fn get_ksid(cur: &mut &[u8]) -> WireResult<Ksid> {
    need(cur, KSID_LEN, "ksid")?;
    let mut bytes = [0u8; KSID_LEN];
    cur.copy_to_slice(&mut bytes);
    Ok(Ksid::from_bytes(bytes))
}

fn get_cstr(cur: &mut &[u8], field: &str) -> WireResult<String> {
    let end = cur
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| WireError::Malformed(format!("{} is not NUL-terminated", field)))?;
    let s = std::str::from_utf8(&cur[..end])
        .map_err(|_| WireError::Malformed(format!("{} is not UTF-8", field)))?
        .to_string();
    cur.advance(end + 1);
    Ok(s)
}

fn get_sized(cur: &mut &[u8], field: &str) -> WireResult<Vec<u8>> {
    let len = get_u32(cur, field)? as usize;
    need(cur, len, field)?;
    let out = cur[..len].to_vec();
    cur.advance(len);
    Ok(out)
}

fn get_qos(cur: &mut &[u8]) -> WireResult<Qos> {
    need(cur, QOS_RECORD_LEN, "qos")?;
    let key_chunk_size = cur.get_u32();
    let max_bps = cur.get_u32();
    let min_bps = cur.get_u32();
    let jitter = cur.get_u32();
    let priority = cur.get_u32();
    let timeout = cur.get_u32();
    let ttl = cur.get_u32();

    let field = &cur[..MIMETYPE_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(MIMETYPE_LEN);
    let metadata_mimetype = std::str::from_utf8(&field[..end])
        .map_err(|_| WireError::Malformed("mimetype is not UTF-8".to_string()))?
        .to_string();
    cur.advance(MIMETYPE_LEN);

    Ok(Qos {
        key_chunk_size,
        max_bps,
        min_bps,
        jitter,
        priority,
        timeout,
        ttl,
        metadata_mimetype,
    })
}

fn finish(cur: &[u8]) -> WireResult<()> {
    if !cur.is_empty() {
        return Err(WireError::Malformed(format!(
            "{} trailing bytes",
            cur.len()
        )));
    }
    Ok(())
}
