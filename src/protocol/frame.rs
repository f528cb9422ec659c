//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use qkd_etsi_api::protocol::{Frame, ServiceType};
//! use bytes::Bytes;
//!
//! let frame = Frame::with_payload(ServiceType::CloseResponse, Bytes::from_static(&[0, 0, 0, 0]));
//!
//! assert_eq!(frame.service_type().unwrap(), ServiceType::CloseResponse);
//! assert_eq!(frame.payload_len(), 4);
//! ```

use bytes::Bytes;

use super::wire_format::{Header, ServiceType, HEADER_SIZE};
use crate::error::{WireError, WireResult};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame whose header length matches the payload.
    pub fn with_payload(service_type: ServiceType, payload: Bytes) -> Self {
        let header = Header::new(service_type, payload.len() as u32);
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the typed service type.
    #[inline]
    pub fn service_type(&self) -> WireResult<ServiceType> {
        self.header.kind()
    }

    /// Fail unless this frame carries `expected`.
    pub fn expect(&self, expected: ServiceType) -> WireResult<()> {
        if self.header.service_type != expected.as_i8() {
            return Err(WireError::UnexpectedServiceType {
                expected: expected.as_i8(),
                actual: self.header.service_type,
            });
        }
        Ok(())
    }

    /// Encode the whole frame into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_frame(&self.header, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
///
/// # Example
///
/// ```
/// use qkd_etsi_api::protocol::{build_frame, Header, ServiceType};
///
/// let header = Header::new(ServiceType::CloseResponse, 4);
/// let bytes = build_frame(&header, &[0, 0, 0, 0]);
/// assert_eq!(bytes.len(), 8 + 4);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
