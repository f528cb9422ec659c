//! Wire format encoding and decoding.
//!
//! Implements the 8-byte ETSI 004 socket header:
//! ```text
//! ┌──────────┬──────────────┬──────────────┐
//! │ Version  │ Service type │ Payload len  │
//! │ 3 bytes  │ 1 byte       │ 4 bytes      │
//! │ 1.0.1    │ int8         │ uint32 BE    │
//! └──────────┴──────────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{WireError, WireResult};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: [u8; 3] = [1, 0, 1];

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Message kind carried in the header's service type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ServiceType {
    OpenConnectRequest = 0x02,
    OpenConnectResponse = 0x03,
    GetKeyRequest = 0x04,
    GetKeyResponse = 0x05,
    CloseRequest = 0x08,
    CloseResponse = 0x09,
}

impl ServiceType {
    /// Raw wire value.
    #[inline]
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Response type that answers this request, if it is a request.
    pub fn response(self) -> Option<ServiceType> {
        match self {
            ServiceType::OpenConnectRequest => Some(ServiceType::OpenConnectResponse),
            ServiceType::GetKeyRequest => Some(ServiceType::GetKeyResponse),
            ServiceType::CloseRequest => Some(ServiceType::CloseResponse),
            _ => None,
        }
    }
}

impl TryFrom<i8> for ServiceType {
    type Error = WireError;

    fn try_from(value: i8) -> WireResult<Self> {
        match value {
            0x02 => Ok(ServiceType::OpenConnectRequest),
            0x03 => Ok(ServiceType::OpenConnectResponse),
            0x04 => Ok(ServiceType::GetKeyRequest),
            0x05 => Ok(ServiceType::GetKeyResponse),
            0x08 => Ok(ServiceType::CloseRequest),
            0x09 => Ok(ServiceType::CloseResponse),
            other => Err(WireError::UnknownServiceType(other)),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version bytes.
    pub version: [u8; 3],
    /// Raw service type. Kept raw so unknown values can be reported.
    pub service_type: i8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a header for the current protocol version.
    pub fn new(service_type: ServiceType, payload_length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service_type: service_type.as_i8(),
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use qkd_etsi_api::protocol::{Header, ServiceType};
    ///
    /// let header = Header::new(ServiceType::CloseRequest, 16);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [1, 0, 1, 0x08, 0, 0, 0, 16]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..3].copy_from_slice(&self.version);
        buf[3] = self.service_type.to_be_bytes()[0];
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: [buf[0], buf[1], buf[2]],
            service_type: i8::from_be_bytes([buf[3]]),
            payload_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Typed service type, or `UnknownServiceType`.
    pub fn kind(&self) -> WireResult<ServiceType> {
        ServiceType::try_from(self.service_type)
    }

    /// Validate the header before reading its payload.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Service type is known
    ///
    /// The version is not checked; peers on other patch levels are accepted.
    pub fn validate(&self, max_payload_size: u32) -> WireResult<ServiceType> {
        if self.payload_length > max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: self.payload_length,
                max: max_payload_size,
            });
        }
        self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(ServiceType::GetKeyResponse, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(decoded.kind().unwrap(), ServiceType::GetKeyResponse);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(ServiceType::OpenConnectRequest, 0x0102_0304);
        let bytes = header.encode();

        assert_eq!(&bytes[0..3], &[1, 0, 1]);
        assert_eq!(bytes[3], 0x02);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        assert_eq!(Header::new(ServiceType::CloseResponse, 4).encode().len(), 8);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_service_type_values() {
        assert_eq!(ServiceType::OpenConnectRequest.as_i8(), 0x02);
        assert_eq!(ServiceType::OpenConnectResponse.as_i8(), 0x03);
        assert_eq!(ServiceType::GetKeyRequest.as_i8(), 0x04);
        assert_eq!(ServiceType::GetKeyResponse.as_i8(), 0x05);
        assert_eq!(ServiceType::CloseRequest.as_i8(), 0x08);
        assert_eq!(ServiceType::CloseResponse.as_i8(), 0x09);
    }

    #[test]
    fn test_service_type_response_pairs() {
        assert_eq!(
            ServiceType::GetKeyRequest.response(),
            Some(ServiceType::GetKeyResponse)
        );
        assert_eq!(ServiceType::CloseResponse.response(), None);
    }

    #[test]
    fn test_validate_unknown_service_type() {
        let bytes = [1, 0, 1, 0x07, 0, 0, 0, 0];
        let header = Header::decode(&bytes).unwrap();
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(matches!(err, WireError::UnknownServiceType(0x07)));
    }

    #[test]
    fn test_validate_negative_service_type() {
        let bytes = [1, 0, 1, 0xFF, 0, 0, 0, 0];
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.service_type, -1);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(ServiceType::GetKeyResponse, 1_000_000);
        let err = header.validate(100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_accepts_other_version() {
        let bytes = [1, 0, 2, 0x09, 0, 0, 0, 4];
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(
            header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap(),
            ServiceType::CloseResponse
        );
    }
}
