//! Error types for qkd-etsi-api.
//!
//! Each protocol family has its own error enum. Both expose a `status()`
//! accessor that collapses the variant onto the fixed numeric status code
//! that the ETSI API surface reports.

use thiserror::Error;

use crate::etsi004::{Ksid, StreamStatus};
use crate::etsi014::RetrievalStatus;

/// Errors raised by the binary frame codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the connection before a full header arrived.
    #[error("Incomplete header received: got {received} of {expected} bytes")]
    IncompleteHeader { received: usize, expected: usize },

    /// The peer closed the connection before the full payload arrived.
    #[error("Incomplete payload received: got {received} of {expected} bytes")]
    IncompletePayload { received: usize, expected: usize },

    /// Declared payload length exceeds the configured maximum.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    /// Service type byte does not name a known message.
    #[error("Unknown service type: {0:#04x}")]
    UnknownServiceType(i8),

    /// A frame carried a different message than the one expected.
    #[error("Unexpected service type: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedServiceType { expected: i8, actual: i8 },

    /// Payload bytes do not match the message layout.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using WireError.
pub type WireResult<T> = std::result::Result<T, WireError>;

/// Errors returned by the ETSI 004 stream API.
#[derive(Debug, Error)]
pub enum StreamError {
    /// GET_KEY or CLOSE on a KSID with no live stream.
    #[error("No live stream for KSID {0}")]
    PeerNotConnected(Ksid),

    /// Requested index lies beyond what the stream has produced so far.
    #[error("Insufficient key: index {index} not below horizon {horizon}")]
    InsufficientKey { index: u32, horizon: u64 },

    /// No backend, no free stream slot, bad parameters or a broken transport.
    #[error("No QKD connection available: {0}")]
    NoConnection(String),

    /// OPEN_CONNECT on a KSID that is already bound to a stream.
    #[error("KSID {0} is already in use")]
    KsidInUse(Ksid),

    /// A transport call exceeded its deadline.
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Requested QoS cannot be satisfied.
    #[error("QoS not met: {0}")]
    QosNotMet(String),

    /// Caller's metadata buffer is too small; nothing was written.
    #[error("Metadata buffer too small: {required} bytes required, {capacity} available")]
    MetadataSize { required: u32, capacity: u32 },

    /// The remote peer answered with a status code this client does not know.
    #[error("Peer returned unknown status {0}")]
    UnknownStatus(u32),

    /// Frame codec or socket failure.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// The active backend does not implement this operation.
    #[error("Operation {operation} not supported by backend {backend}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl StreamError {
    /// Status code reported for this error on the ETSI 004 surface.
    pub fn status(&self) -> StreamStatus {
        match self {
            StreamError::PeerNotConnected(_) => StreamStatus::PeerNotConnected,
            StreamError::InsufficientKey { .. } => StreamStatus::InsufficientKey,
            StreamError::NoConnection(_) => StreamStatus::NoConnection,
            StreamError::KsidInUse(_) => StreamStatus::KsidInUse,
            StreamError::Timeout(_) => StreamStatus::Timeout,
            StreamError::QosNotMet(_) => StreamStatus::QosNotMet,
            StreamError::MetadataSize { .. } => StreamStatus::MetadataSizeError,
            StreamError::UnknownStatus(_) => StreamStatus::NoConnection,
            StreamError::Wire(_) => StreamStatus::NoConnection,
            StreamError::Unsupported { .. } => StreamStatus::NoConnection,
        }
    }

    /// Build the error matching a non-success status received from a peer.
    ///
    /// Sizes are not carried on the wire, so `MetadataSize` comes back as
    /// `0/0`; callers that know the offered capacity fill it in themselves.
    pub(crate) fn from_peer_status(status: StreamStatus, ksid: Ksid) -> Self {
        match status {
            StreamStatus::InsufficientKey => StreamError::InsufficientKey {
                index: 0,
                horizon: 0,
            },
            StreamStatus::PeerNotConnected => StreamError::PeerNotConnected(ksid),
            StreamStatus::KsidInUse => StreamError::KsidInUse(ksid),
            StreamStatus::Timeout => StreamError::Timeout(0),
            StreamStatus::QosNotMet => StreamError::QosNotMet("rejected by peer".to_string()),
            StreamStatus::MetadataSizeError => StreamError::MetadataSize {
                required: 0,
                capacity: 0,
            },
            StreamStatus::Success | StreamStatus::PeerDisconnected | StreamStatus::NoConnection => {
                StreamError::NoConnection(format!("peer reported status {}", status.code()))
            }
        }
    }
}

/// Result type alias using StreamError.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Errors returned by the ETSI 014 retrieval API.
///
/// The variants keep the backend-internal cause for logging, but
/// [`RetrievalError::status`] deliberately collapses them onto the four
/// status codes of the REST surface.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Missing or invalid request parameter.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The caller's SAE identity is not allowed by the KME.
    #[error("Unauthorized SAE: {0}")]
    Unauthorized(String),

    /// The KME answered with a non-success HTTP status.
    #[error("KME returned HTTP {status}")]
    Http { status: u16 },

    /// Connection, TLS or timeout failure talking to the KME.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not match the ETSI 014 schema.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// No key with this identifier is held by the KME.
    #[error("Unknown key ID: {0}")]
    UnknownKey(String),

    /// A single-use key was already handed out.
    #[error("Key ID {0} was already redeemed")]
    AlreadyRedeemed(String),

    /// Key store has no room for more keys.
    #[error("Key store full ({0} keys)")]
    StoreFull(usize),

    /// No backend is registered.
    #[error("No REST backend available")]
    NoBackend,

    /// Local file access for credentials failed.
    #[error("Credential I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The active backend does not implement this operation.
    #[error("Operation {operation} not supported by backend {backend}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl RetrievalError {
    /// Status code reported for this error on the ETSI 014 surface.
    pub fn status(&self) -> RetrievalStatus {
        match self {
            RetrievalError::Unauthorized(_) => RetrievalStatus::Unauthorized,
            RetrievalError::Http { status } if *status >= 500 => RetrievalStatus::ServerError,
            RetrievalError::Http { .. } => RetrievalStatus::BadRequest,
            RetrievalError::BadRequest(_)
            | RetrievalError::Malformed(_)
            | RetrievalError::UnknownKey(_)
            | RetrievalError::AlreadyRedeemed(_)
            | RetrievalError::Io(_) => RetrievalStatus::BadRequest,
            RetrievalError::Transport(_)
            | RetrievalError::StoreFull(_)
            | RetrievalError::NoBackend
            | RetrievalError::Unsupported { .. } => RetrievalStatus::ServerError,
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RetrievalError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            RetrievalError::Http {
                status: status.as_u16(),
            }
        } else {
            RetrievalError::Transport(err.to_string())
        }
    }
}

/// Result type alias using RetrievalError.
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_status_codes() {
        let ksid = Ksid::from_bytes([7; 16]);
        assert_eq!(StreamError::PeerNotConnected(ksid).status().code(), 3);
        assert_eq!(
            StreamError::InsufficientKey {
                index: 5,
                horizon: 1
            }
            .status()
            .code(),
            2
        );
        assert_eq!(StreamError::KsidInUse(ksid).status().code(), 5);
        assert_eq!(StreamError::Timeout(10).status().code(), 6);
        assert_eq!(StreamError::QosNotMet("x".into()).status().code(), 7);
        assert_eq!(
            StreamError::MetadataSize {
                required: 40,
                capacity: 8
            }
            .status()
            .code(),
            8
        );
        assert_eq!(StreamError::NoConnection("x".into()).status().code(), 4);
    }

    #[test]
    fn test_wire_error_maps_to_no_connection() {
        let err = StreamError::from(WireError::IncompleteHeader {
            received: 3,
            expected: 8,
        });
        assert_eq!(err.status(), StreamStatus::NoConnection);
        assert!(err.to_string().contains("Incomplete header"));
    }

    #[test]
    fn test_retrieval_status_is_coarse() {
        assert_eq!(
            RetrievalError::Http { status: 401 }.status(),
            RetrievalStatus::BadRequest
        );
        assert_eq!(
            RetrievalError::Http { status: 404 }.status(),
            RetrievalStatus::BadRequest
        );
        assert_eq!(
            RetrievalError::Http { status: 500 }.status(),
            RetrievalStatus::ServerError
        );
        assert_eq!(
            RetrievalError::Transport("refused".into()).status(),
            RetrievalStatus::ServerError
        );
        assert_eq!(
            RetrievalError::Malformed("eof".into()).status(),
            RetrievalStatus::BadRequest
        );
        assert_eq!(
            RetrievalError::UnknownKey("k".into()).status(),
            RetrievalStatus::BadRequest
        );
        assert_eq!(RetrievalError::NoBackend.status(), RetrievalStatus::ServerError);
        assert_eq!(
            RetrievalError::Unauthorized("sae".into()).status(),
            RetrievalStatus::Unauthorized
        );
    }

    #[test]
    fn test_peer_status_roundtrip() {
        let ksid = Ksid::from_bytes([1; 16]);
        for status in [
            StreamStatus::InsufficientKey,
            StreamStatus::PeerNotConnected,
            StreamStatus::KsidInUse,
            StreamStatus::Timeout,
            StreamStatus::QosNotMet,
            StreamStatus::MetadataSizeError,
        ] {
            assert_eq!(StreamError::from_peer_status(status, ksid).status(), status);
        }
    }
}
