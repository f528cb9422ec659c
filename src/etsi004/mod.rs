//! ETSI GS QKD 004: stateful key streams.
//!
//! An application opens a stream towards a peer SAE, pulls fixed-size key
//! chunks by index, and closes the stream. Streams are identified by a
//! 128-bit [`Ksid`]. The initiator mints it; the responder joins with it.
//!
//! [`StreamEngine`] is the entry point. It validates parameters and forwards
//! each call to the [`StreamBackend`] held in its registry.

use std::fmt;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{StreamError, StreamResult};

pub mod backend;
pub mod engine;
pub mod hardware;
pub mod server;
pub mod simulated;
pub mod socket;
pub mod table;

pub use backend::StreamBackend;
pub use engine::StreamEngine;
pub use hardware::HardwareStreamBackend;
pub use server::StreamServer;
pub use simulated::{SimulatedStreamBackend, SimulatedStreamBuilder};
pub use socket::SocketStreamBackend;
pub use table::{StreamSlot, StreamTable};

/// Width of the fixed mimetype field in the QoS record.
pub const MIMETYPE_LEN: usize = 256;

/// Key stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ksid([u8; 16]);

impl Ksid {
    /// The all-zero KSID. On the wire it asks the peer to mint a new one.
    pub const NIL: Ksid = Ksid([0u8; 16]);

    /// A fresh, unpredictable KSID (random UUIDv4).
    pub fn generate() -> Self {
        Ksid(*uuid::Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Ksid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for Ksid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&uuid::Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl fmt::Debug for Ksid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ksid({})", self)
    }
}

impl std::str::FromStr for Ksid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Ksid(*uuid::Uuid::parse_str(s)?.as_bytes()))
    }
}

/// Which side of the stream a caller is opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Start a new stream; a KSID is minted for it.
    Initiator,
    /// Join the stream the initiator announced under this KSID.
    Responder(Ksid),
}

impl Role {
    /// Interpret a KSID as carried on the wire: all-zero means initiator.
    pub fn from_wire(ksid: Ksid) -> Self {
        if ksid.is_nil() {
            Role::Initiator
        } else {
            Role::Responder(ksid)
        }
    }

    /// KSID to put on the wire for this role.
    pub fn wire_ksid(&self) -> Ksid {
        match self {
            Role::Initiator => Ksid::NIL,
            Role::Responder(ksid) => *ksid,
        }
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Initiator)
    }
}

/// Quality of service negotiated for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qos {
    /// Length of each key chunk in bytes.
    pub key_chunk_size: u32,
    /// Maximum key rate in bits per second.
    pub max_bps: u32,
    /// Minimum key rate in bits per second.
    pub min_bps: u32,
    /// Maximum deviation for key delivery.
    pub jitter: u32,
    pub priority: u32,
    /// Transport deadline in milliseconds. Zero means no deadline.
    pub timeout: u32,
    /// Lease in seconds that delays teardown after close.
    pub ttl: u32,
    /// Format of the metadata returned with each key.
    pub metadata_mimetype: String,
}

impl Default for Qos {
    fn default() -> Self {
        Self {
            key_chunk_size: 32,
            max_bps: 1000,
            min_bps: 100,
            jitter: 0,
            priority: 0,
            timeout: 5000,
            ttl: 60,
            metadata_mimetype: "application/json".to_string(),
        }
    }
}

impl Qos {
    /// Reject QoS values no backend can honour.
    pub fn validate(&self) -> StreamResult<()> {
        if self.min_bps > self.max_bps {
            return Err(StreamError::QosNotMet(format!(
                "min_bps {} exceeds max_bps {}",
                self.min_bps, self.max_bps
            )));
        }
        if self.key_chunk_size == 0 {
            return Err(StreamError::QosNotMet("key_chunk_size is zero".to_string()));
        }
        if self.max_bps == 0 {
            return Err(StreamError::QosNotMet("max_bps is zero".to_string()));
        }
        if self.metadata_mimetype.len() > MIMETYPE_LEN {
            return Err(StreamError::QosNotMet(format!(
                "metadata mimetype longer than {} bytes",
                MIMETYPE_LEN
            )));
        }
        Ok(())
    }

    /// Transport deadline, or `None` when the timeout is zero.
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(u64::from(self.timeout)))
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl))
    }
}

/// Status codes of the ETSI 004 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StreamStatus {
    Success = 0,
    PeerDisconnected = 1,
    InsufficientKey = 2,
    PeerNotConnected = 3,
    NoConnection = 4,
    KsidInUse = 5,
    Timeout = 6,
    QosNotMet = 7,
    MetadataSizeError = 8,
}

impl StreamStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => StreamStatus::Success,
            1 => StreamStatus::PeerDisconnected,
            2 => StreamStatus::InsufficientKey,
            3 => StreamStatus::PeerNotConnected,
            4 => StreamStatus::NoConnection,
            5 => StreamStatus::KsidInUse,
            6 => StreamStatus::Timeout,
            7 => StreamStatus::QosNotMet,
            8 => StreamStatus::MetadataSizeError,
            _ => return None,
        })
    }

    /// Statuses that report a usable stream after OPEN_CONNECT.
    pub fn is_open(self) -> bool {
        matches!(self, StreamStatus::Success | StreamStatus::PeerDisconnected)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Result of a successful OPEN_CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOutcome {
    /// `Success` when both ends are bound, `PeerDisconnected` while the
    /// initiator still waits for its responder.
    pub status: StreamStatus,
    pub ksid: Ksid,
    /// QoS agreed for the stream. May differ from the requested values.
    pub qos: Qos,
}

/// Caller-owned metadata buffer with a fixed capacity.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    capacity: u32,
    data: Vec<u8>,
}

impl Metadata {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            data: Vec::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes written by the last successful delivery.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the contents. Leaves the buffer untouched if `bytes` does not fit.
    pub fn fill(&mut self, bytes: &[u8]) -> StreamResult<()> {
        let required = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        if required > self.capacity {
            return Err(StreamError::MetadataSize {
                required,
                capacity: self.capacity,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        Ok(())
    }
}

/// One delivered key chunk. The key bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyChunk {
    #[zeroize(skip)]
    index: u32,
    key: Vec<u8>,
}

impl KeyChunk {
    pub fn new(index: u32, key: Vec<u8>) -> Self {
        Self { index, key }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Debug for KeyChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChunk")
            .field("index", &self.index)
            .field("len", &self.key.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ksid_generate_is_unique_and_non_nil() {
        let a = Ksid::generate();
        let b = Ksid::generate();
        assert!(!a.is_nil());
        assert_ne!(a, b);
    }

    #[test]
    fn test_ksid_display_parse_roundtrip() {
        let ksid = Ksid::from_bytes([0xAB; 16]);
        let text = ksid.to_string();
        assert_eq!(text, "abababab-abab-abab-abab-abababababab");
        assert_eq!(text.parse::<Ksid>().unwrap(), ksid);
    }

    #[test]
    fn test_role_from_wire() {
        assert_eq!(Role::from_wire(Ksid::NIL), Role::Initiator);
        let ksid = Ksid::from_bytes([1; 16]);
        assert_eq!(Role::from_wire(ksid), Role::Responder(ksid));
        assert_eq!(Role::Responder(ksid).wire_ksid(), ksid);
        assert!(Role::Initiator.wire_ksid().is_nil());
    }

    #[test]
    fn test_qos_validate() {
        assert!(Qos::default().validate().is_ok());

        let inverted = Qos {
            min_bps: 2000,
            max_bps: 1000,
            ..Qos::default()
        };
        assert_eq!(
            inverted.validate().unwrap_err().status(),
            StreamStatus::QosNotMet
        );

        let zero_chunk = Qos {
            key_chunk_size: 0,
            ..Qos::default()
        };
        assert!(zero_chunk.validate().is_err());

        let long_mime = Qos {
            metadata_mimetype: "x".repeat(MIMETYPE_LEN + 1),
            ..Qos::default()
        };
        assert!(long_mime.validate().is_err());
    }

    #[test]
    fn test_qos_timeout_zero_means_none() {
        let qos = Qos {
            timeout: 0,
            ..Qos::default()
        };
        assert!(qos.timeout_duration().is_none());
        assert_eq!(
            Qos::default().timeout_duration(),
            Some(Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_status_codes_are_stable() {
        for code in 0..=8 {
            assert_eq!(StreamStatus::from_code(code).unwrap().code(), code);
        }
        assert!(StreamStatus::from_code(9).is_none());
        assert!(StreamStatus::PeerDisconnected.is_open());
        assert!(!StreamStatus::KsidInUse.is_open());
    }

    #[test]
    fn test_metadata_fill_respects_capacity() {
        let mut md = Metadata::with_capacity(4);
        let err = md.fill(b"too long").unwrap_err();
        assert!(matches!(
            err,
            StreamError::MetadataSize {
                required: 8,
                capacity: 4
            }
        ));
        assert!(md.is_empty());

        md.fill(b"ok").unwrap();
        assert_eq!(md.as_bytes(), b"ok");
    }

    #[test]
    fn test_key_chunk_debug_hides_key() {
        let chunk = KeyChunk::new(3, vec![0x42; 32]);
        let debug = format!("{:?}", chunk);
        assert!(debug.contains("len: 32"));
        assert!(!debug.contains("66"));
    }
}
