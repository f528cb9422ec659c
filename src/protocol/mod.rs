//! Protocol module - wire format, framing, and message payloads.
//!
//! This module implements the binary protocol spoken between an ETSI 004
//! client and a QKD node over a socket:
//! - 8-byte header encoding/decoding
//! - Frame struct with typed accessors
//! - Typed request/response payloads
//! - Exact-length async frame reader and writer

mod frame;
mod io;
mod messages;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use io::{read_frame, read_frame_opt, write_frame};
pub use messages::{
    CloseRequest, CloseResponse, GetKeyRequest, GetKeyResponse, Message, OpenConnectRequest,
    OpenConnectResponse, KSID_LEN, QOS_RECORD_LEN,
};
pub use wire_format::{
    Header, ServiceType, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, PROTOCOL_VERSION,
};
