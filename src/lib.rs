//! # qkd-etsi-api
//!
//! Client-side access to quantum key distribution (QKD) key material
//! through the two ETSI interfaces:
//!
//! - **ETSI GS QKD 004** ([`etsi004`]): stream-oriented. A pair of
//!   applications opens a stream identified by a KSID and pulls key
//!   chunks by index at a rate bounded by the negotiated QoS.
//! - **ETSI GS QKD 014** ([`etsi014`]): REST-style. A master SAE asks its
//!   KME for keys, the slave SAE redeems them by key ID.
//!
//! Each interface routes through a swappable backend held by its engine:
//! an in-process simulator, or a remote transport (TCP frames for 004,
//! HTTPS for 014).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use qkd_etsi_api::etsi004::{Qos, Role, SimulatedStreamBackend, StreamEngine};
//!
//! # async fn run() -> Result<(), qkd_etsi_api::StreamError> {
//! let engine = StreamEngine::with_backend(Arc::new(SimulatedStreamBackend::new()));
//! let qos = Qos::default();
//!
//! let opened = engine.open("app://alice", "app://bob", &qos, Role::Initiator).await?;
//! engine
//!     .open("app://bob", "app://alice", &qos, Role::Responder(opened.ksid))
//!     .await?;
//!
//! let chunk = engine.get_key(opened.ksid, 0, None).await?;
//! assert_eq!(chunk.len(), 32);
//! engine.close(opened.ksid).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod etsi004;
pub mod etsi014;
pub mod protocol;
pub mod registry;

pub use config::{Credentials, HttpConfig, SaeRole, SocketConfig};
pub use error::{RetrievalError, StreamError, WireError};
pub use etsi004::StreamEngine;
pub use etsi014::RetrievalEngine;
