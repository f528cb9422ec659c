//! ETSI 004 entry points.
//!
//! [`StreamEngine`] checks parameters, then forwards to the active backend.
//! Parameter errors are reported before a missing backend is noticed. With
//! no backend registered every other call fails with `NoConnection`.

use std::sync::Arc;

use super::{KeyChunk, Ksid, Metadata, OpenOutcome, Qos, Role, StreamBackend};
use crate::error::{StreamError, StreamResult};
use crate::registry::BackendRegistry;

/// Application-facing ETSI 004 API.
#[derive(Debug, Default)]
pub struct StreamEngine {
    registry: BackendRegistry<dyn StreamBackend>,
}

impl StreamEngine {
    /// Engine with no backend. Every call fails until one is registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn StreamBackend>) -> Self {
        Self {
            registry: BackendRegistry::with_backend(backend),
        }
    }

    pub fn registry(&self) -> &BackendRegistry<dyn StreamBackend> {
        &self.registry
    }

    /// Make `backend` active, returning the one it replaced.
    pub fn register(&self, backend: Arc<dyn StreamBackend>) -> Option<Arc<dyn StreamBackend>> {
        tracing::info!(backend = backend.name(), "stream backend registered");
        self.registry.register(backend)
    }

    fn backend(&self) -> StreamResult<Arc<dyn StreamBackend>> {
        self.registry
            .active()
            .ok_or_else(|| StreamError::NoConnection("no stream backend registered".to_string()))
    }

    /// OPEN_CONNECT.
    ///
    /// As initiator the returned status is `PeerDisconnected` until a
    /// responder joins; the minted KSID is in the outcome.
    pub async fn open(
        &self,
        source: &str,
        destination: &str,
        qos: &Qos,
        role: Role,
    ) -> StreamResult<OpenOutcome> {
        if source.is_empty() {
            return Err(StreamError::NoConnection("source is empty".to_string()));
        }
        if destination.is_empty() {
            return Err(StreamError::NoConnection("destination is empty".to_string()));
        }
        qos.validate()?;
        let backend = self.backend()?;

        let result = backend.open(source, destination, qos, role).await;
        if let Err(e) = &result {
            tracing::debug!(
                backend = backend.name(),
                status = %e.status(),
                error = %e,
                "open failed"
            );
        }
        result
    }

    /// GET_KEY for chunk `index` of stream `ksid`.
    ///
    /// When `metadata` is given it receives the delivery metadata; if it is
    /// too small the call fails and the buffer is left untouched.
    pub async fn get_key(
        &self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&mut Metadata>,
    ) -> StreamResult<KeyChunk> {
        let backend = self.backend()?;
        backend.get_key(ksid, index, metadata).await
    }

    /// CLOSE. Before the stream's TTL has run out the stream stays
    /// servable; the slot is freed by a close after the TTL.
    pub async fn close(&self, ksid: Ksid) -> StreamResult<()> {
        let backend = self.backend()?;
        let result = backend.close(ksid).await;
        if let Err(e) = &result {
            tracing::debug!(ksid = %ksid, status = %e.status(), "close failed");
        }
        result
    }
}
