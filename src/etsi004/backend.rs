//! Backend trait for ETSI 004 streams.

use super::{KeyChunk, Ksid, Metadata, OpenOutcome, Qos, Role};
use crate::error::StreamError;
use crate::registry::BoxFuture;

/// A swappable implementation of the ETSI 004 operations.
///
/// Every method has a default body that fails with
/// [`StreamError::Unsupported`], so a backend only implements what it can
/// actually serve.
pub trait StreamBackend: Send + Sync + 'static {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    fn open<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
        qos: &'a Qos,
        role: Role,
    ) -> BoxFuture<'a, Result<OpenOutcome, StreamError>> {
        let _ = (source, destination, qos, role);
        let backend = self.name();
        Box::pin(async move {
            Err(StreamError::Unsupported {
                backend,
                operation: "open",
            })
        })
    }

    fn get_key<'a>(
        &'a self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&'a mut Metadata>,
    ) -> BoxFuture<'a, Result<KeyChunk, StreamError>> {
        let _ = (ksid, index, metadata);
        let backend = self.name();
        Box::pin(async move {
            Err(StreamError::Unsupported {
                backend,
                operation: "get_key",
            })
        })
    }

    fn close(&self, ksid: Ksid) -> BoxFuture<'_, Result<(), StreamError>> {
        let _ = ksid;
        let backend = self.name();
        Box::pin(async move {
            Err(StreamError::Unsupported {
                backend,
                operation: "close",
            })
        })
    }

    /// Tear down a stream whose owner disconnected without closing it.
    ///
    /// Defaults to [`close`](Self::close).
    fn abandon(&self, ksid: Ksid) -> BoxFuture<'_, Result<(), StreamError>> {
        self.close(ksid)
    }
}
