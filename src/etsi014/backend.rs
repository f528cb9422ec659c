//! Backend trait for ETSI 014 key retrieval.

use super::{KeyContainer, KeyRequest, RedemptionPolicy, StatusInfo};
use crate::config::Credentials;
use crate::error::RetrievalError;
use crate::registry::BoxFuture;

fn unsupported<'a, T: Send + 'a>(
    backend: &'static str,
    operation: &'static str,
) -> BoxFuture<'a, Result<T, RetrievalError>> {
    Box::pin(async move { Err(RetrievalError::Unsupported { backend, operation }) })
}

/// A swappable implementation of the ETSI 014 operations.
///
/// Operations default to failing with [`RetrievalError::Unsupported`].
pub trait RetrievalBackend: Send + Sync + 'static {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    /// What happens when a delivered key is fetched by ID again.
    fn redemption_policy(&self) -> RedemptionPolicy;

    /// Status of the link between the caller's KME and `slave_sae_id`.
    fn get_status<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        slave_sae_id: &'a str,
    ) -> BoxFuture<'a, Result<StatusInfo, RetrievalError>> {
        let _ = (endpoint, credentials, slave_sae_id);
        unsupported(self.name(), "get_status")
    }

    /// Issue new keys shared with `slave_sae_id`.
    fn get_key<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        slave_sae_id: &'a str,
        request: &'a KeyRequest,
    ) -> BoxFuture<'a, Result<KeyContainer, RetrievalError>> {
        let _ = (endpoint, credentials, slave_sae_id, request);
        unsupported(self.name(), "get_key")
    }

    /// Redeem keys previously issued to `master_sae_id`.
    fn get_key_with_ids<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        master_sae_id: &'a str,
        key_ids: &'a [String],
    ) -> BoxFuture<'a, Result<KeyContainer, RetrievalError>> {
        let _ = (endpoint, credentials, master_sae_id, key_ids);
        unsupported(self.name(), "get_key_with_ids")
    }
}
