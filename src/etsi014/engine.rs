//! ETSI 014 entry points.
//!
//! [`RetrievalEngine`] rejects missing parameters with `BadRequest` before
//! any backend is consulted. With no backend registered every call fails
//! with `ServerError`.

use std::sync::Arc;

use super::{KeyContainer, KeyRequest, RetrievalBackend, StatusInfo};
use crate::config::Credentials;
use crate::error::{RetrievalError, RetrievalResult};
use crate::registry::BackendRegistry;

/// Application-facing ETSI 014 API.
#[derive(Debug, Default)]
pub struct RetrievalEngine {
    registry: BackendRegistry<dyn RetrievalBackend>,
}

fn require(value: &str, what: &str) -> RetrievalResult<()> {
    if value.trim().is_empty() {
        return Err(RetrievalError::BadRequest(format!("{} is missing", what)));
    }
    Ok(())
}

impl RetrievalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn RetrievalBackend>) -> Self {
        Self {
            registry: BackendRegistry::with_backend(backend),
        }
    }

    pub fn registry(&self) -> &BackendRegistry<dyn RetrievalBackend> {
        &self.registry
    }

    /// Make `backend` active, returning the one it replaced.
    pub fn register(
        &self,
        backend: Arc<dyn RetrievalBackend>,
    ) -> Option<Arc<dyn RetrievalBackend>> {
        tracing::info!(
            backend = backend.name(),
            policy = ?backend.redemption_policy(),
            "retrieval backend registered"
        );
        self.registry.register(backend)
    }

    fn backend(&self) -> RetrievalResult<Arc<dyn RetrievalBackend>> {
        self.registry.active().ok_or(RetrievalError::NoBackend)
    }

    /// GET_STATUS for the link to `slave_sae_id`.
    pub async fn get_status(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        slave_sae_id: &str,
    ) -> RetrievalResult<StatusInfo> {
        require(endpoint, "endpoint")?;
        require(slave_sae_id, "slave SAE ID")?;
        let backend = self.backend()?;

        let result = backend.get_status(endpoint, credentials, slave_sae_id).await;
        log_result("get_status", backend.name(), &result);
        result
    }

    /// GET_KEY: issue new keys shared with `slave_sae_id`.
    pub async fn get_key(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        slave_sae_id: &str,
        request: &KeyRequest,
    ) -> RetrievalResult<KeyContainer> {
        require(endpoint, "endpoint")?;
        require(slave_sae_id, "slave SAE ID")?;
        if request.number == Some(0) {
            return Err(RetrievalError::BadRequest("number must be positive".to_string()));
        }
        if let Some(bits) = request.size {
            if bits == 0 || bits % 8 != 0 {
                return Err(RetrievalError::BadRequest(format!(
                    "size {} is not a positive multiple of 8",
                    bits
                )));
            }
        }
        let backend = self.backend()?;

        let result = backend
            .get_key(endpoint, credentials, slave_sae_id, request)
            .await;
        log_result("get_key", backend.name(), &result);
        result
    }

    /// GET_KEY_WITH_IDS: redeem keys issued by `master_sae_id`'s KME.
    pub async fn get_key_with_ids(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        master_sae_id: &str,
        key_ids: &[String],
    ) -> RetrievalResult<KeyContainer> {
        require(endpoint, "endpoint")?;
        require(master_sae_id, "master SAE ID")?;
        if key_ids.is_empty() {
            return Err(RetrievalError::BadRequest("no key IDs given".to_string()));
        }
        if key_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(RetrievalError::BadRequest("empty key ID".to_string()));
        }
        let backend = self.backend()?;

        let result = backend
            .get_key_with_ids(endpoint, credentials, master_sae_id, key_ids)
            .await;
        log_result("get_key_with_ids", backend.name(), &result);
        result
    }
}

fn log_result<T>(operation: &str, backend: &str, result: &RetrievalResult<T>) {
    if let Err(e) = result {
        tracing::debug!(operation, backend, status = %e.status(), error = %e, "retrieval failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etsi014::{RedemptionPolicy, RetrievalStatus, SimulatedRetrievalBackend};

    const EP: &str = "https://kme.local";

    fn engine() -> RetrievalEngine {
        RetrievalEngine::with_backend(Arc::new(SimulatedRetrievalBackend::new()))
    }

    #[tokio::test]
    async fn test_no_backend_is_server_error() {
        let engine = RetrievalEngine::new();
        let creds = Credentials::none();

        let err = engine.get_status(EP, &creds, "SAE_B").await.unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::ServerError);

        let err = engine
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::ServerError);

        let ids = vec!["id".to_string()];
        let err = engine
            .get_key_with_ids(EP, &creds, "SAE_A", &ids)
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::ServerError);
    }

    #[tokio::test]
    async fn test_missing_parameters_are_bad_requests() {
        let engine = RetrievalEngine::new();
        let creds = Credentials::none();

        // Checked before the missing backend is noticed.
        let err = engine.get_status("", &creds, "SAE_B").await.unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::BadRequest);

        let err = engine
            .get_key(EP, &creds, "", &KeyRequest::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::BadRequest);

        let err = engine
            .get_key_with_ids(EP, &creds, "SAE_A", &[])
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::BadRequest);

        let ids = vec![String::new()];
        let err = engine
            .get_key_with_ids(EP, &creds, "SAE_A", &ids)
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_invalid_request_shape() {
        let engine = engine();
        let creds = Credentials::none();

        for request in [KeyRequest::new().number(0), KeyRequest::new().size(12)] {
            let err = engine
                .get_key(EP, &creds, "SAE_B", &request)
                .await
                .unwrap_err();
            assert_eq!(err.status(), RetrievalStatus::BadRequest);
        }
    }

    #[tokio::test]
    async fn test_issue_then_redeem() {
        let engine = engine();
        let creds = Credentials::none();

        let issued = engine
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new().number(2).size(256))
            .await
            .unwrap();
        assert_eq!(issued.len(), 2);

        let id = issued.get(1).unwrap().key_id().to_string();
        let redeemed = engine
            .get_key_with_ids(EP, &creds, "SAE_A", &[id.clone()])
            .await
            .unwrap();
        assert_eq!(redeemed.len(), 1);
        assert_eq!(redeemed.get(0).unwrap().key(), issued.find(&id).unwrap().key());
    }

    #[tokio::test]
    async fn test_register_swaps_policy() {
        let engine = engine();
        let previous = engine.register(Arc::new(
            SimulatedRetrievalBackend::builder()
                .redemption_policy(RedemptionPolicy::SingleUse)
                .build(),
        ));
        assert_eq!(
            previous.unwrap().redemption_policy(),
            RedemptionPolicy::Repeatable
        );
        assert_eq!(
            engine.registry().active().unwrap().redemption_policy(),
            RedemptionPolicy::SingleUse
        );
    }
}
