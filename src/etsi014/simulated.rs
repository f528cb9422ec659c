//! In-process simulated KME for ETSI 014.
//!
//! Issues random keys under fresh UUID key IDs and keeps them in a bounded
//! [`KeyStore`] so they can be redeemed by ID. Both SAEs of a test talk to
//! the same instance.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::RngCore;

use super::store::KeyStore;
use super::{KeyContainer, KeyRecord, KeyRequest, RedemptionPolicy, RetrievalBackend, StatusInfo};
use crate::config::Credentials;
use crate::error::{RetrievalError, RetrievalResult};
use crate::registry::BoxFuture;

/// Default key size in bits.
pub const DEFAULT_KEY_SIZE: u32 = 256;

/// Default number of keys held at once.
pub const DEFAULT_STORE_CAPACITY: usize = 1024;

/// Default batch limit.
pub const DEFAULT_MAX_KEY_PER_REQUEST: u32 = 128;

/// Builder for [`SimulatedRetrievalBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedRetrievalBuilder {
    source_kme_id: String,
    target_kme_id: String,
    master_sae_id: String,
    store_capacity: usize,
    default_key_size: u32,
    min_key_size: u32,
    max_key_size: u32,
    max_key_per_request: u32,
    policy: RedemptionPolicy,
    allowed_saes: Option<HashSet<String>>,
    latency: Duration,
}

impl SimulatedRetrievalBuilder {
    pub fn new() -> Self {
        Self {
            source_kme_id: "KME_SIM_A".to_string(),
            target_kme_id: "KME_SIM_B".to_string(),
            master_sae_id: "SAE_SIM_MASTER".to_string(),
            store_capacity: DEFAULT_STORE_CAPACITY,
            default_key_size: DEFAULT_KEY_SIZE,
            min_key_size: 64,
            max_key_size: 1024,
            max_key_per_request: DEFAULT_MAX_KEY_PER_REQUEST,
            policy: RedemptionPolicy::Repeatable,
            allowed_saes: None,
            latency: Duration::ZERO,
        }
    }

    /// KME identifiers reported by `get_status`.
    pub fn kme_ids(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_kme_id = source.into();
        self.target_kme_id = target.into();
        self
    }

    pub fn master_sae_id(mut self, sae_id: impl Into<String>) -> Self {
        self.master_sae_id = sae_id.into();
        self
    }

    /// Default: 1024
    pub fn store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = capacity;
        self
    }

    /// Key size in bits used when a request gives none.
    ///
    /// Default: 256
    pub fn default_key_size(mut self, bits: u32) -> Self {
        self.default_key_size = bits;
        self
    }

    /// Accepted key sizes in bits. Default: 64..=1024
    pub fn key_size_range(mut self, min_bits: u32, max_bits: u32) -> Self {
        self.min_key_size = min_bits;
        self.max_key_size = max_bits;
        self
    }

    /// Default: 128
    pub fn max_key_per_request(mut self, max: u32) -> Self {
        self.max_key_per_request = max;
        self
    }

    /// Default: [`RedemptionPolicy::Repeatable`]
    pub fn redemption_policy(mut self, policy: RedemptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Only these SAE IDs are served; others get `Unauthorized`.
    pub fn allow_sae(mut self, sae_id: impl Into<String>) -> Self {
        self.allowed_saes
            .get_or_insert_with(HashSet::new)
            .insert(sae_id.into());
        self
    }

    /// Artificial delay added to every call.
    ///
    /// Default: none
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn build(self) -> SimulatedRetrievalBackend {
        SimulatedRetrievalBackend {
            store: Mutex::new(KeyStore::new(self.store_capacity, self.policy)),
            settings: self,
        }
    }
}

impl Default for SimulatedRetrievalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated ETSI 014 backend.
#[derive(Debug)]
pub struct SimulatedRetrievalBackend {
    settings: SimulatedRetrievalBuilder,
    store: Mutex<KeyStore>,
}

impl SimulatedRetrievalBackend {
    pub fn new() -> Self {
        SimulatedRetrievalBuilder::new().build()
    }

    pub fn builder() -> SimulatedRetrievalBuilder {
        SimulatedRetrievalBuilder::new()
    }

    /// Number of keys currently held.
    pub fn stored_key_count(&self) -> usize {
        self.store().len()
    }

    fn store(&self) -> std::sync::MutexGuard<'_, KeyStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, sae_id: &str) -> RetrievalResult<()> {
        match &self.settings.allowed_saes {
            Some(allowed) if !allowed.contains(sae_id) => {
                tracing::warn!(sae_id, "SAE not on allow-list");
                Err(RetrievalError::Unauthorized(sae_id.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn delay(&self) {
        if !self.settings.latency.is_zero() {
            tokio::time::sleep(self.settings.latency).await;
        }
    }

    fn status(&self, slave_sae_id: &str) -> RetrievalResult<StatusInfo> {
        self.authorize(slave_sae_id)?;
        let s = &self.settings;
        let store = self.store();
        Ok(StatusInfo {
            source_kme_id: s.source_kme_id.clone(),
            target_kme_id: s.target_kme_id.clone(),
            master_sae_id: s.master_sae_id.clone(),
            slave_sae_id: slave_sae_id.to_string(),
            key_size: s.default_key_size,
            stored_key_count: u32::try_from(store.len()).unwrap_or(u32::MAX),
            max_key_count: u32::try_from(store.capacity()).unwrap_or(u32::MAX),
            max_key_per_request: s.max_key_per_request,
            max_key_size: s.max_key_size,
            min_key_size: s.min_key_size,
            max_sae_id_count: 0,
        })
    }

    fn issue(&self, slave_sae_id: &str, request: &KeyRequest) -> RetrievalResult<KeyContainer> {
        self.authorize(slave_sae_id)?;
        let s = &self.settings;

        let count = request.count();
        if count == 0 || count > s.max_key_per_request {
            return Err(RetrievalError::BadRequest(format!(
                "number {} outside 1..={}",
                count, s.max_key_per_request
            )));
        }
        let bits = request.size.unwrap_or(s.default_key_size);
        if bits == 0 || bits % 8 != 0 || bits < s.min_key_size || bits > s.max_key_size {
            return Err(RetrievalError::BadRequest(format!(
                "size {} is not a multiple of 8 in {}..={}",
                bits, s.min_key_size, s.max_key_size
            )));
        }
        if !request.additional_slave_sae_ids.is_empty() {
            return Err(RetrievalError::BadRequest(
                "additional slave SAE IDs are not supported".to_string(),
            ));
        }

        let records = generate_keys(count as usize, (bits / 8) as usize);
        self.store().insert_all(&records)?;
        tracing::debug!(slave_sae_id, count, bits, "keys issued");
        Ok(KeyContainer::new(records))
    }

    fn redeem(&self, master_sae_id: &str, key_ids: &[String]) -> RetrievalResult<KeyContainer> {
        self.authorize(master_sae_id)?;
        let records = self.store().redeem_all(key_ids)?;
        tracing::debug!(master_sae_id, count = records.len(), "keys redeemed");
        Ok(KeyContainer::new(records))
    }
}

impl Default for SimulatedRetrievalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_keys(count: usize, bytes: usize) -> Vec<KeyRecord> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut key = vec![0u8; bytes];
            rng.fill_bytes(&mut key);
            KeyRecord::new(uuid::Uuid::new_v4().to_string(), key)
        })
        .collect()
}

impl RetrievalBackend for SimulatedRetrievalBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn redemption_policy(&self) -> RedemptionPolicy {
        self.settings.policy
    }

    fn get_status<'a>(
        &'a self,
        _endpoint: &'a str,
        _credentials: &'a Credentials,
        slave_sae_id: &'a str,
    ) -> BoxFuture<'a, RetrievalResult<StatusInfo>> {
        Box::pin(async move {
            self.delay().await;
            self.status(slave_sae_id)
        })
    }

    fn get_key<'a>(
        &'a self,
        _endpoint: &'a str,
        _credentials: &'a Credentials,
        slave_sae_id: &'a str,
        request: &'a KeyRequest,
    ) -> BoxFuture<'a, RetrievalResult<KeyContainer>> {
        Box::pin(async move {
            self.delay().await;
            self.issue(slave_sae_id, request)
        })
    }

    fn get_key_with_ids<'a>(
        &'a self,
        _endpoint: &'a str,
        _credentials: &'a Credentials,
        master_sae_id: &'a str,
        key_ids: &'a [String],
    ) -> BoxFuture<'a, RetrievalResult<KeyContainer>> {
        Box::pin(async move {
            self.delay().await;
            self.redeem(master_sae_id, key_ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etsi014::RetrievalStatus;

    const EP: &str = "https://kme.local";

    #[tokio::test]
    async fn test_status_reflects_store() {
        let backend = SimulatedRetrievalBackend::new();
        let creds = Credentials::none();
        backend
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new().number(3))
            .await
            .unwrap();

        let status = backend.get_status(EP, &creds, "SAE_B").await.unwrap();
        assert_eq!(status.slave_sae_id, "SAE_B");
        assert_eq!(status.key_size, 256);
        assert_eq!(status.stored_key_count, 3);
        assert_eq!(status.max_key_count, 1024);
    }

    #[tokio::test]
    async fn test_issue_defaults_and_sizes() {
        let backend = SimulatedRetrievalBackend::new();
        let creds = Credentials::none();

        let one = backend
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new())
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one.get(0).unwrap().key().len(), 32);

        let big = backend
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new().size(512))
            .await
            .unwrap();
        assert_eq!(big.get(0).unwrap().bits(), 512);
    }

    #[tokio::test]
    async fn test_issue_rejects_bad_parameters() {
        let backend = SimulatedRetrievalBackend::builder()
            .max_key_per_request(4)
            .build();
        let creds = Credentials::none();

        for request in [
            KeyRequest::new().number(0),
            KeyRequest::new().number(5),
            KeyRequest::new().size(100),
            KeyRequest::new().size(8),
            KeyRequest::new().size(4096),
            KeyRequest::new().additional_slave("SAE_C"),
        ] {
            let err = backend
                .get_key(EP, &creds, "SAE_B", &request)
                .await
                .unwrap_err();
            assert_eq!(err.status(), RetrievalStatus::BadRequest, "{:?}", request);
        }
        assert_eq!(backend.stored_key_count(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_distinct() {
        let backend = SimulatedRetrievalBackend::new();
        let container = backend
            .get_key(EP, &Credentials::none(), "SAE_B", &KeyRequest::new().number(2))
            .await
            .unwrap();
        let a = container.get(0).unwrap();
        let b = container.get(1).unwrap();
        assert_ne!(a.key_id(), b.key_id());
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn test_allow_list() {
        let backend = SimulatedRetrievalBackend::builder()
            .allow_sae("SAE_A")
            .allow_sae("SAE_B")
            .build();
        let creds = Credentials::none();

        assert!(backend.get_status(EP, &creds, "SAE_B").await.is_ok());
        let err = backend.get_status(EP, &creds, "SAE_X").await.unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::Unauthorized);

        let ids = vec!["whatever".to_string()];
        let err = backend
            .get_key_with_ids(EP, &creds, "SAE_X", &ids)
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::Unauthorized);
    }

    #[tokio::test]
    async fn test_store_full_is_server_error() {
        let backend = SimulatedRetrievalBackend::builder().store_capacity(2).build();
        let creds = Credentials::none();
        backend
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new().number(2))
            .await
            .unwrap();
        let err = backend
            .get_key(EP, &creds, "SAE_B", &KeyRequest::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), RetrievalStatus::ServerError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let backend = SimulatedRetrievalBackend::builder()
            .latency(Duration::from_millis(100))
            .build();
        let start = tokio::time::Instant::now();
        backend
            .get_status(EP, &Credentials::none(), "SAE_B")
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
