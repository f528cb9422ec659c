//! ETSI 014 backend talking HTTPS to a remote KME.
//!
//! REST contract:
//!
//! | Operation          | Request                                               |
//! |--------------------|-------------------------------------------------------|
//! | `get_status`       | `GET  {ep}/api/v1/keys/{slave}/status`                |
//! | `get_key`          | `GET  {ep}/api/v1/keys/{slave}/enc_keys?number=&size=`|
//! | `get_key_with_ids` | `POST {ep}/api/v1/keys/{master}/dec_keys`             |
//!
//! The client certificate comes from the call's [`Credentials`]. The KME
//! certificate is checked against the configured CA; its hostname is not
//! checked unless [`HttpConfig::verify_hostname`] is set.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Certificate, Client, Identity, Response};
use serde::{Deserialize, Serialize};

use super::{KeyContainer, KeyRecord, KeyRequest, RedemptionPolicy, RetrievalBackend, StatusInfo};
use crate::config::{Credentials, HttpConfig};
use crate::error::{RetrievalError, RetrievalResult};
use crate::registry::BoxFuture;

/// `{"keys":[...]}` response body.
#[derive(Debug, Deserialize)]
struct KeyContainerBody {
    keys: Vec<KeyBody>,
}

#[derive(Debug, Deserialize)]
struct KeyBody {
    #[serde(rename = "key_ID")]
    key_id: String,
    /// Base64-encoded key bytes.
    key: String,
}

/// `{"key_IDs":[...]}` request body.
#[derive(Debug, Serialize)]
struct KeyIdsBody<'a> {
    #[serde(rename = "key_IDs")]
    key_ids: Vec<KeyIdBody<'a>>,
}

#[derive(Debug, Serialize)]
struct KeyIdBody<'a> {
    #[serde(rename = "key_ID")]
    key_id: &'a str,
}

impl KeyContainerBody {
    fn into_container(self) -> RetrievalResult<KeyContainer> {
        let records = self
            .keys
            .into_iter()
            .map(|k| {
                let key = BASE64.decode(k.key.trim()).map_err(|e| {
                    RetrievalError::Malformed(format!("key {} is not base64: {}", k.key_id, e))
                })?;
                Ok(KeyRecord::new(k.key_id, key))
            })
            .collect::<RetrievalResult<Vec<_>>>()?;
        Ok(KeyContainer::new(records))
    }
}

/// Remote HTTPS backend.
#[derive(Debug)]
pub struct HttpRetrievalBackend {
    config: HttpConfig,
    clients: Mutex<HashMap<Credentials, Client>>,
}

impl HttpRetrievalBackend {
    pub fn new() -> Self {
        Self::with_config(HttpConfig::default())
    }

    pub fn with_config(config: HttpConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Client configured for `credentials`, built on first use.
    async fn client(&self, credentials: &Credentials) -> RetrievalResult<Client> {
        let cached = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(credentials)
            .cloned();
        if let Some(client) = cached {
            return Ok(client);
        }

        let client = self.build_client(credentials).await?;
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.clone(), client.clone());
        Ok(client)
    }

    async fn build_client(&self, credentials: &Credentials) -> RetrievalResult<Client> {
        let mut builder = Client::builder()
            .timeout(self.config.request_timeout)
            .danger_accept_invalid_hostnames(!self.config.verify_hostname);

        if let (Some(cert), Some(key)) = (&credentials.cert_path, &credentials.key_path) {
            let mut pem = tokio::fs::read(cert).await?;
            pem.push(b'\n');
            pem.extend_from_slice(&tokio::fs::read(key).await?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| RetrievalError::BadRequest(format!("client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        if let Some(ca) = &credentials.ca_cert_path {
            let pem = tokio::fs::read(ca).await?;
            let ca = Certificate::from_pem(&pem)
                .map_err(|e| RetrievalError::BadRequest(format!("CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }

        builder
            .build()
            .map_err(|e| RetrievalError::Transport(format!("client setup: {}", e)))
    }

    async fn fetch_status(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        slave_sae_id: &str,
    ) -> RetrievalResult<StatusInfo> {
        let url = format!("{}/status", keys_url(endpoint, slave_sae_id));
        let client = self.client(credentials).await?;
        let response = check(client.get(&url).send().await?)?;
        Ok(response.json::<StatusInfo>().await?)
    }

    async fn fetch_keys(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        slave_sae_id: &str,
        request: &KeyRequest,
    ) -> RetrievalResult<KeyContainer> {
        if !request.additional_slave_sae_ids.is_empty() {
            return Err(RetrievalError::BadRequest(
                "additional slave SAE IDs need POST enc_keys, which is not supported".to_string(),
            ));
        }

        let url = format!("{}/enc_keys", keys_url(endpoint, slave_sae_id));
        let mut query: Vec<(&str, u32)> = vec![("number", request.count())];
        if let Some(size) = request.size {
            query.push(("size", size));
        }

        let client = self.client(credentials).await?;
        let response = check(client.get(&url).query(&query).send().await?)?;
        let container = response.json::<KeyContainerBody>().await?.into_container()?;
        tracing::debug!(slave_sae_id, count = container.len(), "enc_keys received");
        Ok(container)
    }

    async fn fetch_keys_by_id(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        master_sae_id: &str,
        key_ids: &[String],
    ) -> RetrievalResult<KeyContainer> {
        let url = format!("{}/dec_keys", keys_url(endpoint, master_sae_id));
        let body = KeyIdsBody {
            key_ids: key_ids.iter().map(|id| KeyIdBody { key_id: id }).collect(),
        };

        let client = self.client(credentials).await?;
        let response = check(client.post(&url).json(&body).send().await?)?;
        let container = response.json::<KeyContainerBody>().await?.into_container()?;
        tracing::debug!(master_sae_id, count = container.len(), "dec_keys received");
        Ok(container)
    }
}

impl Default for HttpRetrievalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// `{endpoint}/api/v1/keys/{sae_id}`. Endpoints without a scheme get `https://`.
fn keys_url(endpoint: &str, sae_id: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.contains("://") {
        format!("{}/api/v1/keys/{}", base, sae_id)
    } else {
        format!("https://{}/api/v1/keys/{}", base, sae_id)
    }
}

/// Turn a non-success HTTP status into an error.
fn check(response: Response) -> RetrievalResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    tracing::warn!(status = status.as_u16(), url = %response.url(), "KME returned error status");
    Err(RetrievalError::Http {
        status: status.as_u16(),
    })
}

impl RetrievalBackend for HttpRetrievalBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn redemption_policy(&self) -> RedemptionPolicy {
        self.config.redemption_policy
    }

    fn get_status<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        slave_sae_id: &'a str,
    ) -> BoxFuture<'a, RetrievalResult<StatusInfo>> {
        Box::pin(self.fetch_status(endpoint, credentials, slave_sae_id))
    }

    fn get_key<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        slave_sae_id: &'a str,
        request: &'a KeyRequest,
    ) -> BoxFuture<'a, RetrievalResult<KeyContainer>> {
        Box::pin(self.fetch_keys(endpoint, credentials, slave_sae_id, request))
    }

    fn get_key_with_ids<'a>(
        &'a self,
        endpoint: &'a str,
        credentials: &'a Credentials,
        master_sae_id: &'a str,
        key_ids: &'a [String],
    ) -> BoxFuture<'a, RetrievalResult<KeyContainer>> {
        Box::pin(self.fetch_keys_by_id(endpoint, credentials, master_sae_id, key_ids))
    }
}
