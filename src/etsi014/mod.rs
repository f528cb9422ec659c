//! ETSI GS QKD 014: stateless key retrieval from a KME.
//!
//! A master SAE asks its KME for a batch of keys shared with a slave SAE
//! and receives them together with their key IDs. The slave SAE then
//! redeems the same keys from its own KME by ID.
//!
//! [`RetrievalEngine`] is the entry point. It checks parameters and
//! forwards each call to the [`RetrievalBackend`] held in its registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod backend;
pub mod engine;
pub mod http;
pub mod simulated;
pub mod store;

pub use backend::RetrievalBackend;
pub use engine::RetrievalEngine;
pub use http::HttpRetrievalBackend;
pub use simulated::{SimulatedRetrievalBackend, SimulatedRetrievalBuilder};
pub use store::KeyStore;

/// Status codes of the ETSI 014 API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RetrievalStatus {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    ServerError = 503,
}

impl RetrievalStatus {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(RetrievalStatus::Ok),
            400 => Some(RetrievalStatus::BadRequest),
            401 => Some(RetrievalStatus::Unauthorized),
            503 => Some(RetrievalStatus::ServerError),
            _ => None,
        }
    }
}

impl fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Whether a delivered key can be fetched by ID more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedemptionPolicy {
    /// The key stays available; every redemption returns the same bytes.
    Repeatable,
    /// The key is removed on first redemption; later attempts fail.
    SingleUse,
}

/// KME status, as returned by `GET .../status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    #[serde(rename = "source_KME_ID", default)]
    pub source_kme_id: String,
    #[serde(rename = "target_KME_ID", default)]
    pub target_kme_id: String,
    #[serde(rename = "master_SAE_ID", default)]
    pub master_sae_id: String,
    #[serde(rename = "slave_SAE_ID", default)]
    pub slave_sae_id: String,
    /// Default key size in bits.
    #[serde(default)]
    pub key_size: u32,
    #[serde(default)]
    pub stored_key_count: u32,
    #[serde(default)]
    pub max_key_count: u32,
    #[serde(default)]
    pub max_key_per_request: u32,
    #[serde(default)]
    pub max_key_size: u32,
    #[serde(default)]
    pub min_key_size: u32,
    #[serde(rename = "max_SAE_ID_count", default)]
    pub max_sae_id_count: u32,
}

/// Parameters of a key issuance request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRequest {
    /// Number of keys. `None` means one.
    pub number: Option<u32>,
    /// Key size in bits. `None` means the backend default.
    pub size: Option<u32>,
    pub additional_slave_sae_ids: Vec<String>,
}

impl KeyRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    /// Size in bits.
    pub fn size(mut self, bits: u32) -> Self {
        self.size = Some(bits);
        self
    }

    pub fn additional_slave(mut self, sae_id: impl Into<String>) -> Self {
        self.additional_slave_sae_ids.push(sae_id.into());
        self
    }

    pub fn count(&self) -> u32 {
        self.number.unwrap_or(1)
    }
}

/// One key and its identifier. The key bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyRecord {
    #[zeroize(skip)]
    key_id: String,
    key: Vec<u8>,
}

impl KeyRecord {
    pub fn new(key_id: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Key size in bits.
    pub fn bits(&self) -> usize {
        self.key.len() * 8
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("bits", &self.bits())
            .finish()
    }
}

/// Ordered batch of keys returned by one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContainer {
    keys: Vec<KeyRecord>,
}

impl KeyContainer {
    pub fn new(keys: Vec<KeyRecord>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&KeyRecord> {
        self.keys.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyRecord> {
        self.keys.iter()
    }

    /// Look a key up by its ID.
    pub fn find(&self, key_id: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.key_id.clone()).collect()
    }
}

impl IntoIterator for KeyContainer {
    type Item = KeyRecord;
    type IntoIter = std::vec::IntoIter<KeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a KeyContainer {
    type Item = &'a KeyRecord;
    type IntoIter = std::slice::Iter<'a, KeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}
