//! Bounded in-memory key store with an explicit redemption policy.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{KeyRecord, RedemptionPolicy};
use crate::error::{RetrievalError, RetrievalResult};

/// How many redeemed single-use IDs are remembered for error reporting.
const REDEEMED_MEMORY: usize = 4096;

/// Keys issued by a KME and not yet consumed.
#[derive(Debug)]
pub struct KeyStore {
    capacity: usize,
    policy: RedemptionPolicy,
    keys: HashMap<String, KeyRecord>,
    redeemed: VecDeque<String>,
    redeemed_set: HashSet<String>,
}

impl KeyStore {
    pub fn new(capacity: usize, policy: RedemptionPolicy) -> Self {
        Self {
            capacity,
            policy,
            keys: HashMap::new(),
            redeemed: VecDeque::new(),
            redeemed_set: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> RedemptionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Room left for new keys.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.keys.len())
    }

    /// Store a batch. Either every record is stored or none is.
    pub fn insert_all(&mut self, records: &[KeyRecord]) -> RetrievalResult<()> {
        if records.len() > self.available() {
            return Err(RetrievalError::StoreFull(self.capacity));
        }
        if let Some(dup) = records.iter().find(|r| self.keys.contains_key(r.key_id())) {
            return Err(RetrievalError::BadRequest(format!(
                "key ID {} already stored",
                dup.key_id()
            )));
        }
        for record in records {
            self.keys.insert(record.key_id().to_string(), record.clone());
        }
        Ok(())
    }

    /// Fetch a key by ID according to the store's policy.
    pub fn redeem(&mut self, key_id: &str) -> RetrievalResult<KeyRecord> {
        match self.policy {
            RedemptionPolicy::Repeatable => self
                .keys
                .get(key_id)
                .cloned()
                .ok_or_else(|| RetrievalError::UnknownKey(key_id.to_string())),
            RedemptionPolicy::SingleUse => match self.keys.remove(key_id) {
                Some(record) => {
                    self.remember_redeemed(key_id);
                    Ok(record)
                }
                None if self.redeemed_set.contains(key_id) => {
                    Err(RetrievalError::AlreadyRedeemed(key_id.to_string()))
                }
                None => Err(RetrievalError::UnknownKey(key_id.to_string())),
            },
        }
    }

    /// Redeem a batch. Fails without consuming anything if any ID fails.
    pub fn redeem_all(&mut self, key_ids: &[String]) -> RetrievalResult<Vec<KeyRecord>> {
        let mut seen = HashSet::new();
        for id in key_ids {
            if !seen.insert(id.as_str()) && self.policy == RedemptionPolicy::SingleUse {
                return Err(RetrievalError::BadRequest(format!(
                    "key ID {} requested twice",
                    id
                )));
            }
            if !self.keys.contains_key(id) {
                return Err(if self.redeemed_set.contains(id) {
                    RetrievalError::AlreadyRedeemed(id.clone())
                } else {
                    RetrievalError::UnknownKey(id.clone())
                });
            }
        }
        key_ids.iter().map(|id| self.redeem(id)).collect()
    }

    fn remember_redeemed(&mut self, key_id: &str) {
        if self.redeemed.len() >= REDEEMED_MEMORY {
            if let Some(oldest) = self.redeemed.pop_front() {
                self.redeemed_set.remove(&oldest);
            }
        }
        self.redeemed.push_back(key_id.to_string());
        self.redeemed_set.insert(key_id.to_string());
    }
}
