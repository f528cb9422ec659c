//! In-process simulated QKD node for ETSI 004.
//!
//! Keys are derived deterministically from `(KSID, index)` so both ends of
//! a stream obtain identical material without exchanging it. The rate gate
//! and TTL lease are enforced by the shared [`StreamTable`].

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::table::{CloseOutcome, StreamTable, DEFAULT_RETIRED_CAPACITY, DEFAULT_STREAM_CAPACITY};
use super::{KeyChunk, Ksid, Metadata, OpenOutcome, Qos, Role, StreamBackend};
use crate::error::{StreamError, StreamResult};
use crate::registry::BoxFuture;

/// Metadata attached to every simulated key delivery.
#[derive(Debug, Serialize)]
struct DeliveryMetadata {
    /// Milliseconds since the stream was opened.
    age: u64,
    hops: u32,
}

/// Expand `(ksid, index)` into `len` key bytes.
///
/// SHA-256 in counter mode: block `i` is `H(ksid || index || i)`, all
/// integers Big Endian.
pub fn derive_key(ksid: &Ksid, index: u32, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u32 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(ksid.as_bytes());
        hasher.update(index.to_be_bytes());
        hasher.update(counter.to_be_bytes());
        let block = hasher.finalize();
        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
        counter = counter.wrapping_add(1);
    }
    out
}

/// Builder for [`SimulatedStreamBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedStreamBuilder {
    capacity: usize,
    retired_capacity: usize,
}

impl SimulatedStreamBuilder {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_STREAM_CAPACITY,
            retired_capacity: DEFAULT_RETIRED_CAPACITY,
        }
    }

    /// Maximum number of concurrently open streams.
    ///
    /// Default: 16
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// How many closed KSIDs are remembered to refuse reopening.
    ///
    /// Default: 1024
    pub fn retired_capacity(mut self, retired_capacity: usize) -> Self {
        self.retired_capacity = retired_capacity;
        self
    }

    pub fn build(self) -> SimulatedStreamBackend {
        SimulatedStreamBackend {
            table: Mutex::new(StreamTable::new(self.capacity, self.retired_capacity)),
        }
    }
}

impl Default for SimulatedStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated ETSI 004 backend.
///
/// All lifecycle transitions happen under one lock, so concurrent closers
/// of the same KSID cannot free a slot twice.
#[derive(Debug)]
pub struct SimulatedStreamBackend {
    table: Mutex<StreamTable>,
}

impl SimulatedStreamBackend {
    pub fn new() -> Self {
        SimulatedStreamBuilder::new().build()
    }

    pub fn builder() -> SimulatedStreamBuilder {
        SimulatedStreamBuilder::new()
    }

    /// Number of live streams.
    pub async fn stream_count(&self) -> usize {
        self.table.lock().await.len()
    }

    async fn open_stream(
        &self,
        source: &str,
        destination: &str,
        qos: &Qos,
        role: Role,
    ) -> StreamResult<OpenOutcome> {
        let mut table = self.table.lock().await;
        let outcome = table.open(role, qos, Instant::now())?;
        tracing::debug!(
            ksid = %outcome.ksid,
            source,
            destination,
            status = %outcome.status,
            "stream opened"
        );
        Ok(outcome)
    }

    async fn deliver(
        &self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&mut Metadata>,
    ) -> StreamResult<KeyChunk> {
        let mut table = self.table.lock().await;
        let grant = table.authorize(&ksid, index, Instant::now())?;

        let key = derive_key(&grant.ksid, grant.index, grant.chunk_size as usize);

        if let Some(md) = metadata {
            let body = DeliveryMetadata {
                age: u64::try_from(grant.age.as_millis()).unwrap_or(u64::MAX),
                hops: 0,
            };
            let json = serde_json::to_vec(&body)
                .map_err(|e| StreamError::NoConnection(format!("metadata encoding: {}", e)))?;
            md.fill(&json)?;
        }

        table.record_delivery(&ksid, index);
        tracing::trace!(ksid = %ksid, index, "key delivered");
        Ok(KeyChunk::new(index, key))
    }

    async fn close_stream(&self, ksid: Ksid) -> StreamResult<()> {
        let mut table = self.table.lock().await;
        log_close(ksid, table.close(&ksid, Instant::now())?);
        Ok(())
    }

    async fn abandon_stream(&self, ksid: Ksid) -> StreamResult<()> {
        let mut table = self.table.lock().await;
        log_close(ksid, table.abandon(&ksid, Instant::now())?);
        Ok(())
    }
}

fn log_close(ksid: Ksid, outcome: CloseOutcome) {
    match outcome {
        CloseOutcome::Pending => tracing::debug!(ksid = %ksid, "close pending until TTL"),
        CloseOutcome::Released => tracing::debug!(ksid = %ksid, "stream released"),
    }
}

impl Default for SimulatedStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBackend for SimulatedStreamBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
        qos: &'a Qos,
        role: Role,
    ) -> BoxFuture<'a, StreamResult<OpenOutcome>> {
        Box::pin(self.open_stream(source, destination, qos, role))
    }

    fn get_key<'a>(
        &'a self,
        ksid: Ksid,
        index: u32,
        metadata: Option<&'a mut Metadata>,
    ) -> BoxFuture<'a, StreamResult<KeyChunk>> {
        Box::pin(self.deliver(ksid, index, metadata))
    }

    fn close(&self, ksid: Ksid) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(self.close_stream(ksid))
    }

    fn abandon(&self, ksid: Ksid) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(self.abandon_stream(ksid))
    }
}
