//! Stream table: bounded arena of stream slots keyed by KSID.
//!
//! The table owns the stream lifecycle:
//!
//! ```text
//! Unopened ──open──▶ Open ──close (ttl running)──▶ PendingClose
//!                     │                                │
//!                     └──close (ttl elapsed)──▶ Closed ◀┘ close / lazy reap
//! ```
//!
//! Closed KSIDs are remembered (up to a bound) so they can never be
//! reopened. Time is passed in by the caller, which keeps the table free
//! of clock reads and easy to drive from tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::{Ksid, OpenOutcome, Qos, Role, StreamStatus};
use crate::error::{StreamError, StreamResult};

/// Default number of concurrently open streams.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Default number of closed KSIDs remembered.
pub const DEFAULT_RETIRED_CAPACITY: usize = 1024;

/// One live stream.
#[derive(Debug, Clone)]
pub struct StreamSlot {
    pub ksid: Ksid,
    pub qos: Qos,
    /// Opened by the initiator (as opposed to a responder creating it).
    pub initiated: bool,
    pub created: Instant,
    pub last_index: Option<u32>,
    pub delivered: u64,
    pub peer_joined: bool,
    pub pending_close: bool,
}

impl StreamSlot {
    fn new(ksid: Ksid, qos: Qos, initiated: bool, now: Instant) -> Self {
        Self {
            ksid,
            qos,
            initiated,
            created: now,
            last_index: None,
            delivered: 0,
            peer_joined: !initiated,
            pending_close: false,
        }
    }

    /// Time since the stream was opened.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    /// Number of chunks producible at `now`.
    ///
    /// `1 + elapsed_ms * max_bps / (8000 * chunk)`: the first chunk is
    /// provisioned at open, the rest accrue at `max_bps`.
    pub fn horizon(&self, now: Instant) -> u64 {
        let elapsed_ms = self.age(now).as_millis();
        let per_chunk = 8000u128 * u128::from(self.qos.key_chunk_size.max(1));
        let accrued = elapsed_ms * u128::from(self.qos.max_bps) / per_chunk;
        u64::try_from(accrued).unwrap_or(u64::MAX).saturating_add(1)
    }

    fn ttl_elapsed(&self, now: Instant) -> bool {
        self.age(now) >= self.qos.ttl_duration()
    }
}

/// Result of a successful close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// TTL still running; the stream stays servable.
    Pending,
    /// TTL elapsed; the slot was freed.
    Released,
}

/// Permission to deliver one chunk, returned by [`StreamTable::authorize`].
#[derive(Debug, Clone)]
pub struct Grant {
    pub ksid: Ksid,
    pub index: u32,
    pub chunk_size: u32,
    pub age: Duration,
}

/// Bounded arena of stream slots.
#[derive(Debug)]
pub struct StreamTable {
    slots: Vec<Option<StreamSlot>>,
    free: Vec<usize>,
    by_ksid: HashMap<Ksid, usize>,
    retired: VecDeque<Ksid>,
    retired_set: HashSet<Ksid>,
    retired_capacity: usize,
}

impl StreamTable {
    pub fn new(capacity: usize, retired_capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            // Pop from the back; lowest slot first.
            free: (0..capacity).rev().collect(),
            by_ksid: HashMap::with_capacity(capacity),
            retired: VecDeque::new(),
            retired_set: HashSet::new(),
            retired_capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live streams, pending-close included.
    pub fn len(&self) -> usize {
        self.by_ksid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ksid.is_empty()
    }

    pub fn get(&self, ksid: &Ksid) -> Option<&StreamSlot> {
        self.by_ksid
            .get(ksid)
            .and_then(|&i| self.slots.get(i))
            .and_then(Option::as_ref)
    }

    fn get_mut(&mut self, ksid: &Ksid) -> Option<&mut StreamSlot> {
        let i = *self.by_ksid.get(ksid)?;
        self.slots.get_mut(i).and_then(Option::as_mut)
    }

    pub fn is_retired(&self, ksid: &Ksid) -> bool {
        self.retired_set.contains(ksid)
    }

    /// Open a stream for `role`.
    pub fn open(&mut self, role: Role, qos: &Qos, now: Instant) -> StreamResult<OpenOutcome> {
        qos.validate()?;

        match role {
            Role::Initiator => {
                let ksid = self.mint_ksid();
                self.allocate(ksid, qos.clone(), true, now)?;
                Ok(OpenOutcome {
                    status: StreamStatus::PeerDisconnected,
                    ksid,
                    qos: qos.clone(),
                })
            }
            Role::Responder(ksid) => {
                if ksid.is_nil() {
                    return Err(StreamError::NoConnection(
                        "responder needs a non-zero KSID".to_string(),
                    ));
                }
                self.reap_if_expired(&ksid, now);
                if self.is_retired(&ksid) {
                    return Err(StreamError::KsidInUse(ksid));
                }

                if let Some(slot) = self.get_mut(&ksid) {
                    if slot.initiated && !slot.peer_joined && !slot.pending_close {
                        slot.peer_joined = true;
                        return Ok(OpenOutcome {
                            status: StreamStatus::Success,
                            ksid,
                            qos: slot.qos.clone(),
                        });
                    }
                    return Err(StreamError::KsidInUse(ksid));
                }

                self.allocate(ksid, qos.clone(), false, now)?;
                Ok(OpenOutcome {
                    status: StreamStatus::Success,
                    ksid,
                    qos: qos.clone(),
                })
            }
        }
    }

    /// Check that chunk `index` of `ksid` may be delivered at `now`.
    ///
    /// Does not mutate the stream; call [`StreamTable::record_delivery`]
    /// once the chunk has actually been handed out.
    pub fn authorize(&self, ksid: &Ksid, index: u32, now: Instant) -> StreamResult<Grant> {
        let slot = self
            .get(ksid)
            .ok_or(StreamError::PeerNotConnected(*ksid))?;

        let horizon = slot.horizon(now);
        if u64::from(index) >= horizon {
            return Err(StreamError::InsufficientKey { index, horizon });
        }

        Ok(Grant {
            ksid: *ksid,
            index,
            chunk_size: slot.qos.key_chunk_size,
            age: slot.age(now),
        })
    }

    pub fn record_delivery(&mut self, ksid: &Ksid, index: u32) {
        if let Some(slot) = self.get_mut(ksid) {
            slot.last_index = Some(index);
            slot.delivered += 1;
        }
    }

    /// Request teardown of `ksid`.
    pub fn close(&mut self, ksid: &Ksid, now: Instant) -> StreamResult<CloseOutcome> {
        let slot = self
            .get_mut(ksid)
            .ok_or(StreamError::PeerNotConnected(*ksid))?;

        if slot.ttl_elapsed(now) {
            self.release(ksid);
            return Ok(CloseOutcome::Released);
        }
        slot.pending_close = true;
        Ok(CloseOutcome::Pending)
    }

    /// Tear down `ksid` for an owner that went away without closing.
    ///
    /// An initiator stream no peer ever joined is freed at once. Anything
    /// else gets an ordinary [`close`](Self::close).
    pub fn abandon(&mut self, ksid: &Ksid, now: Instant) -> StreamResult<CloseOutcome> {
        let slot = self
            .get(ksid)
            .ok_or(StreamError::PeerNotConnected(*ksid))?;
        if slot.initiated && !slot.peer_joined {
            self.release(ksid);
            return Ok(CloseOutcome::Released);
        }
        self.close(ksid, now)
    }

    /// Free every pending-close stream whose TTL has elapsed.
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Ksid> = self
            .slots
            .iter()
            .flatten()
            .filter(|s| s.pending_close && s.ttl_elapsed(now))
            .map(|s| s.ksid)
            .collect();
        for ksid in &expired {
            self.release(ksid);
        }
        expired.len()
    }

    fn reap_if_expired(&mut self, ksid: &Ksid, now: Instant) {
        let expired = self
            .get(ksid)
            .is_some_and(|s| s.pending_close && s.ttl_elapsed(now));
        if expired {
            self.release(ksid);
        }
    }

    fn allocate(
        &mut self,
        ksid: Ksid,
        qos: Qos,
        initiated: bool,
        now: Instant,
    ) -> StreamResult<()> {
        if self.free.is_empty() && self.reap_expired(now) == 0 {
            return Err(StreamError::NoConnection(format!(
                "all {} stream slots in use",
                self.capacity()
            )));
        }
        let i = self
            .free
            .pop()
            .ok_or_else(|| StreamError::NoConnection("stream table exhausted".to_string()))?;
        self.slots[i] = Some(StreamSlot::new(ksid, qos, initiated, now));
        self.by_ksid.insert(ksid, i);
        Ok(())
    }

    fn release(&mut self, ksid: &Ksid) {
        if let Some(i) = self.by_ksid.remove(ksid) {
            self.slots[i] = None;
            self.free.push(i);
            self.retire(*ksid);
        }
    }

    fn retire(&mut self, ksid: Ksid) {
        if self.retired_capacity == 0 {
            return;
        }
        if self.retired.len() >= self.retired_capacity {
            if let Some(oldest) = self.retired.pop_front() {
                self.retired_set.remove(&oldest);
            }
        }
        self.retired.push_back(ksid);
        self.retired_set.insert(ksid);
    }

    fn mint_ksid(&self) -> Ksid {
        loop {
            let ksid = Ksid::generate();
            if !self.by_ksid.contains_key(&ksid) && !self.is_retired(&ksid) {
                return ksid;
            }
        }
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY, DEFAULT_RETIRED_CAPACITY)
    }
}
