//! Regions: contiguous shards of the key space with an epoch and a leader.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::flush::{FlushSimulator, FlushStatusError};
use crate::key_range::{KeyRange, KeyRangeError, hex};

/// Stable identity of a region. Assigned once and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a store (replica host).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A region id paired with an epoch version, as carried by flush-status
/// requests and responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionIdentity {
    pub id: RegionId,
    pub epoch_version: u64,
}

impl RegionIdentity {
    pub fn new(id: RegionId, epoch_version: u64) -> Self {
        Self { id, epoch_version }
    }
}

/// What a region scan returns: enough to route a flush-status query to the
/// leader and to detect a stale epoch later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionWithLeader {
    pub id: RegionId,
    pub range: KeyRange,
    pub epoch: u64,
    pub leader: StoreId,
}

impl RegionWithLeader {
    pub fn identity(&self) -> RegionIdentity {
        RegionIdentity::new(self.id, self.epoch)
    }
}

/// A shard of the key space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub range: KeyRange,
    /// Bumped once per split this region takes part in.
    pub epoch: u64,
    pub leader: StoreId,
    /// Last confirmed durable flush position. Only grows.
    pub checkpoint: u64,
    pub flush: FlushSimulator,
}

impl Region {
    pub fn new(id: RegionId, range: KeyRange, leader: StoreId, flush_enabled: bool) -> Self {
        Self {
            id,
            range,
            epoch: 0,
            leader,
            checkpoint: 0,
            flush: FlushSimulator::new(flush_enabled),
        }
    }

    /// Shrink this region to `[start, key)` and return the new region covering
    /// `[key, end)`.
    ///
    /// Both halves end up at the same, incremented epoch with a forked flush
    /// state. The new region inherits leader and checkpoint.
    pub fn split_at(&mut self, new_id: RegionId, key: &[u8]) -> Result<Region, KeyRangeError> {
        let (left, right) = self.range.split(key)?;
        self.range = left;
        self.epoch += 1;
        self.flush = self.flush.fork();
        Ok(Region {
            id: new_id,
            range: right,
            epoch: self.epoch,
            leader: self.leader,
            checkpoint: self.checkpoint,
            flush: self.flush.fork(),
        })
    }

    /// Mark the region flushed at its current epoch.
    pub fn flush(&mut self) {
        self.flush.flush(self.epoch);
    }

    pub fn identity(&self) -> RegionIdentity {
        RegionIdentity::new(self.id, self.epoch)
    }

    pub fn with_leader(&self) -> RegionWithLeader {
        RegionWithLeader {
            id: self.id,
            range: self.range.clone(),
            epoch: self.epoch,
            leader: self.leader,
        }
    }

    /// Answer a flush-status query addressed to `store` for `requested_epoch`.
    ///
    /// Returns the checkpoint on success. The current epoch is the ground
    /// truth; the caller's epoch is only the question.
    pub fn last_flush(&self, store: StoreId, requested_epoch: u64) -> Result<u64, FlushStatusError> {
        if self.leader != store {
            return Err(FlushStatusError::NotFound);
        }
        self.flush.check(requested_epoch)?;
        if self.epoch != requested_epoch {
            return Err(FlushStatusError::EpochMismatch);
        }
        Ok(self.checkpoint)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}):[{},{});{}L{}F{}",
            self.id,
            self.epoch,
            hex(&self.range.start_key),
            hex(&self.range.end_key),
            self.checkpoint,
            self.leader,
            self.flush
        )
    }
}
