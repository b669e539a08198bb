//! Per-region flush confirmation state.
//!
//! A store only vouches for a region's checkpoint after the region has been
//! flushed at the epoch the caller asks about. Confirmation lasts a single
//! round: splits and checkpoint advances forget it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Flush confirmation state of one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushSimulator {
    /// Error injection off; every check succeeds.
    Disabled,
    /// No epoch has been flushed in the current round.
    Unflushed,
    /// Flushed while the region was at `epoch`.
    Flushed { epoch: u64 },
}

impl FlushSimulator {
    pub fn new(enabled: bool) -> Self {
        if enabled {
            FlushSimulator::Unflushed
        } else {
            FlushSimulator::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, FlushSimulator::Disabled)
    }

    /// The epoch recorded by the last flush, if any.
    pub fn flushed_epoch(&self) -> Option<u64> {
        match self {
            FlushSimulator::Flushed { epoch } => Some(*epoch),
            _ => None,
        }
    }

    /// Record a flush at `epoch`. No-op in disabled mode.
    pub fn flush(&mut self, epoch: u64) {
        if self.is_enabled() {
            *self = FlushSimulator::Flushed { epoch };
        }
    }

    /// Forget any flush confirmation, keeping the enabled/disabled mode.
    pub fn reset(&mut self) {
        *self = self.fork();
    }

    /// A fresh state with the same mode and no flush history.
    pub fn fork(&self) -> Self {
        FlushSimulator::new(self.is_enabled())
    }

    /// Check whether a flush-status query for `requested_epoch` can be answered.
    pub fn check(&self, requested_epoch: u64) -> Result<(), FlushStatusError> {
        match self {
            FlushSimulator::Disabled => Ok(()),
            FlushSimulator::Unflushed => Err(FlushStatusError::NotFlushed),
            FlushSimulator::Flushed { epoch } if *epoch != requested_epoch => {
                Err(FlushStatusError::EpochMismatch)
            }
            FlushSimulator::Flushed { .. } => Ok(()),
        }
    }
}

impl fmt::Display for FlushSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushSimulator::Disabled => write!(f, "-"),
            FlushSimulator::Unflushed => write!(f, "0"),
            FlushSimulator::Flushed { epoch } => write!(f, "{epoch}"),
        }
    }
}

/// Per-region outcome of a flush-status query.
///
/// All variants are recoverable from the caller's side: the response that
/// carries one also carries the region's authoritative epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlushStatusError {
    /// The store does not host the region, or is not its leader.
    #[error("not found")]
    NotFound,
    /// The region has not flushed in the current round.
    #[error("not flushed")]
    NotFlushed,
    /// The caller's epoch is stale; rescan before retrying.
    #[error("flushed epoch not match")]
    EpochMismatch,
}
