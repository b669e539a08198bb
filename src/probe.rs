//! A minimal one-pass checkpoint consumer.
//!
//! Scans the task range, asks each region's leader for its flushed
//! checkpoint and takes the minimum. There is no retry here: any failing
//! region makes the round incomplete and the caller decides what to do.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cluster::ClusterError;
use crate::env::{AdvancerEnv, EnvError};
use crate::flush::FlushStatusError;
use crate::key_range::KeyRange;
use crate::region::{RegionIdentity, StoreId};

/// Why a region contributed no checkpoint this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Flush(FlushStatusError),
    Unreachable { store: StoreId, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Checkpoint per region that answered, keyed by the identity it reported.
    pub checkpoints: Vec<(RegionIdentity, u64)>,
    pub failures: Vec<(RegionIdentity, ProbeFailure)>,
}

impl ProbeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.checkpoints.is_empty()
    }

    /// The global checkpoint, available only when every region answered.
    pub fn global_checkpoint(&self) -> Option<u64> {
        if !self.is_complete() {
            return None;
        }
        self.checkpoints.iter().map(|(_, cp)| *cp).min()
    }
}

/// Run one polling round over `range`.
pub async fn probe_range(env: &dyn AdvancerEnv, range: &KeyRange) -> Result<ProbeReport, EnvError> {
    let regions = env
        .region_scan(&range.start_key, &range.end_key, usize::MAX)
        .await?;

    let mut by_leader: BTreeMap<StoreId, Vec<RegionIdentity>> = BTreeMap::new();
    for region in &regions {
        by_leader.entry(region.leader).or_default().push(region.identity());
    }

    let mut report = ProbeReport::default();
    for (store, requests) in by_leader {
        let client = match env.flush_client(store).await {
            Ok(client) => client,
            Err(EnvError::Cluster(ClusterError::Unreachable { store, reason })) => {
                report.failures.extend(requests.into_iter().map(|id| {
                    let failure = ProbeFailure::Unreachable {
                        store,
                        reason: reason.clone(),
                    };
                    (id, failure)
                }));
                continue;
            }
            Err(err) => return Err(err),
        };
        for resp in client.get_last_flush_ts_of_region(&requests) {
            match resp.result {
                Ok(checkpoint) => report.checkpoints.push((resp.region, checkpoint)),
                Err(err) => report.failures.push((resp.region, ProbeFailure::Flush(err))),
            }
        }
    }
    debug!(
        answered = report.checkpoints.len(),
        failed = report.failures.len(),
        "probe round finished"
    );
    Ok(report)
}

/// Run one polling round over every range of a task and persist the minimum
/// when all of them are complete.
///
/// Returns the persisted value, or `None` if some region did not answer.
pub async fn advance_once(env: &dyn AdvancerEnv, task: &str, ranges: &[KeyRange]) -> Result<Option<u64>, EnvError> {
    let mut report = ProbeReport::default();
    for range in ranges {
        let part = probe_range(env, range).await?;
        report.checkpoints.extend(part.checkpoints);
        report.failures.extend(part.failures);
    }
    let Some(checkpoint) = report.global_checkpoint() else {
        return Ok(None);
    };
    env.persist_global_checkpoint(task, checkpoint).await?;
    Ok(Some(checkpoint))
}
