//! The boundary a checkpoint advancer talks to.
//!
//! `AdvancerEnv` is everything the advancer needs from the outside world:
//! topology scans, per-store flush clients, task lifecycle events and the
//! metadata store holding the global checkpoint. `TestEnv` implements it on
//! top of a simulated [`Cluster`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::cluster::{Cluster, ClusterError};
use crate::key_range::KeyRange;
use crate::region::{RegionWithLeader, StoreId};
use crate::store::FlushClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBackupTaskInfo {
    pub name: String,
}

/// A task lifecycle event delivered to the advancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_type: EventType,
    pub name: String,
    pub info: StreamBackupTaskInfo,
    pub ranges: Vec<KeyRange>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("task event channel closed")]
    ChannelClosed,
}

#[async_trait]
pub trait AdvancerEnv: Send + Sync {
    /// Regions overlapping `[key, end_key)`, ascending, at most `limit`.
    async fn region_scan(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionWithLeader>, EnvError>;

    /// A flush-status client for `store`.
    async fn flush_client(&self, store: StoreId) -> Result<FlushClient, EnvError>;

    /// Announce the backup task on `tx`.
    async fn begin_task(&self, tx: mpsc::Sender<TaskEvent>) -> Result<(), EnvError>;

    /// Persist the task's global checkpoint.
    async fn persist_global_checkpoint(&self, task: &str, checkpoint: u64) -> Result<(), EnvError>;

    /// Drop the task's global checkpoint.
    async fn clear_global_checkpoint(&self, task: &str) -> Result<(), EnvError>;
}

/// `AdvancerEnv` over a simulated cluster, with a monotonic in-memory
/// global checkpoint.
pub struct TestEnv {
    cluster: Arc<Cluster>,
    task_name: String,
    ranges: Vec<KeyRange>,
    /// Guarded separately from the cluster: it stands in for the metadata store.
    checkpoint: Mutex<u64>,
}

impl TestEnv {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            task_name: "whole".to_string(),
            ranges: Vec::new(),
            checkpoint: Mutex::new(0),
        }
    }

    /// Restrict the task to `ranges`. Empty means the whole key space.
    pub fn with_ranges(mut self, ranges: Vec<KeyRange>) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// The last persisted global checkpoint.
    pub fn checkpoint(&self) -> u64 {
        *self.checkpoint.lock().unwrap()
    }

    fn task_event(&self) -> TaskEvent {
        let ranges = if self.ranges.is_empty() {
            vec![KeyRange::full()]
        } else {
            self.ranges.clone()
        };
        TaskEvent {
            event_type: EventType::Add,
            name: self.task_name.clone(),
            info: StreamBackupTaskInfo {
                name: self.task_name.clone(),
            },
            ranges,
        }
    }
}

#[async_trait]
impl AdvancerEnv for TestEnv {
    async fn region_scan(
        &self,
        key: &[u8],
        end_key: &[u8],
        limit: usize,
    ) -> Result<Vec<RegionWithLeader>, EnvError> {
        Ok(self.cluster.region_scan(key, end_key, limit))
    }

    async fn flush_client(&self, store: StoreId) -> Result<FlushClient, EnvError> {
        Ok(self.cluster.flush_client(store)?)
    }

    async fn begin_task(&self, tx: mpsc::Sender<TaskEvent>) -> Result<(), EnvError> {
        tx.send(self.task_event())
            .await
            .map_err(|_| EnvError::ChannelClosed)
    }

    /// Panics if `checkpoint` is below the last persisted value: a global
    /// checkpoint moving backwards is a bug in the caller.
    async fn persist_global_checkpoint(&self, task: &str, checkpoint: u64) -> Result<(), EnvError> {
        let mut current = self.checkpoint.lock().unwrap();
        if checkpoint < *current {
            panic!("checkpoint rolling back (from {} to {})", *current, checkpoint);
        }
        info!(task, checkpoint, "global checkpoint persisted");
        *current = checkpoint;
        Ok(())
    }

    async fn clear_global_checkpoint(&self, task: &str) -> Result<(), EnvError> {
        *self.checkpoint.lock().unwrap() = 0;
        info!(task, "global checkpoint cleared");
        Ok(())
    }
}
