//! Stores and the flush-status RPC they serve.
//!
//! A store never owns regions. It keeps weak back-references to the
//! cluster's canonical region cells, keyed by region id, for the regions it
//! currently replicates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::debug;

use crate::flush::FlushStatusError;
use crate::region::{Region, RegionId, RegionIdentity, StoreId};

/// The canonical, lockable cell holding one region.
pub type SharedRegion = Arc<Mutex<Region>>;

/// Id → region lookup shared between the cluster and flush clients.
#[derive(Default)]
pub(crate) struct RegionIndex {
    regions: RwLock<HashMap<RegionId, SharedRegion>>,
}

impl RegionIndex {
    pub(crate) fn get(&self, id: RegionId) -> Option<SharedRegion> {
        self.regions.read().unwrap().get(&id).cloned()
    }

    pub(crate) fn insert(&self, id: RegionId, region: SharedRegion) {
        self.regions.write().unwrap().insert(id, region);
    }
}

/// A replica host.
pub struct Store {
    id: StoreId,
    regions: RwLock<BTreeMap<RegionId, Weak<Mutex<Region>>>>,
}

impl Store {
    pub(crate) fn new(id: StoreId) -> Self {
        Self {
            id,
            regions: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn hosts(&self, region: RegionId) -> bool {
        self.regions.read().unwrap().contains_key(&region)
    }

    pub fn hosted_region_ids(&self) -> Vec<RegionId> {
        self.regions.read().unwrap().keys().copied().collect()
    }

    pub(crate) fn host(&self, id: RegionId, region: &SharedRegion) {
        self.regions
            .write()
            .unwrap()
            .insert(id, Arc::downgrade(region));
    }

    pub(crate) fn unhost(&self, id: RegionId) {
        self.regions.write().unwrap().remove(&id);
    }

    pub(crate) fn hosted(&self, id: RegionId) -> Option<SharedRegion> {
        self.regions.read().unwrap().get(&id).and_then(Weak::upgrade)
    }

    fn hosted_all(&self) -> Vec<SharedRegion> {
        self.regions
            .read()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Flush every hosted region this store currently leads.
    /// Returns how many regions were flushed.
    pub(crate) fn flush_led(&self) -> usize {
        let mut flushed = 0;
        for region in self.hosted_all() {
            let mut r = region.lock().unwrap();
            if r.leader == self.id {
                r.flush();
                flushed += 1;
            }
        }
        flushed
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.id)?;
        for region in self.hosted_all() {
            write!(f, "{} ", region.lock().unwrap())?;
        }
        Ok(())
    }
}

/// One entry of a flush-status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCheckpoint {
    /// The region's authoritative identity. For a region id the cluster has
    /// never seen, the requested epoch is echoed back.
    pub region: RegionIdentity,
    /// The checkpoint on success.
    pub result: Result<u64, FlushStatusError>,
}

/// A handle for issuing flush-status queries to one store.
#[derive(Clone)]
pub struct FlushClient {
    store: Arc<Store>,
    index: Arc<RegionIndex>,
}

impl FlushClient {
    pub(crate) fn new(store: Arc<Store>, index: Arc<RegionIndex>) -> Self {
        Self { store, index }
    }

    pub fn store_id(&self) -> StoreId {
        self.store.id
    }

    /// Batch flush-status query. Read-only; safe to retry.
    pub fn get_last_flush_ts_of_region(&self, requests: &[RegionIdentity]) -> Vec<RegionCheckpoint> {
        let out: Vec<RegionCheckpoint> = requests
            .iter()
            .map(|req| self.check_last_flush(req.id, req.epoch_version))
            .collect();
        debug!(store = %self.store.id, ?requests, ?out, "get last flush ts of region");
        out
    }

    /// Flush-status query for a single region.
    pub fn check_last_flush(&self, region: RegionId, epoch_version: u64) -> RegionCheckpoint {
        if let Some(cell) = self.store.hosted(region) {
            let r = cell.lock().unwrap();
            return RegionCheckpoint {
                region: r.identity(),
                result: r.last_flush(self.store.id, epoch_version),
            };
        }
        let identity = match self.index.get(region) {
            Some(cell) => cell.lock().unwrap().identity(),
            None => RegionIdentity::new(region, epoch_version),
        };
        RegionCheckpoint {
            region: identity,
            result: Err(FlushStatusError::NotFound),
        }
    }
}
