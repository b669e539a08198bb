//! The simulated cluster.
//!
//! `Cluster` owns every store and region. Structural operations (split,
//! scatter, leader moves, checkpoint rounds) and region scans serialize on a
//! single coordination lock. Flush-status queries go through per-region locks
//! only, so they can run alongside a checkpoint round without ever observing
//! a half-updated region.
//!
//! Lock order is coordination → store → region.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info, warn};

use crate::key_range::{KeyRange, KeyRangeError, hex, overlaps};
use crate::region::{Region, RegionId, RegionWithLeader, StoreId};
use crate::settings::SimConfig;
use crate::store::{FlushClient, RegionIndex, SharedRegion, Store};

/// Largest accepted `max_checkpoint_step`. Leaves room for about a million
/// rounds at the maximum step before a checkpoint could overflow.
pub const MAX_CHECKPOINT_STEP: u64 = u64::MAX >> 20;

/// Hook consulted before handing out a flush client; an `Err` makes the
/// store look unreachable.
pub type ClientHook = Box<dyn Fn(StoreId) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster needs at least one store")]
    NoStores,
    #[error(transparent)]
    KeyRange(#[from] KeyRangeError),
    #[error("region {0} not found")]
    RegionNotFound(RegionId),
    #[error("store {store} does not host region {region}")]
    StoreNotHostingRegion { store: StoreId, region: RegionId },
    #[error("region {0} needs at least one replica")]
    EmptyReplicaSet(RegionId),
    #[error("store {store} unreachable: {reason}")]
    Unreachable { store: StoreId, reason: String },
    #[error("max checkpoint step {step} exceeds {max}")]
    CheckpointStepTooLarge { step: u64, max: u64 },
    #[error("key space is not partitioned: {0}")]
    PartitionViolation(String),
    #[error("replica placement is inconsistent: {0}")]
    PlacementViolation(String),
}

/// State guarded by the coordination lock.
struct Topology {
    id_alloced: u64,
    /// Live regions ordered by start key.
    regions: Vec<SharedRegion>,
    rng: Box<dyn RngCore + Send>,
}

impl Topology {
    fn id_alloc(&mut self) -> u64 {
        self.id_alloced += 1;
        self.id_alloced
    }

    /// Index of the region containing `key`.
    ///
    /// Panics if no region does, which means the partition is broken.
    fn position_of_key(&self, key: &[u8]) -> usize {
        self.regions
            .iter()
            .position(|r| r.lock().unwrap().range.contains(key))
            .unwrap_or_else(|| panic!("inconsistent key space; key = {}", hex(key)))
    }
}

pub struct Cluster {
    topology: Mutex<Topology>,
    /// Fixed at construction.
    stores: BTreeMap<StoreId, Arc<Store>>,
    index: Arc<RegionIndex>,
    on_get_client: RwLock<Option<ClientHook>>,
    replicas: usize,
    max_checkpoint_step: u64,
}

impl Cluster {
    /// Build a cluster from config, seeding randomness from `cfg.seed` when set.
    pub fn new(cfg: &SimConfig) -> Result<Self, ClusterError> {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(cfg, rng)
    }

    /// Build a cluster drawing placement and checkpoint randomness from `rng`.
    ///
    /// Stores get ids `1..=cfg.stores`; the single initial region spans the
    /// whole key space at epoch 0, is led by the first store and replicated on
    /// the first `cfg.replicas` stores.
    pub fn with_rng<R: RngCore + Send + 'static>(cfg: &SimConfig, rng: R) -> Result<Self, ClusterError> {
        if cfg.stores == 0 {
            return Err(ClusterError::NoStores);
        }
        if cfg.max_checkpoint_step > MAX_CHECKPOINT_STEP {
            return Err(ClusterError::CheckpointStepTooLarge {
                step: cfg.max_checkpoint_step,
                max: MAX_CHECKPOINT_STEP,
            });
        }
        let mut topology = Topology {
            id_alloced: 0,
            regions: Vec::new(),
            rng: Box::new(rng),
        };

        let mut stores = BTreeMap::new();
        let mut order = Vec::with_capacity(cfg.stores);
        for _ in 0..cfg.stores {
            let id = StoreId(topology.id_alloc());
            stores.insert(id, Arc::new(Store::new(id)));
            order.push(id);
        }

        let region_id = RegionId(topology.id_alloc());
        let initial: SharedRegion = Arc::new(Mutex::new(Region::new(
            region_id,
            KeyRange::full(),
            order[0],
            cfg.flush_simulation,
        )));
        let replicas = cfg.replicas.max(1);
        for id in order.iter().take(replicas) {
            stores[id].host(region_id, &initial);
        }

        let index = Arc::new(RegionIndex::default());
        index.insert(region_id, initial.clone());
        topology.regions.push(initial);

        info!(stores = cfg.stores, flush_simulation = cfg.flush_simulation, "cluster created");
        Ok(Self {
            topology: Mutex::new(topology),
            stores,
            index,
            on_get_client: RwLock::new(None),
            replicas,
            max_checkpoint_step: cfg.max_checkpoint_step.max(1),
        })
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        self.stores.keys().copied().collect()
    }

    pub fn store(&self, id: StoreId) -> Option<Arc<Store>> {
        self.stores.get(&id).cloned()
    }

    fn store_or_die(&self, id: StoreId) -> &Arc<Store> {
        self.stores
            .get(&id)
            .unwrap_or_else(|| panic!("the store {id} doesn't exist"))
    }

    /// Regions overlapping `[key, end_key)` in ascending key order, at most `limit`.
    pub fn region_scan(&self, key: &[u8], end_key: &[u8], limit: usize) -> Vec<RegionWithLeader> {
        let topo = self.topology.lock().unwrap();
        let wanted = KeyRange::new(key, end_key);
        let mut result = Vec::new();
        if limit == 0 {
            return result;
        }
        for cell in &topo.regions {
            let region = cell.lock().unwrap();
            if !end_key.is_empty() && region.range.start_key.as_slice() >= end_key {
                break;
            }
            if overlaps(&wanted, &region.range) {
                result.push(region.with_leader());
                if result.len() >= limit {
                    break;
                }
            }
        }
        result
    }

    /// A flush-status client bound to `store`.
    ///
    /// Fails with `Unreachable` when the injected hook rejects the store.
    /// Panics if the store was never created.
    pub fn flush_client(&self, store: StoreId) -> Result<FlushClient, ClusterError> {
        if let Some(hook) = self.on_get_client.read().unwrap().as_ref() {
            if let Err(reason) = hook(store) {
                warn!(%store, %reason, "store unreachable");
                return Err(ClusterError::Unreachable { store, reason });
            }
        }
        let s = self.store_or_die(store);
        Ok(FlushClient::new(s.clone(), self.index.clone()))
    }

    pub fn set_on_get_client<F>(&self, hook: F)
    where
        F: Fn(StoreId) -> Result<(), String> + Send + Sync + 'static,
    {
        *self.on_get_client.write().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_on_get_client(&self) {
        *self.on_get_client.write().unwrap() = None;
    }

    /// The region currently containing `key`.
    pub fn find_region_by_key(&self, key: &[u8]) -> RegionWithLeader {
        let topo = self.topology.lock().unwrap();
        let idx = topo.position_of_key(key);
        topo.regions[idx].lock().unwrap().with_leader()
    }

    /// Split the region containing `key` at `key`. Returns the new region's id.
    pub fn split_at(&self, key: &[u8]) -> Result<RegionId, ClusterError> {
        let mut topo = self.topology.lock().unwrap();
        self.split_locked(&mut topo, key)
    }

    fn split_locked(&self, topo: &mut Topology, key: &[u8]) -> Result<RegionId, ClusterError> {
        let idx = topo.position_of_key(key);
        let original = topo.regions[idx].clone();
        let new_id = RegionId(topo.id_alloced + 1);
        let (original_id, new_region) = {
            let mut r = original.lock().unwrap();
            let new_region = r.split_at(new_id, key)?;
            info!(region = %r.id, new_region = %new_id, key = %hex(key), epoch = r.epoch, "region split");
            (r.id, new_region)
        };
        topo.id_alloc();

        let cell: SharedRegion = Arc::new(Mutex::new(new_region));
        for store in self.stores.values() {
            if store.hosts(original_id) {
                store.host(new_id, &cell);
            }
        }
        self.index.insert(new_id, cell.clone());
        topo.regions.insert(idx + 1, cell);
        Ok(new_id)
    }

    /// Split at every key, then re-place every region on a random replica set
    /// with a random leader, all under one lock acquisition.
    ///
    /// Keys that already start a region are skipped.
    pub fn split_and_scatter<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut guard = self.topology.lock().unwrap();
        let topo = &mut *guard;
        for key in keys {
            let key = key.as_ref();
            let idx = topo.position_of_key(key);
            if topo.regions[idx].lock().unwrap().range.start_key.as_slice() == key {
                debug!(key = %hex(key), "split key already a region boundary");
                continue;
            }
            if let Err(err) = self.split_locked(topo, key) {
                // Only boundary keys can be rejected and those were skipped above.
                warn!(key = %hex(key), %err, "split skipped");
            }
        }
        let ids: Vec<RegionId> = topo.regions.iter().map(|r| r.lock().unwrap().id).collect();
        for id in ids {
            let chosen = self.choose_stores(topo, self.replicas);
            if let Some(&leader) = chosen.choose(&mut topo.rng) {
                self.transfer_locked(id, &chosen, leader);
            }
        }
        info!(regions = topo.regions.len(), "regions scattered");
    }

    fn choose_stores(&self, topo: &mut Topology, n: usize) -> Vec<StoreId> {
        let mut ids = self.store_ids();
        ids.shuffle(&mut topo.rng);
        ids.truncate(n);
        ids
    }

    /// Replace `region`'s replica set with `peers`. If the current leader is
    /// not among them, leadership moves to the first peer.
    pub fn transfer_region_to(&self, region: RegionId, peers: &[StoreId]) -> Result<(), ClusterError> {
        let _topo = self.topology.lock().unwrap();
        let cell = self.index.get(region).ok_or(ClusterError::RegionNotFound(region))?;
        let first = *peers.first().ok_or(ClusterError::EmptyReplicaSet(region))?;
        for peer in peers {
            self.store_or_die(*peer);
        }
        let current = cell.lock().unwrap().leader;
        let leader = if peers.contains(&current) { current } else { first };
        self.transfer_locked(region, peers, leader);
        Ok(())
    }

    /// Host `region` on `peers`, hand leadership to `leader`, then drop the
    /// other replicas. A concurrent reader never sees a leader that does not
    /// host the region.
    fn transfer_locked(&self, region: RegionId, peers: &[StoreId], leader: StoreId) {
        let Some(cell) = self.index.get(region) else {
            return;
        };
        for id in peers {
            self.stores[id].host(region, &cell);
        }
        cell.lock().unwrap().leader = leader;
        for store in self.stores.values() {
            if !peers.contains(&store.id()) {
                store.unhost(region);
            }
        }
    }

    /// Stores currently replicating `region`, in id order.
    pub fn find_peers(&self, region: RegionId) -> Vec<StoreId> {
        self.stores
            .values()
            .filter(|s| s.hosts(region))
            .map(|s| s.id())
            .collect()
    }

    fn shuffle_leader_locked(&self, topo: &mut Topology, region: RegionId) {
        let peers = self.find_peers(region);
        let (Some(cell), Some(leader)) = (self.index.get(region), peers.choose(&mut topo.rng)) else {
            return;
        };
        cell.lock().unwrap().leader = *leader;
    }

    /// Re-pick every region's leader at random among its peers.
    pub fn shuffle_leaders(&self) {
        let mut guard = self.topology.lock().unwrap();
        let topo = &mut *guard;
        let ids: Vec<RegionId> = topo.regions.iter().map(|r| r.lock().unwrap().id).collect();
        for id in ids {
            self.shuffle_leader_locked(topo, id);
        }
        debug!("leaders shuffled");
    }

    /// Move `region`'s leadership to `store`, which must already host it.
    pub fn transfer_leader(&self, region: RegionId, store: StoreId) -> Result<(), ClusterError> {
        let _topo = self.topology.lock().unwrap();
        let cell = self.index.get(region).ok_or(ClusterError::RegionNotFound(region))?;
        if !self.store_or_die(store).hosts(region) {
            return Err(ClusterError::StoreNotHostingRegion { store, region });
        }
        cell.lock().unwrap().leader = store;
        Ok(())
    }

    /// Apply `mutate` to one region under its lock.
    ///
    /// Intended for tests; changing the range through it can break the partition.
    pub fn update_region<F>(&self, region: RegionId, mutate: F) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut Region),
    {
        let _topo = self.topology.lock().unwrap();
        let cell = self.index.get(region).ok_or(ClusterError::RegionNotFound(region))?;
        mutate(&mut cell.lock().unwrap());
        Ok(())
    }

    /// Run one checkpoint round: every region advances by a random positive
    /// step and forgets its flush confirmation. Returns the new minimum.
    pub fn advance_checkpoints(&self) -> u64 {
        let mut guard = self.topology.lock().unwrap();
        let topo = &mut *guard;
        let mut min_checkpoint = u64::MAX;
        for cell in &topo.regions {
            // Stores never report a zero checkpoint, so the step is never zero.
            let step = topo.rng.random_range(1..=self.max_checkpoint_step);
            let mut r = cell.lock().unwrap();
            let next = r
                .checkpoint
                .checked_add(step)
                .unwrap_or_else(|| panic!("checkpoint of region {} overflows (at {}, step {step})", r.id, r.checkpoint));
            r.checkpoint = next;
            min_checkpoint = min_checkpoint.min(r.checkpoint);
            r.flush.reset();
        }
        info!(to = min_checkpoint, "checkpoint updated");
        min_checkpoint
    }

    /// Mark every region flushed at its current epoch.
    pub fn flush_all(&self) {
        let topo = self.topology.lock().unwrap();
        for cell in &topo.regions {
            cell.lock().unwrap().flush();
        }
    }

    /// Mark every region flushed except those containing one of `keys`.
    pub fn flush_all_except<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        let topo = self.topology.lock().unwrap();
        for cell in &topo.regions {
            let mut r = cell.lock().unwrap();
            if keys.iter().any(|k| r.range.contains(k.as_ref())) {
                continue;
            }
            r.flush();
        }
    }

    /// Flush every region `store` currently leads. Returns how many.
    pub fn flush_store(&self, store: StoreId) -> usize {
        let _topo = self.topology.lock().unwrap();
        self.store_or_die(store).flush_led()
    }

    /// Snapshot of every live region in key order.
    pub fn regions(&self) -> Vec<Region> {
        let topo = self.topology.lock().unwrap();
        topo.regions.iter().map(|r| r.lock().unwrap().clone()).collect()
    }

    pub fn region(&self, id: RegionId) -> Option<Region> {
        self.index.get(id).map(|r| r.lock().unwrap().clone())
    }

    /// Check the partition and placement invariants.
    pub fn validate(&self) -> Result<(), ClusterError> {
        let regions = self.regions();
        let (Some(first), Some(last)) = (regions.first(), regions.last()) else {
            return Err(ClusterError::PartitionViolation("no regions".to_string()));
        };
        if !first.range.start_key.is_empty() {
            return Err(ClusterError::PartitionViolation(format!(
                "first region {} starts at {}",
                first.id,
                hex(&first.range.start_key)
            )));
        }
        if !last.range.is_end_unbounded() {
            return Err(ClusterError::PartitionViolation(format!(
                "last region {} ends at {}",
                last.id,
                hex(&last.range.end_key)
            )));
        }
        for pair in regions.windows(2) {
            let (cur, next) = (&pair[0], &pair[1]);
            if cur.range.end_key != next.range.start_key || cur.range.start_key >= cur.range.end_key {
                return Err(ClusterError::PartitionViolation(format!(
                    "gap or overlap between regions {} {} and {} {}",
                    cur.id, cur.range, next.id, next.range
                )));
            }
        }
        for region in &regions {
            let peers = self.find_peers(region.id);
            if peers.is_empty() {
                return Err(ClusterError::EmptyReplicaSet(region.id));
            }
            if !peers.contains(&region.leader) {
                return Err(ClusterError::PlacementViolation(format!(
                    "leader {} of region {} is not among peers {:?}",
                    region.leader, region.id, peers
                )));
            }
        }
        Ok(())
    }

    /// Human-readable rendering of regions and per-store placement.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">>> fake cluster <<<\nregions: ")?;
        for region in self.regions() {
            write!(f, "{region} ")?;
        }
        writeln!(f)?;
        for store in self.stores.values() {
            writeln!(f, "{store}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_leader_hosts_region_while_replicas_move() {
        let cluster = Cluster::new(&SimConfig::default().with_stores(4).with_seed(3)).unwrap();
        let id = cluster.regions()[0].id;
        let cell = cluster.index.get(id).unwrap();
        let stop = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                while !stop.load(Ordering::Relaxed) {
                    // The leader cannot change while the region lock is held.
                    let r = cell.lock().unwrap();
                    assert!(
                        cluster.stores[&r.leader].hosts(id),
                        "leader {} does not host region {id}",
                        r.leader
                    );
                }
            });

            for round in 0..500 {
                let peers = if round % 2 == 0 { [StoreId(1)] } else { [StoreId(2)] };
                cluster.transfer_region_to(id, &peers).unwrap();
                if round % 50 == 0 {
                    cluster.split_and_scatter([vec![b'a' + (round / 50) as u8]]);
                }
            }
            stop.store(true, Ordering::Relaxed);
        });
        cluster.validate().unwrap();
    }
}
