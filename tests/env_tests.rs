use std::sync::Arc;

use regionsim::cluster::Cluster;
use regionsim::env::{AdvancerEnv, EnvError, EventType, TestEnv};
use regionsim::flush::FlushStatusError;
use regionsim::key_range::KeyRange;
use regionsim::probe::{self, ProbeFailure};
use regionsim::region::StoreId;
use regionsim::settings::SimConfig;
use tokio::sync::mpsc;

fn env(stores: usize, seed: u64) -> TestEnv {
    let cfg = SimConfig::default().with_stores(stores).with_seed(seed);
    TestEnv::new(Arc::new(Cluster::new(&cfg).unwrap()))
}

#[regionsim::test]
async fn test_begin_task_defaults_to_whole_key_space() {
    let env = env(3, 1);
    let (tx, mut rx) = mpsc::channel(4);
    env.begin_task(tx).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::Add);
    assert_eq!(event.name, "whole");
    assert_eq!(event.info.name, "whole");
    assert_eq!(event.ranges, vec![KeyRange::full()]);

    // Exactly one event, and the sender was consumed.
    assert!(rx.recv().await.is_none());
}

#[regionsim::test]
async fn test_begin_task_with_ranges() {
    let ranges = vec![KeyRange::new("a", "c"), KeyRange::new("x", "")];
    let env = env(3, 1).with_ranges(ranges.clone()).with_task_name("orders");
    let (tx, mut rx) = mpsc::channel(1);
    env.begin_task(tx).await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.name, "orders");
    assert_eq!(event.ranges, ranges);
}

#[regionsim::test]
async fn test_begin_task_closed_channel() {
    let env = env(3, 1);
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    assert!(matches!(env.begin_task(tx).await, Err(EnvError::ChannelClosed)));
}

#[regionsim::test]
async fn test_persist_is_monotonic() {
    let env = env(3, 1);
    env.persist_global_checkpoint("whole", 10).await.unwrap();
    env.persist_global_checkpoint("whole", 10).await.unwrap();
    env.persist_global_checkpoint("whole", 25).await.unwrap();
    assert_eq!(env.checkpoint(), 25);

    env.clear_global_checkpoint("whole").await.unwrap();
    assert_eq!(env.checkpoint(), 0);
    env.persist_global_checkpoint("whole", 3).await.unwrap();
    assert_eq!(env.checkpoint(), 3);
}

#[regionsim::test]
#[should_panic(expected = "checkpoint rolling back (from 25 to 24)")]
async fn test_persist_rollback_is_fatal() {
    let env = env(3, 1);
    env.persist_global_checkpoint("whole", 25).await.unwrap();
    env.persist_global_checkpoint("whole", 24).await.unwrap();
}

#[regionsim::test]
async fn test_unreachable_surfaces_through_env() {
    let env = env(3, 1);
    env.cluster().set_on_get_client(|_| Err("down".to_string()));
    assert!(matches!(
        env.flush_client(StoreId(1)).await,
        Err(EnvError::Cluster(_))
    ));
}

#[regionsim::test]
async fn test_probe_converges_after_flush_all() {
    let env = env(5, 8);
    let cluster = env.cluster().clone();
    cluster.split_and_scatter(["c", "h", "q"]);

    for _ in 0..10 {
        let expected = cluster.advance_checkpoints();
        cluster.flush_all();
        let persisted = probe::advance_once(&env, "whole", &[KeyRange::full()]).await.unwrap();
        assert_eq!(persisted, Some(expected));
        assert_eq!(env.checkpoint(), expected);
    }
}

#[regionsim::test]
async fn test_probe_bounded_by_unflushed_region() {
    let env = env(5, 8);
    let cluster = env.cluster().clone();
    cluster.split_and_scatter(["c", "h", "q"]);
    let first = cluster.advance_checkpoints();
    cluster.flush_all();
    probe::advance_once(&env, "whole", &[KeyRange::full()]).await.unwrap();
    assert_eq!(env.checkpoint(), first);

    cluster.advance_checkpoints();
    cluster.flush_all_except(["k"]);
    let report = probe::probe_range(&env, &KeyRange::full()).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].1, ProbeFailure::Flush(FlushStatusError::NotFlushed));
    assert_eq!(report.checkpoints.len(), 3);

    assert_eq!(probe::advance_once(&env, "whole", &[KeyRange::full()]).await.unwrap(), None);
    assert_eq!(env.checkpoint(), first);
}

#[regionsim::test]
async fn test_probe_sub_range_ignores_other_regions() {
    let env = env(3, 2);
    let cluster = env.cluster().clone();
    cluster.split_at(b"m").unwrap();
    cluster.advance_checkpoints();
    cluster.flush_all_except(["z"]);

    let head = KeyRange::new("", "m");
    let report = probe::probe_range(&env, &head).await.unwrap();
    assert!(report.is_complete());
    let left = cluster.regions()[0].checkpoint;
    assert_eq!(report.global_checkpoint(), Some(left));
}

#[regionsim::test]
async fn test_probe_stale_after_split_between_scan_and_dispatch() {
    let env = env(3, 2);
    let cluster = env.cluster().clone();
    cluster.advance_checkpoints();

    let scanned = env.region_scan(b"", b"", usize::MAX).await.unwrap();
    cluster.split_at(b"m").unwrap();
    cluster.flush_all();

    let client = env.flush_client(scanned[0].leader).await.unwrap();
    let resp = client.check_last_flush(scanned[0].id, scanned[0].epoch);
    assert_eq!(resp.result, Err(FlushStatusError::EpochMismatch));
    assert_eq!(resp.region.epoch_version, 1);

    // A fresh scan picks up the new generation and converges.
    let report = probe::probe_range(&env, &KeyRange::full()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.checkpoints.len(), 2);
}

#[regionsim::test]
async fn test_probe_records_unreachable_store() {
    let env = env(3, 2);
    let cluster = env.cluster().clone();
    cluster.advance_checkpoints();
    cluster.flush_all();
    cluster.set_on_get_client(|store| {
        if store == StoreId(1) {
            Err("partitioned".to_string())
        } else {
            Ok(())
        }
    });

    let report = probe::probe_range(&env, &KeyRange::full()).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0].1,
        ProbeFailure::Unreachable { store, .. } if *store == StoreId(1)
    ));
    assert_eq!(report.global_checkpoint(), None);
}

#[regionsim::test]
async fn test_advance_covers_every_task_range() {
    let env = env(3, 4);
    let cluster = env.cluster().clone();
    cluster.split_at(b"f").unwrap();
    cluster.split_at(b"p").unwrap();
    let ranges = [KeyRange::new("a", "c"), KeyRange::new("q", "")];

    cluster.advance_checkpoints();
    cluster.flush_all_except(["z"]);
    assert_eq!(probe::advance_once(&env, "whole", &ranges).await.unwrap(), None);
    assert_eq!(env.checkpoint(), 0);

    cluster.flush_all();
    let regions = cluster.regions();
    let expected = regions[0].checkpoint.min(regions[2].checkpoint);
    assert_eq!(probe::advance_once(&env, "whole", &ranges).await.unwrap(), Some(expected));
    assert_eq!(env.checkpoint(), expected);
}
