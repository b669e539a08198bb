//! A deterministic, in-process simulator of a region-sharded, leader-replicated
//! key-value cluster, built to drive a log-backup checkpoint advancer through
//! splits, leader moves and partial flushes.

extern crate self as regionsim;

pub mod cluster;
pub mod env;
pub mod flush;
pub mod key_range;
pub mod probe;
pub mod region;
pub mod settings;
pub mod store;
pub mod trace;

pub use regionsim_macros::test;
