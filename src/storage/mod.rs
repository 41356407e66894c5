//! File system storage
//!
//! Staging snapshots are the only persistent state between pipeline phases.

mod staging;

pub use staging::{SnapshotInfo, StagingStore};
