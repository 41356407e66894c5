//! Timestamped staging snapshots
//!
//! One JSON file per snapshot, named `{source}_{yyyyMMdd_HHmmss}_{ffffff}.json`
//! (UTC). Files in the plain `{source}_{yyyyMMdd_HHmmss}.json` form are read as
//! well. For any source name, the snapshot with the greatest timestamp wins.

use crate::error::StagingError;
use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A snapshot file found in the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub source_name: String,
    pub captured_at: NaiveDateTime,
    pub path: PathBuf,
}

/// Staging area rooted at one directory.
///
/// Snapshots are write-once: `save` never replaces or removes an existing
/// file, and older snapshots stay on disk until `clear` is called.
///
/// # Example
/// ```no_run
/// use analytics_etl::storage::StagingStore;
///
/// # fn example() -> Result<(), analytics_etl::error::StagingError> {
/// let staging = StagingStore::new("staging")?;
/// staging.save("Numbers", &[1, 2, 3])?;
/// let numbers: Vec<i32> = staging.load("Numbers")?;
/// assert_eq!(numbers, vec![1, 2, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StagingStore {
    path: PathBuf,
}

impl StagingStore {
    /// Open a staging area, creating the directory if needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StagingError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            std::fs::create_dir_all(&path).map_err(|source| StagingError::Write {
                path: path.clone(),
                source,
            })?;
            log::info!("Created staging directory: {}", path.display());
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a new snapshot for `source_name` and return its path
    ///
    /// # Errors
    /// Returns [`StagingError::Encode`] if the records cannot be serialized and
    /// [`StagingError::Write`] if the file cannot be written
    pub fn save<T: Serialize>(
        &self,
        source_name: &str,
        records: &[T],
    ) -> Result<PathBuf, StagingError> {
        let json =
            serde_json::to_vec_pretty(records).map_err(|source| StagingError::Encode {
                source_name: source_name.to_string(),
                source,
            })?;

        let mut captured_at = truncate_to_micros(Utc::now().naive_utc());
        let temp = self.path.join(format!(
            ".{}_{}_{}.tmp",
            source_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&temp, &json).map_err(|source| StagingError::Write {
            path: temp.clone(),
            source,
        })?;

        // Publishing never replaces an existing file, so a name taken by a
        // concurrent save is bumped by one microsecond and retried
        let published = loop {
            let candidate = self.path.join(snapshot_file_name(source_name, &captured_at));
            match publish(&temp, &candidate, &json) {
                Ok(()) => break Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    captured_at += TimeDelta::microseconds(1);
                }
                Err(source) => {
                    break Err(StagingError::Write {
                        path: candidate,
                        source,
                    });
                }
            }
        };
        if let Err(e) = std::fs::remove_file(&temp) {
            log::debug!("Failed to remove {}: {}", temp.display(), e);
        }
        let target = published?;

        log::info!(
            "Saved {} records for {} to {}",
            records.len(),
            source_name,
            target.display()
        );
        Ok(target)
    }

    /// Read the most recent snapshot for `source_name`
    ///
    /// Returns an empty sequence when no snapshot exists.
    ///
    /// # Errors
    /// Returns [`StagingError::Read`] if the snapshot cannot be read and
    /// [`StagingError::Corrupt`] if its content is not a JSON array of `T`
    pub fn load<T: DeserializeOwned>(&self, source_name: &str) -> Result<Vec<T>, StagingError> {
        let Some(latest) = self.latest(source_name)? else {
            log::warn!("No staging files found for {}", source_name);
            return Ok(Vec::new());
        };

        let content = std::fs::read(&latest.path).map_err(|source| StagingError::Read {
            path: latest.path.clone(),
            source,
        })?;
        let records: Option<Vec<T>> =
            serde_json::from_slice(&content).map_err(|source| StagingError::Corrupt {
                path: latest.path.clone(),
                source,
            })?;
        let records = records.unwrap_or_default();

        log::info!(
            "Loaded {} records from staging file {}",
            records.len(),
            latest.path.display()
        );
        Ok(records)
    }

    /// Delete every snapshot for `source_name`, returning how many were removed
    pub fn clear(&self, source_name: &str) -> Result<usize, StagingError> {
        let snapshots = self.snapshots(source_name)?;
        for snapshot in &snapshots {
            std::fs::remove_file(&snapshot.path).map_err(|source| StagingError::Write {
                path: snapshot.path.clone(),
                source,
            })?;
        }
        log::info!(
            "Cleared {} staging files for {}",
            snapshots.len(),
            source_name
        );
        Ok(snapshots.len())
    }

    /// All snapshots for `source_name`, oldest first
    pub fn snapshots(&self, source_name: &str) -> Result<Vec<SnapshotInfo>, StagingError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let pattern = snapshot_pattern(source_name)?;
        let entries = std::fs::read_dir(&self.path).map_err(|source| StagingError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StagingError::Read {
                path: self.path.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(captured_at) = parse_captured_at(&pattern, file_name) {
                snapshots.push(SnapshotInfo {
                    source_name: source_name.to_string(),
                    captured_at,
                    path: entry.path(),
                });
            }
        }

        snapshots.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(snapshots)
    }

    /// The snapshot `load` would read, if any
    pub fn latest(&self, source_name: &str) -> Result<Option<SnapshotInfo>, StagingError> {
        Ok(self.snapshots(source_name)?.pop())
    }
}

fn truncate_to_micros(value: NaiveDateTime) -> NaiveDateTime {
    let micros = value.and_utc().timestamp_subsec_micros();
    value.with_nanosecond(micros * 1_000).unwrap_or(value)
}

/// Link `temp` to `target`, or write `json` to `target` when the file system
/// has no hard links. Both fail with `AlreadyExists` if `target` exists.
fn publish(temp: &Path, target: &Path, json: &[u8]) -> std::io::Result<()> {
    match std::fs::hard_link(temp, target) {
        Err(e) if e.kind() != ErrorKind::AlreadyExists => {
            log::debug!(
                "Hard link to {} failed ({}), writing it in place",
                target.display(),
                e
            );
            write_new(target, json)
        }
        result => result,
    }
}

/// Create `target` and write `json` to it, refusing an existing file
fn write_new(target: &Path, json: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)?;
    let written = file.write_all(json).and_then(|()| file.sync_all());
    if written.is_err() {
        drop(file);
        let _ = std::fs::remove_file(target);
    }
    written
}

fn snapshot_file_name(source_name: &str, captured_at: &NaiveDateTime) -> String {
    format!(
        "{}_{}_{:06}.json",
        source_name,
        captured_at.format(TIMESTAMP_FORMAT),
        captured_at.and_utc().timestamp_subsec_micros()
    )
}

// The name is matched exactly, so "Customers" never picks up "Customers_Transformed_*".
fn snapshot_pattern(source_name: &str) -> Result<Regex, StagingError> {
    let pattern = format!(
        r"^{}_(\d{{8}}_\d{{6}})(?:_(\d{{1,9}}))?\.json$",
        regex::escape(source_name)
    );
    Regex::new(&pattern).map_err(|source| StagingError::InvalidName {
        source_name: source_name.to_string(),
        source,
    })
}

fn parse_captured_at(pattern: &Regex, file_name: &str) -> Option<NaiveDateTime> {
    let captures = pattern.captures(file_name)?;
    let base = NaiveDateTime::parse_from_str(&captures[1], TIMESTAMP_FORMAT).ok()?;
    let Some(fraction) = captures.get(2) else {
        return Some(base);
    };
    // Right-pad to nanoseconds: "5" is 0.5s, "000250" is 250us
    let digits = format!("{:0<9}", fraction.as_str());
    let nanos: u32 = digits.parse().ok()?;
    base.with_nanosecond(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        name: String,
    }

    fn rows(ids: &[i64]) -> Vec<Row> {
        ids.iter()
            .map(|id| Row {
                id: *id,
                name: format!("row-{}", id),
            })
            .collect()
    }

    #[test]
    fn test_load_without_snapshot_is_empty() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();

        let loaded: Vec<Row> = staging.load("Nothing").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();
        let data = rows(&[3, 1, 2]);

        staging.save("Rows", &data).unwrap();
        let loaded: Vec<Row> = staging.load("Rows").unwrap();

        assert_eq!(loaded, data);
    }

    #[test]
    fn test_latest_wins_and_older_snapshots_are_kept() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();

        let first = staging.save("Rows", &rows(&[1])).unwrap();
        let second = staging.save("Rows", &rows(&[2])).unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert_eq!(staging.snapshots("Rows").unwrap().len(), 2);

        let loaded: Vec<Row> = staging.load("Rows").unwrap();
        assert_eq!(loaded, rows(&[2]));
    }

    #[test]
    fn test_second_precision_names_are_ordered() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();

        std::fs::write(
            temp.path().join("Rows_20240101_130000.json"),
            serde_json::to_string(&rows(&[13])).unwrap(),
        )
        .unwrap();
        std::fs::write(
            temp.path().join("Rows_20240101_120000.json"),
            serde_json::to_string(&rows(&[12])).unwrap(),
        )
        .unwrap();
        std::fs::write(
            temp.path().join("Rows_20240101_125959_5.json"),
            serde_json::to_string(&rows(&[99])).unwrap(),
        )
        .unwrap();

        let loaded: Vec<Row> = staging.load("Rows").unwrap();
        assert_eq!(loaded, rows(&[13]));
    }

    #[test]
    fn test_names_do_not_shadow_each_other() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();

        staging.save("Rows", &rows(&[1])).unwrap();
        staging.save("Rows_Transformed", &rows(&[2])).unwrap();

        let raw: Vec<Row> = staging.load("Rows").unwrap();
        let transformed: Vec<Row> = staging.load("Rows_Transformed").unwrap();

        assert_eq!(raw, rows(&[1]));
        assert_eq!(transformed, rows(&[2]));
        assert_eq!(staging.snapshots("Rows").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_is_a_read_error() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("Rows_20240101_120000.json"), "[{\"id\": 1,").unwrap();

        let err = staging.load::<Row>("Rows").unwrap_err();

        assert!(matches!(err, StagingError::Corrupt { .. }));
        assert!(!err.is_write());
    }

    #[test]
    fn test_null_snapshot_is_empty() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("Rows_20240101_120000.json"), "null").unwrap();

        assert!(staging.load::<Row>("Rows").unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_only_that_source() {
        let temp = TempDir::new().unwrap();
        let staging = StagingStore::new(temp.path()).unwrap();
        staging.save("Rows", &rows(&[1])).unwrap();
        staging.save("Rows", &rows(&[2])).unwrap();
        staging.save("Other", &rows(&[3])).unwrap();

        assert_eq!(staging.clear("Rows").unwrap(), 2);

        assert!(staging.load::<Row>("Rows").unwrap().is_empty());
        assert_eq!(staging.load::<Row>("Other").unwrap(), rows(&[3]));
    }

    #[test]
    fn test_creates_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("staging");

        let staging = StagingStore::new(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(staging.path(), nested.as_path());
    }

    #[test]
    fn test_parse_captured_at() {
        let pattern = snapshot_pattern("Customers").unwrap();

        let micros = parse_captured_at(&pattern, "Customers_20240101_120000_000250.json").unwrap();
        assert_eq!(micros.format("%H:%M:%S%.6f").to_string(), "12:00:00.000250");

        assert!(parse_captured_at(&pattern, "Customers_20240101_120000.json").is_some());
        assert!(parse_captured_at(&pattern, "Customers_Transformed_20240101_120000.json").is_none());
        assert!(parse_captured_at(&pattern, ".Customers_20240101_120000.json.tmp").is_none());
    }

    #[test]
    fn test_write_new_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("Customers_20240101_120000.json");

        write_new(&target, b"[1]").unwrap();
        let err = write_new(&target, b"[2]").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"[1]");
    }

    #[test]
    fn test_publish_refuses_taken_name() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join(".pending.tmp");
        let target = temp.path().join("Customers_20240101_120000.json");
        std::fs::write(&source, b"[2]").unwrap();
        std::fs::write(&target, b"[1]").unwrap();

        let err = publish(&source, &target, b"[2]").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&target).unwrap(), b"[1]");
    }
}
