//! Per-run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Extract => "extract",
            Phase::Transform => "transform",
            Phase::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceStatus {
    /// Records were extracted (possibly none) and staged
    Staged,
    /// Extraction failed; nothing was staged
    Failed,
    /// The source is not configured for this run
    Skipped,
}

/// What happened to one staged entity during extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub status: SourceStatus,
    pub record_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn staged(record_count: usize) -> Self {
        Self {
            status: SourceStatus::Staged,
            record_count,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: SourceStatus::Failed,
            record_count: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: SourceStatus::Skipped,
            record_count: 0,
            error: None,
        }
    }
}

/// A load that stopped early; the listed entities stay in staging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPending {
    pub table: String,
    pub error: String,
    /// Transformed record counts that were not (or not fully) loaded
    pub staged: BTreeMap<String, usize>,
}

/// Report for one pipeline run that reached the end of the load phase.
///
/// A run with [`PipelineRun::load_pending`] set is degraded: extraction and
/// transformation succeeded but some entities are only in staging.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub started_at: DateTime<Utc>,
    /// Elapsed milliseconds per phase
    pub phase_timings: BTreeMap<Phase, u64>,
    /// Keyed by staged entity name
    pub sources: BTreeMap<String, SourceOutcome>,
    /// Record counts written as `{Name}_Transformed`
    pub transformed: BTreeMap<String, usize>,
    /// Rows written to the destination, per table
    pub loaded: BTreeMap<String, usize>,
    pub load_pending: Option<LoadPending>,
}

impl PipelineRun {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            phase_timings: BTreeMap::new(),
            sources: BTreeMap::new(),
            transformed: BTreeMap::new(),
            loaded: BTreeMap::new(),
            load_pending: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.load_pending.is_some()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .filter(|(_, outcome)| outcome.status == SourceStatus::Failed)
            .map(|(name, _)| name.as_str())
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.phase_timings.values().sum()
    }

    /// Log a one-line summary plus any failures
    pub fn log_summary(&self) {
        let loaded: usize = self.loaded.values().sum();
        log::info!(
            "ETL run finished in {} ms: {} sources, {} rows loaded",
            self.total_elapsed_ms(),
            self.sources.len(),
            loaded
        );
        for name in self.failed_sources() {
            log::warn!("Source {} failed during this run", name);
        }
        if let Some(pending) = &self.load_pending {
            log::warn!(
                "Load stopped at {}: {}; staged counts: {:?}",
                pending.table,
                pending.error,
                pending.staged
            );
        }
    }
}
