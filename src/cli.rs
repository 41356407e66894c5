//! CLI helper functions

use crate::{
    config::Settings,
    destination::SqliteDestination,
    etl::{Pipeline, PipelineRun},
    storage::{SnapshotInfo, StagingStore},
    worker::Worker,
};
use eyre::{Context, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Load settings from an optional YAML file plus `ETL_*` environment variables
pub fn load_settings(config: Option<&Path>) -> Result<Settings> {
    let settings = Settings::load(config).context("Failed to load settings")?;
    log::debug!("Settings: {:?}", redacted(&settings));
    Ok(settings)
}

fn redacted(settings: &Settings) -> Settings {
    let mut settings = settings.clone();
    if settings.data_sources.api_key.is_some() {
        settings.data_sources.api_key = Some("<redacted>".to_string());
    }
    settings
}

/// Run the pipeline once
///
/// A degraded run (load pending) is still `Ok`; only a failed run is an error.
pub async fn run_once(settings: Settings, cancel: &CancellationToken) -> Result<PipelineRun> {
    let pipeline = Pipeline::from_settings(settings).context("Failed to set up pipeline")?;
    let run = pipeline.run(cancel).await.context("ETL run failed")?;
    Ok(run)
}

/// Run the pipeline on startup and then every configured interval until cancelled
pub async fn run_worker(settings: Settings, cancel: &CancellationToken) -> Result<usize> {
    let interval = settings.run_interval();
    let pipeline = Pipeline::from_settings(settings).context("Failed to set up pipeline")?;
    Ok(Worker::new(pipeline, interval).run(cancel).await)
}

/// Create the destination database and its tables if missing
pub fn init_destination(settings: &Settings) -> Result<PathBuf> {
    let path = settings.destination.clone();
    let destination = SqliteDestination::open(&path)
        .with_context(|| format!("Failed to open destination: {}", path.display()))?;
    destination
        .ensure_schema()
        .with_context(|| format!("Failed to create schema in {}", path.display()))?;
    Ok(path)
}

/// Snapshots staged for `name`, oldest first
pub fn list_snapshots(settings: &Settings, name: &str) -> Result<Vec<SnapshotInfo>> {
    let staging = open_staging(settings)?;
    staging
        .snapshots(name)
        .with_context(|| format!("Failed to list staging snapshots for {}", name))
}

/// Delete every snapshot staged for `name`
pub fn clear_snapshots(settings: &Settings, name: &str) -> Result<usize> {
    let staging = open_staging(settings)?;
    staging
        .clear(name)
        .with_context(|| format!("Failed to clear staging snapshots for {}", name))
}

fn open_staging(settings: &Settings) -> Result<StagingStore> {
    StagingStore::new(&settings.etl.staging_path).with_context(|| {
        format!(
            "Failed to open staging directory: {}",
            settings.etl.staging_path.display()
        )
    })
}
