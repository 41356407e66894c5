//! Pipeline orchestration: Extract, Transform and Load over the staging area

use super::extract::{Extractor, extract_observed};
use super::load::IdentityLoader;
use super::run::{LoadPending, Phase, PipelineRun, SourceOutcome};
use super::transform::{Deduplicator, PassThrough, Transformer, ValidityFilter};
use crate::client::ApiClient;
use crate::config::Settings;
use crate::destination::{Destination, DestinationFactory, SqliteDestination};
use crate::error::{EtlError, LoadError, StagingError};
use crate::records::{Comment, Customer, Order, OrderDetail, Product, Record, Review};
use crate::sources::{ApiExtractor, CsvExtractor, DatabaseExtractor, Query};
use crate::storage::StagingStore;
use chrono::{Local, Months, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Staging name for reviews fetched from the API, merged into `Reviews`
pub const API_REVIEWS: &str = "ApiReviews";

/// How far back the database review window reaches
const REVIEW_WINDOW_MONTHS: u32 = 6;

/// Staging name of the transformed snapshot for `name`
pub fn transformed_name(name: &str) -> String {
    format!("{}_Transformed", name)
}

type GroupOutcome = Result<Vec<(String, SourceOutcome)>, EtlError>;
type GroupFuture = Pin<Box<dyn Future<Output = GroupOutcome> + Send>>;

type LoadStep =
    fn(&StagingStore, &mut IdentityLoader) -> Result<Result<usize, LoadError>, StagingError>;

/// Destination tables in foreign-key order
const LOAD_ORDER: [(&str, LoadStep); 6] = [
    (Customer::TABLE, load_table::<Customer>),
    (Product::TABLE, load_table::<Product>),
    (Order::TABLE, load_table::<Order>),
    (OrderDetail::TABLE, load_table::<OrderDetail>),
    (Review::TABLE, load_table::<Review>),
    (Comment::TABLE, load_table::<Comment>),
];

/// ETL pipeline over the CSV, database and API sources
///
/// A run either returns a [`PipelineRun`] (succeeded, possibly degraded when
/// the load stopped early) or an [`EtlError`] (failed). A failing source
/// never fails the run; its entity is simply not re-staged, so the previous
/// snapshot stays current.
///
/// # Example
/// ```no_run
/// use analytics_etl::config::Settings;
/// use analytics_etl::etl::Pipeline;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> eyre::Result<()> {
/// let pipeline = Pipeline::from_settings(Settings::load(None)?)?;
/// let run = pipeline.run(&CancellationToken::new()).await?;
/// println!("degraded: {}", run.is_degraded());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    settings: Arc<Settings>,
    staging: StagingStore,
    api: Option<ApiClient>,
    destination: DestinationFactory,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        staging: StagingStore,
        api: Option<ApiClient>,
        destination: DestinationFactory,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            staging,
            api,
            destination,
        }
    }

    /// Build the staging area, API client and SQLite destination from settings
    ///
    /// # Errors
    /// The staging directory cannot be created or the API client cannot be built
    pub fn from_settings(settings: Settings) -> eyre::Result<Self> {
        let staging = StagingStore::new(&settings.etl.staging_path)?;

        let api = settings
            .api_url()?
            .map(|url| {
                ApiClient::try_new(
                    url,
                    settings.data_sources.api_key.clone(),
                    settings.api_timeout(),
                )
            })
            .transpose()?;

        let path = settings.destination.clone();
        let destination: DestinationFactory = Arc::new(move || {
            let destination = SqliteDestination::open(&path)?;
            destination.ensure_schema()?;
            Ok(Box::new(destination) as Box<dyn Destination>)
        });

        Ok(Self::new(settings, staging, api, destination))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Run Extract, Transform and Load once
    ///
    /// # Errors
    /// - [`EtlError::Staging`] when a snapshot cannot be written or read
    /// - [`EtlError::Cancelled`] when `cancel` fires before the run completes
    /// - [`EtlError::Unexpected`] when a phase task panics
    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineRun, EtlError> {
        let mut run = PipelineRun::new(Utc::now());

        ensure_active(cancel, Phase::Extract)?;
        let started = Instant::now();
        run.sources = self.extract_phase(cancel).await?;
        run.phase_timings.insert(Phase::Extract, elapsed_ms(started));
        log::info!(
            "Extract phase completed in {}ms",
            run.phase_timings[&Phase::Extract]
        );

        ensure_active(cancel, Phase::Transform)?;
        let started = Instant::now();
        let pipeline = self.clone();
        run.transformed = tokio::task::spawn_blocking(move || pipeline.transform_phase())
            .await
            .map_err(|e| EtlError::Unexpected(format!("transform task failed: {}", e)))??;
        run.phase_timings
            .insert(Phase::Transform, elapsed_ms(started));
        log::info!(
            "Transform phase completed in {}ms",
            run.phase_timings[&Phase::Transform]
        );

        ensure_active(cancel, Phase::Load)?;
        let started = Instant::now();
        let (loaded, pending) = self.load_phase(&run.transformed, cancel).await?;
        run.loaded = loaded;
        run.load_pending = pending;
        run.phase_timings.insert(Phase::Load, elapsed_ms(started));
        log::info!(
            "Load phase completed in {}ms",
            run.phase_timings[&Phase::Load]
        );

        run.log_summary();
        Ok(run)
    }

    async fn extract_phase(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, SourceOutcome>, EtlError> {
        let csv: GroupFuture = Box::pin(extract_csv(self.settings.clone(), self.staging.clone()));
        let database: GroupFuture =
            Box::pin(extract_database(self.settings.clone(), self.staging.clone()));
        let api: GroupFuture = Box::pin(extract_api(
            self.settings.clone(),
            self.staging.clone(),
            self.api.clone(),
        ));
        let groups = vec![("csv", csv), ("database", database), ("api", api)];

        let mut outcomes = Vec::with_capacity(groups.len());
        if self.settings.etl.parallel_extraction {
            log::info!("Extract phase: running sources in parallel");
            let handles: Vec<_> = groups
                .into_iter()
                .map(|(group, future)| (group, tokio::spawn(until_cancelled(cancel.clone(), future))))
                .collect();

            // Every task is joined before any failure is reported
            for (group, handle) in handles {
                outcomes.push(match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Some(Err(EtlError::Unexpected(format!(
                        "{} extraction task failed: {}",
                        group, e
                    )))),
                });
            }
        } else {
            log::info!("Extract phase: running sources sequentially");
            for (_, future) in groups {
                let outcome = until_cancelled(cancel.clone(), future).await;
                let stop = !matches!(outcome, Some(Ok(_)));
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
        }

        let mut sources = BTreeMap::new();
        let mut cancelled = false;
        for outcome in outcomes {
            match outcome {
                Some(Ok(entities)) => sources.extend(entities),
                Some(Err(e)) => return Err(e),
                None => cancelled = true,
            }
        }
        if cancelled {
            return Err(EtlError::Cancelled(Phase::Extract));
        }
        Ok(sources)
    }

    fn transform_phase(&self) -> Result<BTreeMap<String, usize>, StagingError> {
        let mut counts = BTreeMap::new();

        self.transform_entity::<Customer, _>(
            ValidityFilter::new().then(Deduplicator::new()),
            &mut counts,
        )?;
        self.transform_entity::<Product, _>(
            ValidityFilter::new().then(Deduplicator::new()),
            &mut counts,
        )?;
        self.transform_entity::<Order, _>(Deduplicator::new(), &mut counts)?;
        self.transform_entity::<OrderDetail, _>(PassThrough::new(), &mut counts)?;

        // Database reviews come first so they win key collisions with the API
        let mut reviews: Vec<Review> = self.staging.load(Review::TABLE)?;
        let database_count = reviews.len();
        reviews.extend(self.staging.load::<Review>(API_REVIEWS)?);
        log::info!(
            "Merging {} database and {} API reviews",
            database_count,
            reviews.len() - database_count
        );
        let reviews = Deduplicator::new().transform(reviews);
        self.save_transformed(reviews, &mut counts)?;

        self.transform_entity::<Comment, _>(Deduplicator::new(), &mut counts)?;

        Ok(counts)
    }

    fn transform_entity<T, X>(
        &self,
        transformer: X,
        counts: &mut BTreeMap<String, usize>,
    ) -> Result<(), StagingError>
    where
        T: Record,
        X: Transformer<Item = T>,
    {
        let records: Vec<T> = self.staging.load(T::TABLE)?;
        let before = records.len();
        let records = transformer.transform(records);
        log::info!(
            "Transformed {}: {} -> {} records",
            T::TABLE,
            before,
            records.len()
        );
        self.save_transformed(records, counts)
    }

    fn save_transformed<T: Record>(
        &self,
        records: Vec<T>,
        counts: &mut BTreeMap<String, usize>,
    ) -> Result<(), StagingError> {
        self.staging.save(&transformed_name(T::TABLE), &records)?;
        counts.insert(T::TABLE.to_string(), records.len());
        Ok(())
    }

    async fn load_phase(
        &self,
        transformed: &BTreeMap<String, usize>,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<String, usize>, Option<LoadPending>), EtlError> {
        let staging = self.staging.clone();
        let factory = self.destination.clone();
        let transformed = transformed.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || load_tables(&staging, &factory, &transformed, &cancel))
            .await
            .map_err(|e| EtlError::Unexpected(format!("load task failed: {}", e)))?
    }
}

fn ensure_active(cancel: &CancellationToken, phase: Phase) -> Result<(), EtlError> {
    if cancel.is_cancelled() {
        log::warn!("Run cancelled before the {} phase", phase);
        return Err(EtlError::Cancelled(phase));
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn until_cancelled<F: Future>(cancel: CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

/// Extract one entity and stage it under `name` unless extraction failed
async fn stage<E>(
    staging: &StagingStore,
    extractor: E,
    name: &str,
) -> Result<(String, SourceOutcome), EtlError>
where
    E: Extractor,
    E::Item: Record,
{
    let outcome = match extract_observed(&extractor).await {
        Ok(records) => {
            let count = records.len();
            let staging = staging.clone();
            let target = name.to_string();
            tokio::task::spawn_blocking(move || staging.save(&target, &records))
                .await
                .map_err(|e| EtlError::Unexpected(format!("staging {} failed: {}", name, e)))??;
            SourceOutcome::staged(count)
        }
        Err(e) => {
            log::warn!("Nothing staged for {}; keeping the previous snapshot", name);
            SourceOutcome::failed(e)
        }
    };
    Ok((name.to_string(), outcome))
}

async fn extract_csv(settings: Arc<Settings>, staging: StagingStore) -> GroupOutcome {
    log::info!("Extracting CSV data from {}", settings.data_sources.csv_path.display());
    let files = &settings.data_sources.csv_files;

    Ok(vec![
        stage(
            &staging,
            CsvExtractor::<Customer>::new(settings.csv_file(&files.customers), "CsvCustomers"),
            Customer::TABLE,
        )
        .await?,
        stage(
            &staging,
            CsvExtractor::<Product>::new(settings.csv_file(&files.products), "CsvProducts"),
            Product::TABLE,
        )
        .await?,
        stage(
            &staging,
            CsvExtractor::<Order>::new(settings.csv_file(&files.orders), "CsvOrders"),
            Order::TABLE,
        )
        .await?,
        stage(
            &staging,
            CsvExtractor::<OrderDetail>::new(
                settings.csv_file(&files.order_details),
                "CsvOrderDetails",
            ),
            OrderDetail::TABLE,
        )
        .await?,
    ])
}

async fn extract_database(settings: Arc<Settings>, staging: StagingStore) -> GroupOutcome {
    let Some(path) = &settings.source_database else {
        log::info!("No source database configured, skipping database extraction");
        return Ok(vec![(Review::TABLE.to_string(), SourceOutcome::skipped())]);
    };
    log::info!("Extracting database data from {}", path.display());

    let now = Local::now().naive_local();
    let cutoff = now
        .checked_sub_months(Months::new(REVIEW_WINDOW_MONTHS))
        .unwrap_or(now);
    let reviews = DatabaseExtractor::<Review>::new(path, "DatabaseReviews")
        .with_query(Query::newer_than("ReviewDate", cutoff));

    Ok(vec![stage(&staging, reviews, Review::TABLE).await?])
}

async fn extract_api(
    settings: Arc<Settings>,
    staging: StagingStore,
    api: Option<ApiClient>,
) -> GroupOutcome {
    let Some(client) = api else {
        log::info!("No API base URL configured, skipping API extraction");
        return Ok(vec![
            (Comment::TABLE.to_string(), SourceOutcome::skipped()),
            (API_REVIEWS.to_string(), SourceOutcome::skipped()),
        ]);
    };
    log::info!("Extracting API data from {}", client);
    let endpoints = &settings.data_sources.api_endpoints;

    let mut outcomes = vec![
        stage(
            &staging,
            ApiExtractor::<Comment>::new(client.clone(), &endpoints.comments, "ApiComments"),
            Comment::TABLE,
        )
        .await?,
    ];

    match endpoints.reviews.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => outcomes.push(
            stage(
                &staging,
                ApiExtractor::<Review>::new(client, endpoint, "ApiReviews"),
                API_REVIEWS,
            )
            .await?,
        ),
        _ => outcomes.push((API_REVIEWS.to_string(), SourceOutcome::skipped())),
    }

    Ok(outcomes)
}

fn load_table<T: Record>(
    staging: &StagingStore,
    loader: &mut IdentityLoader,
) -> Result<Result<usize, LoadError>, StagingError> {
    let records: Vec<T> = staging.load(&transformed_name(T::TABLE))?;
    Ok(loader.load_with_identity(records, T::TABLE, T::PRIMARY_KEY))
}

/// Load every table in order, stopping at the first destination failure
fn load_tables(
    staging: &StagingStore,
    factory: &DestinationFactory,
    transformed: &BTreeMap<String, usize>,
    cancel: &CancellationToken,
) -> Result<(BTreeMap<String, usize>, Option<LoadPending>), EtlError> {
    let mut loaded = BTreeMap::new();
    let pending = |from: usize, error: String| {
        let pending = LoadPending {
            table: LOAD_ORDER[from].0.to_string(),
            error,
            staged: LOAD_ORDER[from..]
                .iter()
                .map(|(table, _)| {
                    let count = transformed.get(*table).copied().unwrap_or_default();
                    (table.to_string(), count)
                })
                .collect(),
        };
        log::warn!(
            "Load stopped at {}: {}. Still staged: {:?}",
            pending.table,
            pending.error,
            pending.staged
        );
        pending
    };

    let mut loader = match factory() {
        Ok(destination) => IdentityLoader::new(destination),
        Err(e) => {
            let error = format!("cannot open destination: {}", e);
            return Ok((loaded, Some(pending(0, error))));
        }
    };

    for (index, (table, step)) in LOAD_ORDER.iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Run cancelled before loading {}", table);
            return Err(EtlError::Cancelled(Phase::Load));
        }
        match step(staging, &mut loader)? {
            Ok(count) => {
                loaded.insert(table.to_string(), count);
            }
            Err(e) => return Ok((loaded, Some(pending(index, e.to_string())))),
        }
    }

    Ok((loaded, None))
}
