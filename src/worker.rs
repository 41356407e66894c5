//! Scheduled pipeline runs
//!
//! The worker runs the pipeline once on startup, then once per interval until
//! cancelled. Runs never overlap: a run that outlasts the interval delays the
//! next tick instead of queueing a burst of catch-up runs.

use crate::etl::Pipeline;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

pub struct Worker {
    pipeline: Pipeline,
    interval: Duration,
}

impl Worker {
    pub fn new(pipeline: Pipeline, interval: Duration) -> Self {
        Self { pipeline, interval }
    }

    /// Run until `cancel` fires, returning the number of completed runs
    pub async fn run(&self, cancel: &CancellationToken) -> usize {
        log::info!(
            "ETL worker started; running every {} minutes",
            self.interval.as_secs() / 60
        );

        let completed = run_every(self.interval, cancel, move || async move {
            let started = Instant::now();
            log::info!("Starting ETL run");
            match self.pipeline.run(cancel).await {
                Ok(run) if run.is_degraded() => log::warn!(
                    "ETL run completed with pending loads in {:.2}s",
                    started.elapsed().as_secs_f64()
                ),
                Ok(_) => log::info!(
                    "ETL run completed successfully in {:.2}s",
                    started.elapsed().as_secs_f64()
                ),
                Err(e) => log::error!(
                    "ETL run failed after {:.2}s: {}",
                    started.elapsed().as_secs_f64(),
                    e
                ),
            }
        })
        .await;

        log::info!("ETL worker stopped after {} runs", completed);
        completed
    }
}

/// Call `job` immediately and then on every `period` tick until `cancel` fires.
///
/// Each call is awaited before the next tick is considered. Returns the number
/// of calls that were started.
pub async fn run_every<F, Fut>(period: Duration, cancel: &CancellationToken, mut job: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut calls = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        calls += 1;
        job().await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_on_startup_and_on_interval() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(130)).await;
                cancel.cancel();
            })
        };

        let calls = run_every(Duration::from_millis(50), &cancel, || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        stopper.await.unwrap();

        assert_eq!(calls, count.load(Ordering::SeqCst));
        assert!(calls >= 2, "expected startup run plus ticks, got {}", calls);
    }

    #[tokio::test]
    async fn test_cancelled_worker_does_not_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = run_every(Duration::from_millis(10), &cancel, || async {}).await;

        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_slow_job_does_not_overlap() {
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicUsize::new(0));

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                cancel.cancel();
            })
        };

        run_every(Duration::from_millis(10), &cancel, || {
            let active = active.clone();
            let overlapped = overlapped.clone();
            async move {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        stopper.await.unwrap();

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }
}
