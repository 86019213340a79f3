// Bounded fan-out fetcher: one task per identifier, results kept in input order.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::result::{AggregateResult, ResourceResult};
use super::stats::RunProgress;
use crate::config::{
    LARGE_RUN_CONCURRENCY, LARGE_RUN_THRESHOLD, MEDIUM_RUN_CONCURRENCY, SMALL_RUN_CONCURRENCY,
    SMALL_RUN_THRESHOLD,
};
use crate::source::traits::ArchiveSource;

/// Number of fetches allowed in flight for a run over `count` identifiers.
pub fn concurrency_limit(count: usize) -> usize {
    if count < SMALL_RUN_THRESHOLD {
        SMALL_RUN_CONCURRENCY
    } else if count <= LARGE_RUN_THRESHOLD {
        MEDIUM_RUN_CONCURRENCY
    } else {
        LARGE_RUN_CONCURRENCY
    }
}

/// Fetch a single resource through `source`, folding any error into a failed result.
pub async fn fetch_from_source(source: &dyn ArchiveSource, identifier: String) -> ResourceResult {
    match source.fetch_resource(&identifier).await {
        Ok(fetched) => {
            debug!("fetched {} ({} bytes)", identifier, fetched.payload.len());
            ResourceResult::success(identifier, fetched.payload, &fetched.content_type)
        }
        Err(e) => {
            warn!("fetch {} failed: {}", identifier, e);
            ResourceResult::failure(identifier, e.to_string())
        }
    }
}

pub struct FetchOrchestrator {
    shutdown_token: CancellationToken,
}

impl FetchOrchestrator {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Tasks still waiting for a fetch slot when `token` fires finish as failed
    /// results. Fetches already in flight are left to complete.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            shutdown_token: token,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Fetch every identifier through `source`.
    pub async fn run_with_source(
        &self,
        subject_id: &str,
        identifiers: Vec<String>,
        source: Arc<dyn ArchiveSource>,
    ) -> AggregateResult {
        self.run(subject_id, identifiers, move |identifier| {
            let source = Arc::clone(&source);
            async move { fetch_from_source(source.as_ref(), identifier).await }
        })
        .await
    }

    /// Run `fetch_one` once per identifier with bounded concurrency and aggregate the results.
    ///
    /// Duplicate identifiers are fetched independently. Returns only after every
    /// spawned task has finished. Dropping the returned future aborts the workers.
    pub async fn run<F, Fut>(
        &self,
        subject_id: &str,
        identifiers: Vec<String>,
        fetch_one: F,
    ) -> AggregateResult
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResourceResult> + Send + 'static,
    {
        let started = Instant::now();
        let total = identifiers.len();
        let limit = concurrency_limit(total);
        info!(
            "using {} concurrent workers for {} instances (subject={})",
            limit, total, subject_id
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let progress = Arc::new(RunProgress::new(total));
        let fetch_one = Arc::new(fetch_one);

        let mut workers = JoinSet::new();
        for (index, identifier) in identifiers.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&progress);
            let fetch_one = Arc::clone(&fetch_one);
            let token = self.shutdown_token.clone();

            workers.spawn(async move {
                let result =
                    Self::fetch_task(identifier, semaphore, &progress, token, fetch_one.as_ref())
                        .await;
                let bytes = result.payload().map_or(0, |p| p.len() as u64);
                report_completion(&progress, result.succeeded(), bytes);
                (index, result)
            });
        }

        // Workers finish in any order; each result goes back to its input slot.
        let mut slots: Vec<Option<ResourceResult>> = vec![None; total];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    warn!("fetch worker did not complete: {}", e);
                    report_completion(&progress, false, 0);
                }
            }
        }

        let results: Vec<ResourceResult> = slots
            .into_iter()
            .zip(identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or_else(|| ResourceResult::failure(identifier, "worker task failed"))
            })
            .collect();

        let aggregate =
            AggregateResult::from_results(subject_id, results, started.elapsed().as_secs_f64());
        info!(
            "run finished subject={} succeeded={} failed={} elapsed={:.2}s",
            subject_id,
            aggregate.succeeded_count(),
            aggregate.failed_count(),
            aggregate.elapsed_seconds()
        );
        aggregate
    }

    async fn fetch_task<F, Fut>(
        identifier: String,
        semaphore: Arc<Semaphore>,
        progress: &RunProgress,
        token: CancellationToken,
        fetch_one: &F,
    ) -> ResourceResult
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ResourceResult>,
    {
        // Acquire a fetch slot, but give up if cancellation fires while waiting.
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("{} cancelled while waiting for a fetch slot", identifier);
                return ResourceResult::failure(identifier, "cancelled");
            }
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return ResourceResult::failure(identifier, e.to_string()),
            },
        };

        let _worker = progress.worker();
        fetch_one(identifier).await
    }
}

/// Count one finished fetch and emit a progress event when a milestone is reached.
fn report_completion(progress: &RunProgress, succeeded: bool, bytes: u64) {
    let completed = progress.record_completed(succeeded, bytes);
    if progress.is_milestone(completed) {
        let snap = progress.snapshot();
        info!(
            "progress: {}/{} images processed ({:.1}%), \
             {} failed, {} active workers, {} bytes, {:.2}s",
            snap.completed,
            snap.total,
            snap.percent(),
            snap.failed,
            snap.active_workers,
            snap.fetched_bytes,
            snap.elapsed_seconds
        );
    }
}

impl Default for FetchOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
