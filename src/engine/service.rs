// Study service: cache lookup, study expansion and fan-out behind one handle.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::cache::{CacheStats, StudyCache};
use super::expansion::expand_study;
use super::orchestrator::FetchOrchestrator;
use super::result::AggregateResult;
use crate::source::traits::{ArchiveSource, FetchedResource, SeriesListing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A study aggregate together with where it came from.
#[derive(Debug, Clone)]
pub struct StudyFetch {
    pub result: Arc<AggregateResult>,
    pub cache_status: CacheStatus,
}

pub struct StudyService {
    source: Arc<dyn ArchiveSource>,
    cache: Arc<StudyCache>,
    orchestrator: FetchOrchestrator,
}

impl StudyService {
    pub fn new(
        source: Arc<dyn ArchiveSource>,
        cache: Arc<StudyCache>,
        orchestrator: FetchOrchestrator,
    ) -> Self {
        Self {
            source,
            cache,
            orchestrator,
        }
    }

    /// Serve a study from the cache, or expand and fetch it and cache the aggregate.
    ///
    /// A failed series listing is returned as an error and nothing is cached. Neither is
    /// a run that finished after cancellation.
    pub async fn fetch_study(&self, study_id: &str) -> Result<StudyFetch> {
        if let Some(result) = self.cache.get(study_id) {
            info!(
                "cache HIT for study {} ({} images)",
                study_id,
                result.succeeded_count()
            );
            return Ok(StudyFetch {
                result,
                cache_status: CacheStatus::Hit,
            });
        }

        info!("cache MISS for study {}, fetching from archive", study_id);
        let identifiers = expand_study(self.source.as_ref(), study_id).await?;
        let result = Arc::new(
            self.orchestrator
                .run_with_source(study_id, identifiers, Arc::clone(&self.source))
                .await,
        );
        if self.orchestrator.cancellation_token().is_cancelled() {
            info!("study {} fetched during shutdown, not caching", study_id);
        } else {
            self.cache.set(study_id, Arc::clone(&result));
        }

        Ok(StudyFetch {
            result,
            cache_status: CacheStatus::Miss,
        })
    }

    /// Fetch an explicit identifier list. Never cached.
    pub async fn fetch_instances(
        &self,
        subject_id: &str,
        identifiers: Vec<String>,
    ) -> AggregateResult {
        self.orchestrator
            .run_with_source(subject_id, identifiers, Arc::clone(&self.source))
            .await
    }

    /// Fetch one preview for passthrough.
    pub async fn fetch_preview(&self, identifier: &str) -> Result<FetchedResource> {
        self.source.fetch_resource(identifier).await
    }

    pub async fn list_series(&self, study_id: &str) -> Result<Vec<SeriesListing>> {
        self.source.list_series(study_id).await
    }

    pub fn cache(&self) -> &StudyCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Cancel fetches still waiting for a slot in any running orchestration.
    pub fn shutdown(&self) {
        self.orchestrator.cancellation_token().cancel();
    }
}
