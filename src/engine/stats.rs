// Live progress of an orchestration run: completion counts and in-flight workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::config::PROGRESS_INTERVAL;

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub active_workers: usize,
    pub fetched_bytes: u64,
    pub elapsed_seconds: f64,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

pub struct RunProgress {
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    active_workers: AtomicUsize,
    fetched_bytes: AtomicU64,
    started_at: Instant,
}

impl RunProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            active_workers: AtomicUsize::new(0),
            fetched_bytes: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record one finished fetch. Returns the new completed count.
    pub fn record_completed(&self, succeeded: bool, bytes: u64) -> usize {
        if succeeded {
            self.fetched_bytes.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether a progress event is due for the given completed count.
    pub fn is_milestone(&self, completed: usize) -> bool {
        completed % PROGRESS_INTERVAL == 0 || completed == self.total
    }

    /// Count a worker as in flight until the returned guard is dropped, unwinding included.
    pub fn worker(&self) -> ActiveWorker<'_> {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
        ActiveWorker { progress: self }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            fetched_bytes: self.fetched_bytes.load(Ordering::Relaxed),
            elapsed_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

pub struct ActiveWorker<'a> {
    progress: &'a RunProgress,
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.progress.active_workers.fetch_sub(1, Ordering::Relaxed);
    }
}
