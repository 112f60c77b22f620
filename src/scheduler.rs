//! Bounded upload scheduler.
//!
//! Merges the watch and direct discovery inputs and runs each discovery through the
//! [`FileUploader`] with at most `capacity` running at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::discovery::{Discovery, DiscoveryInputs};
use crate::storage::StoreError;
use crate::uploader::{FileUploader, UploadOutcome};

pub const DEFAULT_CONCURRENT_UPLOADS: usize = 4;

/// Tally of what a scheduler run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub admitted: usize,
    pub uploaded: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub errored: usize,
    /// Highest number of discoveries processed at the same time.
    pub peak_concurrency: usize,
}

impl UploadSummary {
    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded => self.uploaded += 1,
            UploadOutcome::Deduplicated => self.deduplicated += 1,
            UploadOutcome::AlreadyUploaded
            | UploadOutcome::RemoteDeleted
            | UploadOutcome::InFlight => self.skipped += 1,
            UploadOutcome::RejectedFormat | UploadOutcome::Malformed => self.rejected += 1,
            UploadOutcome::Errored => self.errored += 1,
        }
    }
}

pub struct Scheduler {
    active: Arc<AtomicUsize>,
    capacity: usize,
    peak: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
    uploader: Arc<FileUploader>,
}

impl Scheduler {
    /// `capacity` is clamped to at least 1.
    pub fn new(uploader: Arc<FileUploader>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
            peak: Arc::new(AtomicUsize::new(0)),
            permits: Arc::new(Semaphore::new(capacity)),
            uploader,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of discoveries currently being processed.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Process discoveries until both inputs are closed and drained, then wait for the
    /// in-flight ones to finish.
    ///
    /// A failure to persist the store stops admission; the in-flight discoveries still
    /// finish and the first such failure is returned.
    pub async fn run(self, inputs: DiscoveryInputs) -> Result<UploadSummary, StoreError> {
        let DiscoveryInputs {
            mut watch,
            mut direct,
        } = inputs;
        let mut watch_open = true;
        let mut direct_open = true;

        let mut workers: JoinSet<Result<UploadOutcome, StoreError>> = JoinSet::new();
        let mut summary = UploadSummary::default();
        let mut failure: Option<StoreError> = None;

        tracing::info!(capacity = self.capacity, "Upload scheduler started");

        while (watch_open || direct_open) && failure.is_none() {
            let discovery = tokio::select! {
                received = watch.recv(), if watch_open => match received {
                    Some(discovery) => discovery,
                    None => {
                        tracing::debug!("Watch input closed");
                        watch_open = false;
                        continue;
                    }
                },
                received = direct.recv(), if direct_open => match received {
                    Some(discovery) => discovery,
                    None => {
                        tracing::debug!("Direct input closed");
                        direct_open = false;
                        continue;
                    }
                },
                Some(done) = workers.join_next(), if !workers.is_empty() => {
                    reap(done, &mut summary, &mut failure);
                    continue;
                }
            };

            self.admit(&mut workers, discovery).await;
            summary.admitted += 1;

            while let Some(done) = workers.try_join_next() {
                reap(done, &mut summary, &mut failure);
            }
        }

        tracing::info!(in_flight = workers.len(), "Waiting for uploads to finish");
        while let Some(done) = workers.join_next().await {
            reap(done, &mut summary, &mut failure);
        }

        summary.peak_concurrency = self.peak.load(Ordering::SeqCst);
        tracing::info!(?summary, "Upload scheduler stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Wait for a free slot, then start processing `discovery`.
    async fn admit(
        &self,
        workers: &mut JoinSet<Result<UploadOutcome, StoreError>>,
        discovery: Discovery,
    ) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            // The semaphore is owned here and never closed.
            return;
        };

        let gauge = ActiveGauge::enter(
            self.active.clone(),
            self.peak.clone(),
            self.capacity,
        );
        let uploader = self.uploader.clone();

        workers.spawn(async move {
            let outcome = uploader.process(discovery).await;
            drop(gauge);
            drop(permit);
            outcome
        });
    }
}

fn reap(
    done: Result<Result<UploadOutcome, StoreError>, JoinError>,
    summary: &mut UploadSummary,
    failure: &mut Option<StoreError>,
) {
    match done {
        Ok(Ok(outcome)) => summary.record(outcome),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Could not save state; no new uploads will start");
            failure.get_or_insert(e);
        }
        Err(e) => {
            tracing::error!(error = %e, "Upload task failed");
            summary.errored += 1;
        }
    }
}

/// Counts a discovery as active for as long as it lives.
struct ActiveGauge {
    active: Arc<AtomicUsize>,
}

impl ActiveGauge {
    fn enter(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, capacity: usize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert!(now <= capacity, "{now} uploads active with capacity {capacity}");
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
