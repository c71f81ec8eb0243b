//! Per-user results of a sync run.
//!
//! These never leave the crate through `synchronize`; they feed the run
//! summary log line.

use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

/// How the image step ended for a user whose profile was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Server reports a primary image and one was already cached.
    Cached,
    /// Image fetched and written.
    Downloaded { bytes: u64 },
    /// Server reports no primary image; any local copy was removed.
    Cleared,
}

/// Terminal state of one user pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Synced(ImageOutcome),
    /// Profile fetch was rejected with 401; the local record was removed.
    Rejected,
    FetchFailed,
    SaveFailed,
    ImageFailed,
    Cancelled,
}

/// Failure inside the image step.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReconcileError::Api(ApiError::Cancelled)
                | ReconcileError::Store(StoreError::Stream(ApiError::Cancelled))
        )
    }
}

/// Outcome counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTally {
    pub synced: usize,
    pub images_downloaded: usize,
    pub images_cached: usize,
    pub images_cleared: usize,
    pub rejected: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Users never launched because the run was cancelled first.
    pub not_started: usize,
}

impl SyncTally {
    pub fn record(&mut self, outcome: &UserOutcome) {
        match outcome {
            UserOutcome::Synced(image) => {
                self.synced += 1;
                match image {
                    ImageOutcome::Cached => self.images_cached += 1,
                    ImageOutcome::Downloaded { .. } => self.images_downloaded += 1,
                    ImageOutcome::Cleared => self.images_cleared += 1,
                }
            }
            UserOutcome::Rejected => self.rejected += 1,
            UserOutcome::FetchFailed | UserOutcome::SaveFailed | UserOutcome::ImageFailed => {
                self.failed += 1
            }
            UserOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Pipelines that reached a terminal state.
    pub fn finished(&self) -> usize {
        self.synced + self.rejected + self.failed + self.cancelled
    }
}
