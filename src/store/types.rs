//! Row types returned by the local store.

use chrono::{DateTime, Utc};

/// A cached user as listed by `status --users`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub id: String,
    pub name: String,
    pub has_primary_image: bool,
    /// Whether an image row exists for this user.
    pub has_cached_image: bool,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Summary of the store contents and the most recent sync run.
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub users: u64,
    pub images: u64,
    pub image_bytes: u64,
    pub last_sync_started: Option<DateTime<Utc>>,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub last_sync_users: u64,
    pub last_sync_interrupted: bool,
}
