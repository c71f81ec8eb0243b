//! Local offline cache of user profiles and their images.
//!
//! The sync pipeline only sees [`LocalStore`]. [`SqliteLocalStore`] keeps
//! profiles and image metadata in SQLite and image bytes on disk.

pub mod db;
pub mod error;
pub(crate) mod image;
pub mod schema;
pub mod types;

pub use db::SqliteLocalStore;
pub use error::StoreError;
pub use types::{StoreSummary, StoredUser};

use async_trait::async_trait;

use crate::api::{ImageStream, UserProfile};

/// Persistence operations used by the sync pipeline.
///
/// Object-safe so it can be shared across per-user tasks as
/// `Arc<dyn LocalStore>`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or overwrite the cached profile.
    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    /// Remove the cached profile. A missing record is not an error.
    async fn delete_user_profile(&self, user_id: &str) -> Result<(), StoreError>;

    /// Whether a primary image is cached for this user.
    async fn has_image(&self, profile: &UserProfile) -> Result<bool, StoreError>;

    /// Persist an image body, consuming the stream. Returns bytes written.
    async fn save_image(
        &self,
        profile: &UserProfile,
        stream: ImageStream,
    ) -> Result<u64, StoreError>;

    /// Remove the cached image. A missing image is not an error.
    async fn delete_image(&self, profile: &UserProfile) -> Result<(), StoreError>;
}
