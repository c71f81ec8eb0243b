//! Offline user synchronization.
//!
//! [`OfflineUsersSync::synchronize`] fans out one pipeline per server user
//! and returns once every pipeline has reached a terminal state. A pipeline
//! fetches the user's profile, saves it, then reconciles the cached primary
//! image. Failures stay inside their pipeline: they are logged, counted, and
//! never reach the caller.

pub(crate) mod image;
pub mod outcome;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod user;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ImageOptions, RemoteApi, ServerUserRef};
use crate::store::LocalStore;

pub use outcome::{ImageOutcome, SyncTally, UserOutcome};

/// Collaborators shared by every user pipeline of a run.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) api: Arc<dyn RemoteApi>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) image_options: Arc<ImageOptions>,
}

impl Pipeline {
    pub(crate) fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn LocalStore>,
        image_options: ImageOptions,
    ) -> Self {
        Self {
            api,
            store,
            image_options: Arc::new(image_options),
        }
    }
}

/// Await a network request unless `cancel` fires first, in which case the
/// request future is dropped.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, request: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        result = request => result,
    }
}

/// Reconciles the local offline user cache against one server.
#[derive(Clone)]
pub struct OfflineUsersSync {
    pipeline: Pipeline,
}

impl std::fmt::Debug for OfflineUsersSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineUsersSync")
            .field("image_options", &self.pipeline.image_options)
            .finish_non_exhaustive()
    }
}

impl OfflineUsersSync {
    pub fn new(api: Arc<dyn RemoteApi>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            pipeline: Pipeline::new(api, store, ImageOptions::primary()),
        }
    }

    /// Options used when requesting primary images.
    pub fn with_image_options(mut self, options: ImageOptions) -> Self {
        self.pipeline.image_options = Arc::new(options);
        self
    }

    /// Reconcile every user in `server_users`.
    ///
    /// Resolves exactly once, after all launched pipelines have finished,
    /// whatever their individual outcome. Once `cancel` fires no further
    /// pipelines are launched and in-flight requests are abandoned.
    pub async fn synchronize(&self, server_users: &[ServerUserRef], cancel: CancellationToken) {
        self.run(server_users, cancel).await;
    }

    pub(crate) async fn run(&self, server_users: &[ServerUserRef], cancel: CancellationToken) -> SyncTally {
        let mut seen = HashSet::new();
        let users: Vec<&ServerUserRef> = server_users
            .iter()
            .filter(|u| seen.insert(u.id.as_str()))
            .collect();
        if users.len() < server_users.len() {
            tracing::warn!(
                duplicates = server_users.len() - users.len(),
                "Ignoring duplicate server users"
            );
        }

        let total = users.len();
        let mut tally = SyncTally::default();
        if total == 0 {
            tracing::info!("No server users to synchronize");
            return tally;
        }

        let started = Instant::now();
        tracing::info!(users = total, "Synchronizing offline users");

        let mut pipelines = JoinSet::new();
        for user in users {
            if cancel.is_cancelled() {
                tracing::info!(
                    launched = pipelines.len(),
                    total,
                    "Shutdown requested, not launching remaining users"
                );
                break;
            }
            let pipeline = self.pipeline.clone();
            let server_user = user.clone();
            let cancel = cancel.clone();
            pipelines.spawn(async move {
                user::reconcile_user(&pipeline, &server_user, &cancel).await
            });
        }

        let launched = pipelines.len();
        tally.not_started = total - launched;

        let mut done = 0usize;
        while let Some(joined) = pipelines.join_next().await {
            done += 1;
            match joined {
                Ok(outcome) => tally.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Error saving offline user: pipeline aborted");
                    tally.failed += 1;
                }
            }
            tracing::debug!(done, launched, "User pipeline finished");
        }

        tracing::info!(
            synced = tally.synced,
            rejected = tally.rejected,
            failed = tally.failed,
            cancelled = tally.cancelled + tally.not_started,
            images_downloaded = tally.images_downloaded,
            images_cached = tally.images_cached,
            images_cleared = tally.images_cleared,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Offline user sync complete"
        );
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeApi, MemoryStore};
    use super::*;
    use crate::api::UserProfile;
    use crate::store::SqliteLocalStore;
    use std::time::Duration;

    fn sync_with(api: &Arc<FakeApi>, store: &Arc<MemoryStore>) -> OfflineUsersSync {
        OfflineUsersSync::new(api.clone(), store.clone())
    }

    fn refs(ids: &[&str]) -> Vec<ServerUserRef> {
        ids.iter().map(|id| ServerUserRef::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_empty_user_list_completes_without_pipelines() {
        let api = Arc::new(FakeApi::new());
        let store = Arc::new(MemoryStore::new());

        let tally = sync_with(&api, &store)
            .run(&[], CancellationToken::new())
            .await;
        assert_eq!(tally, SyncTally::default());
        assert!(api.profile_requests().is_empty());
    }

    #[tokio::test]
    async fn test_completes_after_every_pipeline() {
        let ids = ["a", "b", "c", "d", "e"];
        let mut api = FakeApi::new();
        for (i, id) in ids.iter().enumerate() {
            api = api
                .with_profile(UserProfile::test(id, false))
                .with_delay(id, Duration::from_millis(50 - 10 * i as u64));
        }
        let api = Arc::new(api);
        let store = Arc::new(MemoryStore::new());

        let tally = sync_with(&api, &store)
            .run(&refs(&ids), CancellationToken::new())
            .await;
        assert_eq!(tally.finished(), ids.len());
        assert_eq!(tally.synced, ids.len());
        assert_eq!(store.user_count(), ids.len());
        assert_eq!(api.profile_requests().len(), ids.len());
    }

    #[tokio::test]
    async fn test_mixed_outcomes_scenario() {
        // A: image fetched; B: 401, local record removed; C: 500, untouched.
        // Delays make the pipelines finish out of launch order.
        let stale_c = UserProfile::test("C", true);
        let api = Arc::new(
            FakeApi::new()
                .with_profile(UserProfile::test("A", true))
                .with_image("A", b"avatar-a")
                .with_delay("A", Duration::from_millis(40))
                .with_status("B", 401)
                .with_delay("B", Duration::from_millis(20))
                .with_status("C", 500),
        );
        let store = Arc::new(
            MemoryStore::new()
                .with_user(UserProfile::test("B", false))
                .with_user(stale_c.clone()),
        );

        let tally = sync_with(&api, &store)
            .run(&refs(&["A", "B", "C"]), CancellationToken::new())
            .await;

        assert_eq!(tally.finished(), 3);
        assert_eq!(tally.synced, 1);
        assert_eq!(tally.rejected, 1);
        assert_eq!(tally.failed, 1);

        assert_eq!(api.image_requests(), vec!["fake://images/A".to_string()]);
        assert_eq!(store.deleted_users(), vec!["B".to_string()]);
        assert_eq!(store.image("A").unwrap(), b"avatar-a");
        assert!(store.user("B").is_none());
        assert_eq!(store.user("C"), Some(stale_c));
    }

    #[tokio::test]
    async fn test_image_failure_does_not_affect_other_users() {
        let api = Arc::new(
            FakeApi::new()
                .with_profile(UserProfile::test("bad", true))
                .with_image("bad", b"x")
                .with_profile(UserProfile::test("good", true))
                .with_image("good", b"y"),
        );
        let store = Arc::new(MemoryStore::new().failing_image_save("bad"));

        let tally = sync_with(&api, &store)
            .run(&refs(&["bad", "good"]), CancellationToken::new())
            .await;

        assert_eq!(tally.failed, 1);
        assert_eq!(tally.synced, 1);
        assert_eq!(tally.images_downloaded, 1);
        assert!(store.image("bad").is_none());
        assert_eq!(store.image("good").unwrap(), b"y");
        assert!(store.user("bad").is_some());
    }

    #[tokio::test]
    async fn test_panicking_pipeline_still_counted() {
        let api = Arc::new(
            FakeApi::new()
                .panicking("boom")
                .with_profile(UserProfile::test("ok", false)),
        );
        let store = Arc::new(MemoryStore::new());

        let tally = sync_with(&api, &store)
            .run(&refs(&["boom", "ok"]), CancellationToken::new())
            .await;
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.synced, 1);
    }

    #[tokio::test]
    async fn test_duplicate_users_reconciled_once() {
        let api = Arc::new(FakeApi::new().with_profile(UserProfile::test("u1", false)));
        let store = Arc::new(MemoryStore::new());

        let tally = sync_with(&api, &store)
            .run(&refs(&["u1", "u1", "u1"]), CancellationToken::new())
            .await;
        assert_eq!(tally.synced, 1);
        assert_eq!(api.profile_requests(), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_launches_nothing() {
        let api = Arc::new(FakeApi::new().with_profile(UserProfile::test("u1", false)));
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tally = sync_with(&api, &store).run(&refs(&["u1", "u2"]), cancel).await;
        assert_eq!(tally.not_started, 2);
        assert!(api.profile_requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_requests() {
        let api = Arc::new(
            FakeApi::new()
                .hanging("slow")
                .with_profile(UserProfile::test("fast", false)),
        );
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let tally = tokio::time::timeout(
            Duration::from_secs(5),
            sync_with(&api, &store).run(&refs(&["slow", "fast"]), cancel),
        )
        .await
        .expect("sync must finish once cancelled");

        assert_eq!(tally.cancelled, 1);
        assert_eq!(tally.synced, 1);
        assert!(store.user("slow").is_none());
    }

    #[tokio::test]
    async fn test_synchronize_against_sqlite_store() {
        let dir = std::env::temp_dir()
            .join("offline-usersync-tests")
            .join("sync")
            .join("sqlite_store");
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(SqliteLocalStore::open_in_memory(&dir).unwrap());
        let api = Arc::new(
            FakeApi::new()
                .with_profile(UserProfile::test("with-image", true))
                .with_image("with-image", b"jpeg")
                .with_profile(UserProfile::test("no-image", false))
                .with_status("revoked", 401),
        );
        store
            .save_user_profile(&UserProfile::test("revoked", false))
            .await
            .unwrap();

        let sync = OfflineUsersSync::new(api.clone(), store.clone());
        sync.synchronize(
            &refs(&["with-image", "no-image", "revoked"]),
            CancellationToken::new(),
        )
        .await;

        let with_image = UserProfile::test("with-image", true);
        assert!(store.get_user("with-image").await.unwrap().is_some());
        assert!(store.get_user("no-image").await.unwrap().is_some());
        assert!(store.get_user("revoked").await.unwrap().is_none());
        assert!(store.has_image(&with_image).await.unwrap());

        // Second run hits the cache: no new image request.
        sync.synchronize(&refs(&["with-image"]), CancellationToken::new())
            .await;
        assert_eq!(api.image_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_lookalike_user_without_image_keeps_other_users_image() {
        let dir = std::env::temp_dir()
            .join("offline-usersync-tests")
            .join("sync")
            .join("lookalike_ids");
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(SqliteLocalStore::open_in_memory(&dir).unwrap());
        let api = Arc::new(
            FakeApi::new()
                .with_profile(UserProfile::test("ab", true))
                .with_image("ab", b"avatar")
                .with_profile(UserProfile::test("a.b", false)),
        );
        let sync = OfflineUsersSync::new(api.clone(), store.clone());
        let owner = UserProfile::test("ab", true);

        sync.synchronize(&refs(&["ab"]), CancellationToken::new())
            .await;
        assert!(store.has_image(&owner).await.unwrap());

        sync.synchronize(&refs(&["a.b"]), CancellationToken::new())
            .await;
        assert!(store.has_image(&owner).await.unwrap());
    }
}
