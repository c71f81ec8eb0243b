//! SQLite implementation of the local store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StoreError;
use super::image::{self, WrittenImage};
use super::schema;
use super::types::{StoreSummary, StoredUser};
use super::LocalStore;
use crate::api::{ImageStream, UserProfile};

/// Profiles and image metadata in SQLite, image bytes under `image_dir`.
pub struct SqliteLocalStore {
    /// rusqlite::Connection is not Sync. The guard is never held across an
    /// `.await`.
    conn: Mutex<Connection>,
    path: PathBuf,
    image_dir: PathBuf,
}

impl std::fmt::Debug for SqliteLocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLocalStore")
            .field("path", &self.path)
            .field("image_dir", &self.image_dir)
            .finish_non_exhaustive()
    }
}

fn timestamp_to_utc(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

impl SqliteLocalStore {
    /// Open or create a store. `image_dir` is created lazily on first write.
    pub async fn open(path: &Path, image_dir: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Migration)?;

            schema::migrate(&conn)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            image_dir: image_dir.to_path_buf(),
        })
    }

    /// Open an in-memory database with images under `image_dir` (for testing).
    #[cfg(test)]
    pub fn open_in_memory(image_dir: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
            image_dir: image_dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// Load a cached profile.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let json: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT profile_json FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?
        };

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }

    /// All cached users, ordered by name.
    pub async fn list_users(&self) -> Result<Vec<StoredUser>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.name, u.has_primary_image, i.user_id IS NOT NULL, u.saved_at
                 FROM users u LEFT JOIN images i ON i.user_id = u.id
                 ORDER BY u.name COLLATE NOCASE, u.id",
            )
            .map_err(StoreError::query)?;

        let users = stmt
            .query_map([], |row| {
                Ok(StoredUser {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    has_primary_image: row.get(2)?,
                    has_cached_image: row.get(3)?,
                    saved_at: timestamp_to_utc(row.get(4)?),
                })
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        Ok(users)
    }

    /// Counts of cached rows plus the most recent sync run.
    pub async fn get_summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.lock()?;

        let users = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0))
            .map_err(StoreError::query)? as u64;

        let (images, image_bytes) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM images",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(StoreError::query)?;

        let last_run: Option<(Option<i64>, Option<i64>, i64, bool)> = conn
            .query_row(
                "SELECT started_at, completed_at, users_total, interrupted
                 FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(StoreError::query)?;

        let mut summary = StoreSummary {
            users,
            images: images as u64,
            image_bytes: image_bytes as u64,
            ..StoreSummary::default()
        };
        if let Some((started, completed, users_total, interrupted)) = last_run {
            summary.last_sync_started = timestamp_to_utc(started);
            summary.last_sync_completed = timestamp_to_utc(completed);
            summary.last_sync_users = users_total as u64;
            summary.last_sync_interrupted = interrupted;
        }
        Ok(summary)
    }

    /// Record the start of a sync run and return its id.
    pub async fn start_sync_run(&self, users_total: usize) -> Result<i64, StoreError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at, users_total) VALUES (?1, ?2)",
            rusqlite::params![started_at, users_total as i64],
        )
        .map_err(StoreError::query)?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark a sync run as finished.
    pub async fn complete_sync_run(&self, run_id: i64, interrupted: bool) -> Result<(), StoreError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, interrupted = ?2 WHERE id = ?3",
            rusqlite::params![completed_at, interrupted, run_id],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let profile_json = serde_json::to_string(profile)?;
        let saved_at = Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO users (id, name, server_id, has_primary_image, primary_image_tag, profile_json, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                server_id = excluded.server_id,
                has_primary_image = excluded.has_primary_image,
                primary_image_tag = excluded.primary_image_tag,
                profile_json = excluded.profile_json,
                saved_at = excluded.saved_at
            "#,
            rusqlite::params![
                &profile.id,
                &profile.name,
                &profile.server_id,
                profile.has_primary_image,
                &profile.primary_image_tag,
                profile_json,
                saved_at,
            ],
        )
        .map_err(StoreError::query)?;

        tracing::debug!(user_id = %profile.id, "Saved user profile");
        Ok(())
    }

    async fn delete_user_profile(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", [user_id])
            .map_err(StoreError::query)?;
        tracing::debug!(user_id, rows, "Deleted user profile");
        Ok(())
    }

    async fn has_image(&self, profile: &UserProfile) -> Result<bool, StoreError> {
        let stored: Option<(String, Option<String>)> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT local_path, image_tag FROM images WHERE user_id = ?1",
                [&profile.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StoreError::query)?
        };

        let Some((stored_path, stored_tag)) = stored else {
            return Ok(false);
        };
        // A tag the server reports must match the one the file was fetched with.
        if let Some(tag) = &profile.primary_image_tag {
            if stored_tag.as_ref() != Some(tag) {
                tracing::debug!(
                    user_id = %profile.id,
                    cached_tag = ?stored_tag,
                    server_tag = %tag,
                    "Cached image is outdated"
                );
                return Ok(false);
            }
        }
        let path = PathBuf::from(stored_path);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::debug!(
                    user_id = %profile.id,
                    path = %path.display(),
                    "Image row present but file missing"
                );
                Ok(false)
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn save_image(
        &self,
        profile: &UserProfile,
        stream: ImageStream,
    ) -> Result<u64, StoreError> {
        let path = image::image_path(&self.image_dir, &profile.id);
        let content_type = stream.content_type().map(str::to_string);

        let WrittenImage { size_bytes, sha256 } =
            image::write_image_stream(stream, &path, &profile.id).await?;

        let saved_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO images (user_id, local_path, size_bytes, sha256, content_type, image_tag, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                local_path = excluded.local_path,
                size_bytes = excluded.size_bytes,
                sha256 = excluded.sha256,
                content_type = excluded.content_type,
                image_tag = excluded.image_tag,
                saved_at = excluded.saved_at
            "#,
            rusqlite::params![
                &profile.id,
                path.to_string_lossy(),
                size_bytes as i64,
                sha256,
                content_type,
                &profile.primary_image_tag,
                saved_at,
            ],
        )
        .map_err(StoreError::query)?;

        tracing::debug!(user_id = %profile.id, size_bytes, path = %path.display(), "Saved image");
        Ok(size_bytes)
    }

    async fn delete_image(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let stored_path: Option<String> = {
            let conn = self.lock()?;
            let stored = conn
                .query_row(
                    "SELECT local_path FROM images WHERE user_id = ?1",
                    [&profile.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::query)?;
            conn.execute("DELETE FROM images WHERE user_id = ?1", [&profile.id])
                .map_err(StoreError::query)?;
            stored
        };

        let path = stored_path
            .map(PathBuf::from)
            .unwrap_or_else(|| image::image_path(&self.image_dir, &profile.id));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(user_id = %profile.id, path = %path.display(), "Deleted image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
