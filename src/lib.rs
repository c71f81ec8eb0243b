//! offline-usersync: keep a local offline cache of server users.
//!
//! For each server user the cached profile is refreshed from the server and
//! the cached primary image is brought in line with it. Users the server now
//! rejects (401) are removed from the cache. Each user is reconciled
//! independently and concurrently; see [`sync::OfflineUsersSync`].

#![warn(clippy::all)]

pub mod api;
pub mod retry;
pub mod store;
pub mod sync;

pub use api::{ApiConfig, ApiError, HttpRemoteApi, RemoteApi, ServerUserRef, UserProfile};
pub use store::{LocalStore, SqliteLocalStore, StoreError};
pub use sync::OfflineUsersSync;
