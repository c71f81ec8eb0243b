use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use offline_usersync::api::{ApiConfig, ImageOptions, ServerUserRef};
use offline_usersync::retry::RetryConfig;

use crate::cli::{StoreArgs, SyncArgs};

const DB_FILE_NAME: &str = "users.db";
const IMAGE_DIR_NAME: &str = "images";

/// On-disk layout of the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub image_dir: PathBuf,
}

impl StorePaths {
    pub fn from_args(args: &StoreArgs) -> Self {
        Self::new(expand_tilde(&args.data_dir))
    }

    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            image_dir: data_dir.join(IMAGE_DIR_NAME),
            data_dir,
        }
    }
}

/// Validated settings for the `sync` command.
pub struct Config {
    pub paths: StorePaths,
    pub server_url: String,
    pub access_token: Option<String>,
    pub users: Vec<ServerUserRef>,
    pub image_options: ImageOptions,
    pub retry: RetryConfig,
    pub timeout: Duration,
    pub watch_with_interval: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("paths", &self.paths)
            .field("server_url", &self.server_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("users", &self.users.len())
            .field("watch_with_interval", &self.watch_with_interval)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_sync_args(args: SyncArgs) -> anyhow::Result<Self> {
        let server_url = args.server_url.trim().to_string();
        if server_url.is_empty() {
            anyhow::bail!("--server-url must not be empty");
        }

        let mut users: Vec<ServerUserRef> = args.users.into_iter().map(ServerUserRef::new).collect();
        if let Some(file) = &args.users_file {
            users.extend(load_users_file(&expand_tilde(file))?);
        }
        let users = dedup_users(users);
        if users.is_empty() {
            anyhow::bail!("No users to synchronize: pass --user or --users-file");
        }

        Ok(Self {
            paths: StorePaths::from_args(&args.store),
            server_url,
            access_token: args.access_token.filter(|t| !t.is_empty()),
            users,
            image_options: ImageOptions {
                max_width: args.max_width,
                max_height: args.max_height,
                quality: args.quality,
                ..ImageOptions::primary()
            },
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay: Duration::from_secs(args.retry_delay),
                ..RetryConfig::default()
            },
            timeout: Duration::from_secs(args.timeout),
            watch_with_interval: args.watch_with_interval,
        })
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            access_token: self.access_token.clone(),
            timeout: self.timeout,
            retry: self.retry,
            ..ApiConfig::new(self.server_url.clone())
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserEntry {
    Id(String),
    Ref(ServerUserRef),
}

/// Read a JSON array of user ids or `{"Id": ...}` objects.
fn load_users_file(path: &Path) -> anyhow::Result<Vec<ServerUserRef>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read users file {}", path.display()))?;
    let entries: Vec<UserEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse users file {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            UserEntry::Id(id) => ServerUserRef::new(id),
            UserEntry::Ref(user) => user,
        })
        .collect())
}

/// Drop blank ids and repeats, keeping first occurrence order.
fn dedup_users(users: Vec<ServerUserRef>) -> Vec<ServerUserRef> {
    let mut seen = HashSet::new();
    users
        .into_iter()
        .filter(|u| !u.id.trim().is_empty())
        .filter(|u| seen.insert(u.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn sync_args(extra: &[&str]) -> SyncArgs {
        let mut argv = vec![
            "offline-usersync",
            "sync",
            "--server-url",
            "http://localhost:8096",
        ];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Command::Sync(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("offline-usersync-tests")
            .join("config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_store_paths_layout() {
        let paths = StorePaths::new(PathBuf::from("/data"));
        assert_eq!(paths.db_path, PathBuf::from("/data/users.db"));
        assert_eq!(paths.image_dir, PathBuf::from("/data/images"));
    }

    #[test]
    fn test_from_sync_args_dedups_users() {
        let cfg = Config::from_sync_args(sync_args(&["-u", "a", "-u", "b", "-u", "a", "-u", " "]))
            .unwrap();
        let ids: Vec<&str> = cfg.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_from_sync_args_requires_users() {
        assert!(Config::from_sync_args(sync_args(&[])).is_err());
    }

    #[test]
    fn test_users_file_accepts_ids_and_objects() {
        let path = temp_file(
            "users_mixed.json",
            r#"["a", {"Id": "b", "Name": "Bea"}, {"id": "c"}]"#,
        );
        let cfg = Config::from_sync_args(sync_args(&[
            "-u",
            "a",
            "--users-file",
            path.to_str().unwrap(),
        ]))
        .unwrap();
        let ids: Vec<&str> = cfg.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(cfg.users[1].name.as_deref(), Some("Bea"));
    }

    #[test]
    fn test_users_file_invalid_json() {
        let path = temp_file("users_bad.json", "{not json");
        let err = Config::from_sync_args(sync_args(&["--users-file", path.to_str().unwrap()]))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse users file"));
    }

    #[test]
    fn test_retry_and_image_options_passthrough() {
        let cfg = Config::from_sync_args(sync_args(&[
            "-u",
            "a",
            "--max-retries",
            "0",
            "--retry-delay",
            "3",
            "--max-width",
            "400",
            "--quality",
            "90",
        ]))
        .unwrap();
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(3));
        assert_eq!(cfg.image_options.max_width, Some(400));
        assert_eq!(cfg.image_options.quality, Some(90));
        assert_eq!(cfg.api_config().retry, cfg.retry);
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = Config::from_sync_args(sync_args(&[
            "-u",
            "a",
            "--access-token",
            "secret-token",
        ]))
        .unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }
}
