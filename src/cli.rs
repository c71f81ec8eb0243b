use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "offline-usersync",
    about = "Keep an offline cache of server users and their profile images"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile the local cache against the server
    Sync(SyncArgs),
    /// Show what is cached locally
    Status(StatusArgs),
    /// Delete the local database and cached images
    ResetState(ResetStateArgs),
}

/// Location of the local cache, shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory holding the user database and cached images
    #[arg(long, default_value = "~/.offline-usersync")]
    pub data_dir: String,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Base URL of the media server, e.g. https://media.example.com
    #[arg(short = 's', long, env = "USERSYNC_SERVER_URL")]
    pub server_url: String,

    /// Access token sent with every request.
    /// WARNING: passing via --access-token is visible in process listings.
    /// Prefer the USERSYNC_ACCESS_TOKEN environment variable instead.
    #[arg(long, env = "USERSYNC_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Server user id to synchronize (repeatable)
    #[arg(short = 'u', long = "user")]
    pub users: Vec<String>,

    /// JSON file with the server user list (array of ids or {"Id": ...} objects)
    #[arg(long)]
    pub users_file: Option<String>,

    /// Run continuously, waiting N seconds between runs
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Max retries per request on transient errors (0 = no retries)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Maximum width of fetched profile images
    #[arg(long)]
    pub max_width: Option<u32>,

    /// Maximum height of fetched profile images
    #[arg(long)]
    pub max_height: Option<u32>,

    /// JPEG quality of fetched profile images (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// List every cached user
    #[arg(long)]
    pub users: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}
