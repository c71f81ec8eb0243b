//! offline-usersync: refresh a local offline cache of server users.
//!
//! Each configured user's profile is fetched from the server and stored
//! locally along with their primary image. Users the server no longer
//! accepts are dropped from the cache. Per-user failures are logged and do
//! not stop the run.

#![warn(clippy::all)]

mod cli;
mod config;
mod shutdown;
mod types;

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{Config, StorePaths};
use offline_usersync::{HttpRemoteApi, OfflineUsersSync, SqliteLocalStore};

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let paths = StorePaths::from_args(&args.store);

    if !paths.db_path.exists() {
        println!("No user database found at {}", paths.db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let store = SqliteLocalStore::open(&paths.db_path, &paths.image_dir).await?;
    let summary = store.get_summary().await?;

    println!("User Database: {}", paths.db_path.display());
    println!("Image Cache:   {}", paths.image_dir.display());
    println!();
    println!("Cache:");
    println!("  Users:  {}", summary.users);
    println!(
        "  Images: {} ({} bytes)",
        summary.images, summary.image_bytes
    );
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {} ({} users)",
            started.format("%Y-%m-%d %H:%M:%S UTC"),
            summary.last_sync_users
        );
        match &summary.last_sync_completed {
            Some(completed) => println!(
                "Last sync completed: {}{}",
                completed.format("%Y-%m-%d %H:%M:%S UTC"),
                if summary.last_sync_interrupted {
                    " (interrupted)"
                } else {
                    ""
                }
            ),
            None => println!("Last sync completed: never (still running or aborted)"),
        }
    } else {
        println!("No sync runs recorded.");
    }

    if args.users && summary.users > 0 {
        println!();
        println!("Cached users:");
        for user in store.list_users().await? {
            let image = match (user.has_primary_image, user.has_cached_image) {
                (true, true) => "image cached",
                (true, false) => "image missing",
                (false, _) => "no image",
            };
            println!("  {} ({}) - {}", user.name, user.id, image);
        }
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let paths = StorePaths::from_args(&args.store);

    if !paths.db_path.exists() && !paths.image_dir.exists() {
        println!("No local cache found under {}", paths.data_dir.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the user database and cached images at:");
        println!("  {}", paths.db_path.display());
        println!("  {}", paths.image_dir.display());
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if paths.db_path.exists() {
        std::fs::remove_file(&paths.db_path)?;
        println!("User database deleted.");
    }

    // Also remove WAL and SHM files if they exist
    let wal_path = paths.db_path.with_extension("db-wal");
    let shm_path = paths.db_path.with_extension("db-shm");
    let _ = std::fs::remove_file(&wal_path);
    let _ = std::fs::remove_file(&shm_path);

    if paths.image_dir.exists() {
        std::fs::remove_dir_all(&paths.image_dir)?;
        println!("Image cache deleted.");
    }

    Ok(())
}

/// Run the sync command, once or on an interval until shutdown.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_sync_args(args)?;
    tracing::debug!(?config, "Loaded configuration");

    let store = Arc::new(SqliteLocalStore::open(&config.paths.db_path, &config.paths.image_dir).await?);
    tracing::info!("User database at {}", config.paths.db_path.display());

    let api = Arc::new(HttpRemoteApi::new(config.api_config())?);
    let syncer = OfflineUsersSync::new(api, store.clone())
        .with_image_options(config.image_options.clone());

    let shutdown_token = shutdown::install_signal_handler()?;

    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }

        let started = Instant::now();
        let run_id = store.start_sync_run(config.users.len()).await?;
        syncer
            .synchronize(&config.users, shutdown_token.child_token())
            .await;
        let interrupted = shutdown_token.is_cancelled();
        if let Err(e) = store.complete_sync_run(run_id, interrupted).await {
            tracing::warn!(run_id, error = %e, "Failed to record sync run completion");
        }
        tracing::info!(
            run_id,
            interrupted,
            elapsed_secs = started.elapsed().as_secs(),
            "Sync pass finished"
        );

        if let Some(interval) = config.watch_with_interval {
            if shutdown_token.is_cancelled() {
                tracing::info!("Shutdown requested, exiting...");
                break;
            }
            tracing::info!("Waiting {} seconds...", interval);
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Shutdown during wait, exiting...");
                    break;
                }
            }
        } else {
            break;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
        Command::Sync(args) => run_sync(args).await,
    }
}
