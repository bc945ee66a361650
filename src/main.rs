use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tidings::cache::{ContentCache, SystemClock};
use tidings::config::Config;
use tidings::feed::{
    write_atomically, FeedLocator, FeedSyncCoordinator, HttpFetcher, MaintenanceService,
    OpmlInterchange, RefreshSummary,
};
use tidings::storage::{Database, DatabaseError, FeedQuery, FeedSort, FolderScope};

#[derive(Parser, Debug)]
#[command(name = "tidings", version, about = "Feed ingestion engine for RSS and Atom")]
struct Args {
    /// Config file (default: ~/.config/tidings/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed, discovering it from a site URL if needed
    Add {
        url: String,
        /// Folder to file the feed under (created if missing)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Refresh every feed, or one feed by id
    Refresh {
        #[arg(long)]
        feed: Option<i64>,
    },
    /// Import subscriptions from an OPML file
    Import { file: PathBuf },
    /// Export subscriptions as OPML (stdout when no file is given)
    Export { file: Option<PathBuf> },
    /// Merge duplicate folders and feeds, remove unreachable feeds
    Cleanup,
    /// List feeds with unread counts
    List {
        #[arg(long)]
        folder: Option<String>,
    },
    /// Inspect or trim the article content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
    /// Apply the configured age and size limits
    Evict,
    Clear,
}

/// Cancel `token` on Ctrl-C so batch operations stop starting new work.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing in-flight work...");
            child.cancel();
        }
    });
    token
}

/// Create `dir` if missing, restricted to the current user on Unix.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory metadata");
            }
        }
    }
    Ok(())
}

async fn open_database(config: &Config) -> Result<Database> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_private_dir(parent)?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of tidings appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn locator(config: &Config) -> Result<FeedLocator> {
    let fetcher = HttpFetcher::new(config.url_policy(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    Ok(FeedLocator::new(fetcher))
}

/// SEC-008: Canonicalize to resolve symlinks and require a regular file.
fn read_import_file(file: &Path) -> Result<Vec<u8>> {
    let canonical = file
        .canonicalize()
        .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        anyhow::bail!("Import path must be a regular file");
    }
    std::fs::read(&canonical)
        .with_context(|| format!("Failed to read import file: {}", canonical.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match args.command {
        Command::Add { url, folder } => {
            let db = open_database(&config).await?;
            let folder_id = match folder {
                Some(name) => Some(match db.folder_by_name(&name).await? {
                    Some(existing) => existing.id,
                    None => db.create_folder(&name).await?.id,
                }),
                None => None,
            };
            let sync = FeedSyncCoordinator::new(db, locator(&config)?);
            let feed = sync
                .add_feed(&url, folder_id)
                .await
                .with_context(|| format!("Failed to add {url}"))?;
            println!(
                "Added \"{}\" ({}) with {} unread articles",
                feed.title, feed.url, feed.unread_count
            );
        }

        Command::Refresh { feed } => {
            let db = open_database(&config).await?;
            let feeds = match feed {
                Some(id) => vec![db
                    .feed(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No feed with id {id}"))?],
                None => db.query_feeds(&FeedQuery::all()).await?,
            };
            let sync =
                FeedSyncCoordinator::new(db, locator(&config)?).with_batch_size(config.batch_size());

            let outcomes = sync.refresh_all(&feeds, &cancel_on_ctrl_c()).await;
            for outcome in outcomes.iter() {
                if let Err(e) = &outcome.result {
                    eprintln!("  failed: {} ({e})", outcome.url);
                }
            }
            let summary = RefreshSummary::from(outcomes.as_slice());
            println!(
                "Refreshed {} feeds: {} new articles, {} failed",
                summary.succeeded, summary.new_articles, summary.failed
            );
        }

        Command::Import { file } => {
            let bytes = read_import_file(&file)?;
            let db = open_database(&config).await?;
            let opml = OpmlInterchange::new(db, locator(&config)?);
            let result = opml
                .import_document(&bytes, &cancel_on_ctrl_c())
                .await
                .context("Failed to import OPML")?;

            for failure in &result.failures {
                eprintln!("  failed: {} ({})", failure.url, failure.error);
            }
            println!(
                "Imported {} feeds ({} already subscribed, {} failed), {} folders created",
                result.feeds_added,
                result.feeds_skipped,
                result.failures.len(),
                result.folders_created
            );
            if result.cancelled {
                println!("Import was interrupted before finishing.");
            }
        }

        Command::Export { file } => {
            let db = open_database(&config).await?;
            let opml = OpmlInterchange::new(db, locator(&config)?);
            let document = opml.export_store().await.context("Failed to export OPML")?;
            match file {
                Some(path) => {
                    write_atomically(&path, document.as_bytes())
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported subscriptions to {}", path.display());
                }
                None => print!("{document}"),
            }
        }

        Command::Cleanup => {
            let db = open_database(&config).await?;
            let service =
                MaintenanceService::with_policy(db, locator(&config)?, config.retry_policy());
            let result = service
                .run_cleanup(&cancel_on_ctrl_c())
                .await
                .context("Cleanup failed")?;
            println!(
                "Removed {} duplicate folders, {} duplicate feeds, {} unreachable feeds",
                result.folders_removed, result.feeds_removed, result.failing_feeds_removed
            );
        }

        Command::List { folder } => {
            let db = open_database(&config).await?;
            let query = match folder {
                Some(name) => {
                    let found = db
                        .folder_by_name(&name)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("No folder named {name}"))?;
                    FeedQuery::in_folder(FolderScope::In(found.id))
                }
                None => FeedQuery::all(),
            };
            for feed in db.query_feeds(&query.sorted(FeedSort::Title)).await? {
                let status = feed
                    .last_error
                    .as_deref()
                    .map(|e| format!("  [error: {e}]"))
                    .unwrap_or_default();
                println!(
                    "{:>5}  {:>4} unread  {}  <{}>{status}",
                    feed.id, feed.unread_count, feed.title, feed.url
                );
            }
        }

        Command::Cache { action } => {
            let dir = config.cache_dir();
            ensure_private_dir(&dir)?;
            let cache = ContentCache::open(&dir, Arc::new(SystemClock))
                .await
                .with_context(|| format!("Failed to open cache at {}", dir.display()))?;

            match action {
                CacheAction::Stats => {}
                CacheAction::Evict => {
                    let aged = cache.evict_older_than(config.cache_max_age()).await?;
                    let sized = cache.enforce_size_limit(config.cache_max_bytes).await?;
                    println!("Evicted {aged} expired and {sized} over-limit entries");
                }
                CacheAction::Clear => {
                    cache.clear().await?;
                    println!("Cache cleared");
                }
            }

            let stats = cache.stats().await?;
            println!(
                "{} entries, {} bytes, last cleanup: {}",
                stats.entry_count,
                stats.total_size,
                stats
                    .last_cleanup
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            cache.shutdown().await?;
        }
    }

    Ok(())
}
