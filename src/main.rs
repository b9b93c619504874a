use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use feedwell::api::{self, AppState};
use feedwell::config::Config;
use feedwell::content::{ContentFetcher, ContentPipeline};
use feedwell::http::build_client;
use feedwell::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedwell/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedwell"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedwell",
    about = "RSS/Atom aggregator with on-demand full article extraction"
)]
struct Args {
    /// Config file (default: ~/.config/feedwell/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Reset the cache database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Listen address, overriding the config file
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },
    /// Refresh the article cache once and exit
    Refresh,
    /// Extract one article's content and print it
    Extract {
        /// Article URL
        url: String,
        /// Feed the article came from
        #[arg(long, value_name = "URL")]
        feed: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match args.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Extract { url, feed } => {
            let pipeline = ContentPipeline::new(ContentFetcher::new(
                build_client(&config).context("Failed to build HTTP client")?,
                config.allow_private_hosts,
            ));
            let extracted = pipeline.extract(&url, feed.as_deref(), "").await;
            println!("{}", extracted.html);
            if let Some(title) = &extracted.title {
                eprintln!("title: {title}");
            }
            eprintln!("source: {}", extracted.source);
            if let Some(error) = extracted.error {
                eprintln!("error: {error}");
            }
        }
        Command::Refresh => {
            let db = open_database(&config, &config_dir, args.reset_db).await?;
            let state = AppState::new(&config, db).context("Failed to build HTTP client")?;
            let outcome = state.refresher.refresh(&state.db).await?;
            println!(
                "Cached {} articles ({} sources failed, {} entries skipped)",
                outcome.articles, outcome.failed_sources, outcome.skipped_entries
            );
            if let Some(error) = outcome.error {
                eprintln!("{error}");
            }
        }
        Command::Serve { bind } => {
            let addr = match bind {
                Some(addr) => addr,
                None => config
                    .bind
                    .parse()
                    .with_context(|| format!("Invalid bind address '{}'", config.bind))?,
            };
            let db = open_database(&config, &config_dir, args.reset_db).await?;

            let evicted = db.evict_expired().await.context("Failed to evict expired records")?;
            tracing::debug!(evicted, "Evicted expired cache records");

            let state = AppState::new(&config, db).context("Failed to build HTTP client")?;
            api::serve(addr, Arc::new(state)).await?;
        }
    }

    Ok(())
}

/// Open the cache database at the configured path, or `cache.db` in the
/// config directory.
async fn open_database(config: &Config, config_dir: &std::path::Path, reset: bool) -> Result<Database> {
    let db_path = match &config.database_path {
        Some(path) => config_dir.join(path),
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
            }
            // SEC-007: user-only access to the directory holding the cache
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(config_dir, std::fs::Permissions::from_mode(0o700))
                {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            config_dir.join("cache.db")
        }
    };

    if reset && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::Locked) => {
            eprintln!("Error: The cache database is locked by another process. Stop it and try again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}
