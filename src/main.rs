use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetcron::cache::{Cache, CacheBackend, MemoryBackend, RedisBackend};
use fleetcron::config::Config;
use fleetcron::gateway::Gateway;
use fleetcron::registry::StaticDirectory;
use fleetcron::security::TokenStore;

#[derive(Parser)]
#[command(
    name = "fleetcron",
    version,
    about = "Fleet-wide cron coordinator: locked, rate-limited fan-out of per-site maintenance triggers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger gateway
    Serve {
        /// TOML file with [[sites]] entries for the site directory
        #[arg(short, long)]
        sites: PathBuf,
    },

    /// Manage the stored endpoint token
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Delete every fleetcron key from the shared cache
    Purge,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Generate and store a fresh random token
    Generate,

    /// Store an operator-supplied token (minimum 16 characters)
    Set {
        /// The token value
        token: String,
    },

    /// Delete the stored token (disables the endpoint unless another
    /// source configures one)
    Delete,

    /// Print whether a token is stored
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Serve { sites } => {
            tracing::info!(sites = %sites.display(), "fleetcron gateway starting");

            if let Err(e) = fleetcron::metrics::init_metrics() {
                tracing::warn!(error = %e, "Metrics initialization failed, continuing without");
            }

            let directory = Arc::new(StaticDirectory::from_toml_file(&sites)?);
            let backend = cache_backend(&config).await?;
            let gateway = Gateway::new(config, backend, directory)?;

            gateway
                .serve_with_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("Shutdown signal received");
                })
                .await?;
        }

        Commands::Token { action } => {
            let backend = cache_backend(&config).await?;
            let cache = Cache::new(backend, config.cache.key_prefix.clone());
            let store = TokenStore::new(cache);

            match action {
                TokenAction::Generate => {
                    let token = store.generate().await?;
                    println!("{token}");
                }
                TokenAction::Set { token } => {
                    store.set(&token).await?;
                    println!("Token stored");
                }
                TokenAction::Delete => {
                    if store.delete().await? {
                        println!("Token deleted");
                    } else {
                        println!("No token was stored");
                    }
                }
                TokenAction::Show => match store.get().await? {
                    Some(token) => println!("Token configured ({} characters)", token.len()),
                    None => println!("No token stored"),
                },
            }
        }

        Commands::Purge => {
            let backend = cache_backend(&config).await?;
            let cache = Cache::new(backend, config.cache.key_prefix.clone());
            let removed = cache.purge().await?;
            println!("Removed {removed} cache entries");
        }
    }

    Ok(())
}

/// Build the configured cache backend
async fn cache_backend(config: &Config) -> Result<Arc<dyn CacheBackend>> {
    if config.cache.in_memory {
        tracing::warn!("Using in-memory cache; coordination is limited to this process");
        return Ok(Arc::new(MemoryBackend::new()));
    }

    let backend = RedisBackend::connect(&config.cache.url, config.cache.pool_size)
        .await
        .context("connecting to Redis")?;
    Ok(Arc::new(backend))
}

/// Initialize tracing with the requested format
fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let default_filter = if verbose { "fleetcron=debug,info" } else { "fleetcron=info,warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
