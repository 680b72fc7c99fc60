//! nest-refresher: recompute, filter and de-duplicate nests
//!
//! ## Usage
//!
//! ```bash
//! # Refresh every nest, then disable overlapping ones
//! nest-refresher --config nests.toml
//!
//! # Re-query spawnpoint counts even when already known
//! nest-refresher --golbat-db /var/lib/golbat.db refresh --force-spawnpoints
//!
//! # Refresh a single nest and show what changed
//! nest-refresher refresh-nest 1234
//!
//! # Only run the overlap pass
//! nest-refresher disable-overlaps --percent 60
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nest_refresher::config::DbConfig;
use nest_refresher::{
    Config, DbRefresher, GolbatDb, NestStore, NestsDb, OverlapResolver, SpawnpointSource,
};

#[derive(Parser, Debug)]
#[command(name = "nest-refresher")]
#[command(about = "Refresh nest attributes and filter out unusable nests")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Nests SQLite database
    #[arg(long, env = "NESTS_DB")]
    nests_db: Option<PathBuf>,

    /// Spawnpoint SQLite database (enables spawnpoint counting)
    #[arg(long, env = "GOLBAT_DB")]
    golbat_db: Option<PathBuf>,

    /// Number of nests refreshed in parallel
    #[arg(long)]
    concurrency: Option<i32>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh every nest, then disable overlapping nests (default)
    Refresh {
        /// Re-query spawnpoint counts even when already known
        #[arg(long)]
        force_spawnpoints: bool,
    },

    /// Refresh a single nest
    RefreshNest {
        nest_id: i64,
    },

    /// Only run the overlap pass
    DisableOverlaps {
        /// Overlap threshold in percent (overrides config)
        #[arg(long)]
        percent: Option<f64>,
    },

    /// List recently seen spawnpoints inside a nest
    Spawnpoints {
        nest_id: i64,
    },

    /// Show nest counts by status
    Stats,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("nest_refresher=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    // Load config
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(path) = cli.nests_db {
        config.nests_db.path = path;
    }
    if let Some(path) = cli.golbat_db {
        config.golbat_db = Some(DbConfig { path });
    }
    if let Some(concurrency) = cli.concurrency {
        config.filters.concurrency = concurrency;
    }
    config.validate()?;

    let nests = Arc::new(NestsDb::open(&config.nests_db.path)?);
    let golbat: Option<Arc<dyn SpawnpointSource>> = match &config.golbat_db {
        Some(db) => {
            let source: Arc<dyn SpawnpointSource> = Arc::new(GolbatDb::open(&db.path)?);
            Some(source)
        }
        None => {
            warn!("No spawnpoint database configured, spawnpoint counts will not be queried");
            None
        }
    };

    let command = cli.command.unwrap_or(Command::Refresh {
        force_spawnpoints: false,
    });

    match command {
        Command::Refresh { force_spawnpoints } => {
            if force_spawnpoints {
                config.filters.force_spawnpoints_refresh = true;
            }

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, stopping refresh");
                    on_ctrl_c.cancel();
                }
            });

            let refresher = DbRefresher::new(nests.clone(), golbat);
            let summary = refresher.refresh_all_nests(&config.filters, cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::RefreshNest { nest_id } => {
            let refresher = DbRefresher::new(nests.clone(), golbat);
            let outcome = refresher.refresh_nest_by_id(&config.filters, nest_id).await?;

            println!("{}", outcome.nest.full_name());
            match outcome.classification.discarded() {
                Some(reason) => println!("  status: discarded ({})", reason),
                None => println!("  status: active"),
            }
            if outcome.written {
                println!("  changed: {}", outcome.changed_fields.join(", "));
            } else {
                println!("  changed: nothing");
            }
            for explanation in &outcome.explanations {
                println!("  - {}", explanation);
            }
        }

        Command::DisableOverlaps { percent } => {
            let threshold = percent.unwrap_or(config.filters.max_overlap_percent);
            if !(threshold > 0.0 && threshold < 100.0) {
                info!(threshold, "Overlap threshold outside (0, 100), nothing to do");
                return Ok(());
            }
            let disabled = OverlapResolver::new(nests.clone())
                .disable_overlapping(threshold)
                .await?;
            println!("Disabled {} overlapping nests", disabled);
        }

        Command::Spawnpoints { nest_id } => {
            let Some(golbat) = golbat else {
                bail!("spawnpoint listing needs --golbat-db or [golbat_db] in the config");
            };
            let nest = nests.get_nest(nest_id, true).await?;
            let geometry = nest
                .geometry()
                .with_context(|| format!("nest {} has no usable polygon", nest.full_name()))?;
            let ids = golbat.contained_spawnpoints(&geometry).await?;
            println!("{}", serde_json::to_string(&ids)?);
        }

        Command::Stats => {
            let stats = nests.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
