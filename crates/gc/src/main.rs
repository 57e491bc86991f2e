//! wharf-gc: garbage collection daemon and maintenance commands.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wharf_core::RetentionWindow;
use wharf_core::config::AppConfig;
use wharf_gc::{GarbageCollector, GcWorker, RetentionPolicy};
use wharf_metadata::MetadataStore;

/// Garbage collector for the wharf artifact store
#[derive(Parser, Debug)]
#[command(name = "wharf-gc")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "WHARF_CONFIG", default_value = "config/gc.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic worker until interrupted
    Run {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Print Prometheus metrics when the worker exits
        #[arg(long)]
        print_metrics: bool,
    },
    /// Collect garbage in one repository (namespace/name)
    Collect { repository: String },
    /// Remove a repository and everything only it owns
    Purge {
        repository: String,
        /// Purge even if the repository is not marked for deletion
        #[arg(long)]
        force: bool,
    },
    /// Print a repository that has garbage, if any
    FindGarbage {
        /// Extra age past the retention window
        #[arg(long, default_value_t = 0)]
        min_age_secs: i64,
    },
    /// Show or change a namespace retention window
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },
    /// Print counts of unreferenced catalog rows
    Stats,
}

#[derive(Subcommand, Debug)]
enum RetentionAction {
    Get { namespace: String },
    Set { namespace: String, secs: u64 },
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("WHARF_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn resolve_repository(metadata: &dyn MetadataStore, full_name: &str) -> Result<i64> {
    let Some((namespace, name)) = full_name.split_once('/') else {
        bail!("repository must be given as namespace/name, got {full_name:?}");
    };
    let repository = metadata
        .get_repository_by_name(namespace, name)
        .await?
        .with_context(|| format!("repository {full_name} not found"))?;
    Ok(repository.repository_id)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args.config)?;

    wharf_gc::metrics::register_metrics();

    let storage = wharf_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;

    let metadata = wharf_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;

    let collector = Arc::new(GarbageCollector::new(metadata.clone(), storage));

    match args.command {
        Command::Run {
            once,
            print_metrics,
        } => {
            let worker = Arc::new(GcWorker::new(collector, config.gc.clone()));
            if once || !config.gc.worker_enabled {
                if !once {
                    tracing::warn!("GC worker disabled in configuration, running a single pass");
                }
                print_json(&worker.run_pass().await?)?;
            } else {
                let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                let handle = worker.spawn(shutdown_rx);

                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
                handle.await.context("GC worker panicked")?;
            }

            if print_metrics {
                print!("{}", wharf_gc::metrics::render()?);
            }
        }
        Command::Collect { repository } => {
            let repository_id = resolve_repository(metadata.as_ref(), &repository).await?;
            let report = collector
                .collect_with_report(repository_id, time::OffsetDateTime::now_utc())
                .await?;
            print_json(&report)?;
        }
        Command::Purge { repository, force } => {
            let repository_id = resolve_repository(metadata.as_ref(), &repository).await?;
            match collector
                .purge_with_report(repository_id, force, time::OffsetDateTime::now_utc())
                .await?
            {
                Some(report) => print_json(&report)?,
                None => bail!(
                    "repository {repository} is not marked for deletion; pass --force to purge anyway"
                ),
            }
        }
        Command::FindGarbage { min_age_secs } => {
            match collector
                .find_repository_with_garbage(time::Duration::seconds(min_age_secs))
                .await?
            {
                Some(repository) => {
                    let namespace = metadata
                        .get_namespace(repository.namespace_id)
                        .await?
                        .map(|n| n.name)
                        .unwrap_or_default();
                    println!("{}/{} ({})", namespace, repository.name, repository.repository_id);
                }
                None => println!("no repository with garbage"),
            }
        }
        Command::Retention { action } => {
            let retention = RetentionPolicy::new(metadata.clone());
            match action {
                RetentionAction::Get { namespace } => {
                    let window = retention.expiration_window(&namespace).await?;
                    println!("{namespace}: {window}");
                }
                RetentionAction::Set { namespace, secs } => {
                    retention
                        .set_expiration_window(&namespace, RetentionWindow::from_secs(secs))
                        .await?;
                    println!("{namespace}: {}", RetentionWindow::from_secs(secs));
                }
            }
        }
        Command::Stats => {
            print_json(&metadata.garbage_stats().await?)?;
        }
    }

    Ok(())
}
