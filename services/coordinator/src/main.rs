use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use sea_orm::Database;
use tracing::info;

use rotation_coordinator::config::{CacheBackend, CoordinatorConfig};
use rotation_coordinator::domain::types::RollbackRequest;
use rotation_coordinator::router::build_router;
use rotation_coordinator::state::AppState;
use rotation_coordinator::worker::monitor::TracingAlertSink;
use rotation_coordinator::worker::scheduler::TaskGroup;
use rotation_core::tracing::{LogFormat, init_tracing};
use rotation_domain::id::{PersonId, SwapId};

#[derive(Parser)]
#[command(name = "rotation-coordinator", about = "Outbox relay and mutation coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve health/metrics endpoints and run every periodic task in-process.
    Serve,
    /// One relay pass: reclaim stuck messages, then claim and publish a batch.
    Relay {
        #[arg(long)]
        batch_size: Option<u64>,
    },
    /// Move old PUBLISHED messages into the archive.
    Archive {
        #[arg(long)]
        batch_size: Option<u64>,
        #[arg(long)]
        older_than_hours: Option<u32>,
    },
    /// Delete archive rows past retention.
    PruneArchive {
        #[arg(long)]
        batch_size: Option<u64>,
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Delete dead letters past their maximum age.
    PruneDeadLetters {
        #[arg(long)]
        batch_size: Option<u64>,
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Collect one outbox health report and forward anomalies to the log.
    Monitor,
    /// Reverse an executed swap on behalf of an operator.
    RollbackSwap {
        #[arg(long)]
        swap_id: SwapId,
        /// Person recorded as performing the rollback.
        #[arg(long)]
        by: PersonId,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CoordinatorConfig::from_env()?;
    init_tracing(LogFormat::parse(&config.log_format));

    let db = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let needs_redis = config.cache_backend == CacheBackend::Redis || config.outbox_stream.is_some();
    let redis = match (&config.redis_url, needs_redis) {
        (Some(url), true) => Some(
            deadpool_redis::Config::from_url(url)
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .context("failed to create Redis pool")?,
        ),
        _ => None,
    };

    let state = AppState::new(db, redis, config)?;

    match cli.command {
        Command::Serve => serve(state).await,
        Command::Relay { batch_size } => {
            let relay = state.relay();
            let stats = relay
                .run(batch_size.unwrap_or(relay.settings.batch_size))
                .await?;
            print_json(&stats)
        }
        Command::Archive {
            batch_size,
            older_than_hours,
        } => {
            let archiver = state.archiver();
            let archived = archiver
                .archive_published(
                    batch_size.unwrap_or(archiver.settings.batch_size),
                    older_than_hours.unwrap_or(archiver.settings.archive_after_hours),
                )
                .await?;
            print_json(&serde_json::json!({ "archived": archived }))
        }
        Command::PruneArchive {
            batch_size,
            retention_days,
        } => {
            let archiver = state.archiver();
            let pruned = archiver
                .prune_archive(
                    batch_size.unwrap_or(archiver.settings.batch_size),
                    retention_days.unwrap_or(archiver.settings.archive_retention_days),
                )
                .await?;
            print_json(&serde_json::json!({ "pruned": pruned }))
        }
        Command::PruneDeadLetters {
            batch_size,
            max_age_days,
        } => {
            let archiver = state.archiver();
            let pruned = archiver
                .prune_dead_letters(
                    batch_size.unwrap_or(archiver.settings.batch_size),
                    max_age_days.unwrap_or(archiver.settings.dead_letter_max_age_days),
                )
                .await?;
            print_json(&serde_json::json!({ "pruned": pruned }))
        }
        Command::Monitor => {
            let report = state.monitor.collect_and_alert(&TracingAlertSink).await?;
            print_json(&serde_json::json!({
                "health": report.health,
                "metrics": report.flatten(),
                "anomalies": report.anomalies,
            }))
        }
        Command::RollbackSwap {
            swap_id,
            by,
            reason,
        } => {
            let outcome = state
                .swap_executor()
                .rollback_swap(
                    swap_id,
                    RollbackRequest {
                        rolled_back_by: by,
                        reason,
                    },
                )
                .await?;
            print_json(&outcome)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let config = Arc::clone(&state.config);
    let mut tasks = TaskGroup::new();

    let relay = Arc::new(state.relay());
    tasks.spawn_periodic("outbox-relay", config.relay_interval, move || {
        let relay = Arc::clone(&relay);
        async move { relay.run_once().await.map(|_| ()) }
    });

    let archiver = Arc::new(state.archiver());
    tasks.spawn_periodic("outbox-maintenance", config.archive_interval, move || {
        let archiver = Arc::clone(&archiver);
        async move { archiver.run_maintenance().await.map(|_| ()) }
    });

    let monitor = Arc::clone(&state.monitor);
    tasks.spawn_periodic("outbox-monitor", config.monitor_interval, move || {
        let monitor = Arc::clone(&monitor);
        async move {
            monitor
                .collect_and_alert(&TracingAlertSink)
                .await
                .map(|_| ())
        }
    });

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("rotation coordinator listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server error")?;

    tasks.shutdown_and_join().await;
    Ok(())
}
