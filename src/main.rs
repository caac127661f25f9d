//! `sgarchive` CLI entry point: bootstraps tracing and configuration, then
//! either serves the webhook ingestion HTTP surface or runs one compaction
//! pass (spec.md §6, §4.6).

mod scheduler;
mod server;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use chrono::Utc;
use sgarchive_compaction::CompactionEngine;
use sgarchive_config::Config;
use sgarchive_objectstore::{CancellationToken, ObjectStore, ObjectStoreConfig, S3ObjectStore};
use sgarchive_paths::PathCodec;
use tracing::{error, info, warn};
use uuid::Uuid;

const RAW_PREFIX: &str = "raw/v1";
const COMPACTED_PREFIX: &str = "compacted/v1";

#[derive(Parser)]
#[command(name = "sgarchive", about = "SendGrid Event Webhook archive and compactor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve webhook ingestion and the health endpoint, with the daily
    /// compaction scheduler running alongside it.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
    /// Run exactly one compaction pass and exit, bypassing the scheduler.
    Compact {
        #[arg(long)]
        once: bool,
    },
}

fn instance_id() -> (String, String) {
    let host_name = hostname().unwrap_or_else(|| "unknown-host".to_string());
    (format!("{host_name}-{}", Uuid::new_v4()), host_name)
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|out| String::from_utf8(out.stdout).ok())
            .map(|s| s.trim().to_string())
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid or missing configuration");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(S3ObjectStore::new(ObjectStoreConfig {
        endpoint: config.object_store.service_url.clone(),
        region: config.object_store.region.clone(),
        bucket: config.object_store.bucket_name.clone(),
        access_key: config.object_store.access_key.clone(),
        secret_key: config.object_store.secret_key.clone(),
    }));
    let paths = PathCodec::new(RAW_PREFIX, COMPACTED_PREFIX);
    let (instance_id, host_name) = instance_id();
    info!(instance_id, "starting sgarchive");

    startup_healthcheck(&*store).await;

    match cli.command {
        Command::Serve { listen } => {
            let engine = Arc::new(CompactionEngine::new(
                Arc::clone(&store),
                paths.clone(),
                instance_id,
                host_name,
                config.compaction.max_batch_size_bytes,
            ));
            let cancel = CancellationToken::new();

            let scheduler_handle = if config.compaction.periodic_run_enabled {
                Some(scheduler::spawn(Arc::clone(&engine), cancel.clone()))
            } else {
                info!("periodic compaction disabled, serving ingestion only");
                None
            };

            let server_result = server::serve(&listen, config, Arc::clone(&store), paths, cancel.clone()).await;

            cancel.cancel();
            if let Some(handle) = scheduler_handle {
                let _ = handle.await;
            }

            match server_result {
                Ok(()) => ExitCode::SUCCESS,
                Err(error) => {
                    error!(%error, "server exited with an error");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Compact { once: _ } => {
            let engine = CompactionEngine::new(store, paths, instance_id, host_name, config.compaction.max_batch_size_bytes);
            let cancel = CancellationToken::new();
            match engine.run(Utc::now(), &cancel).await {
                Ok(outcome) => {
                    info!(?outcome, "compaction run finished");
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    error!(%error, "compaction run failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// HEAD-or-list probe against the configured bucket before serving
/// traffic. Unreachable storage is logged, not fatal: the process still
/// starts so `/health` can report the problem to an operator.
async fn startup_healthcheck<S: ObjectStore>(store: &S) {
    let cancel = CancellationToken::new();
    match store.list_direct(&format!("{RAW_PREFIX}/"), &cancel).await {
        Ok(_) => info!("object store healthcheck passed"),
        Err(error) => warn!(%error, "object store healthcheck failed, starting anyway"),
    }
}
