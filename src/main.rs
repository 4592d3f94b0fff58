//! bucketkeeper -- reconciliation service for S3-compatible buckets.
//!
//! Reads desired bucket specs from a YAML file and converges the store
//! towards them: each configured bucket exists with the requested
//! versioning, and `--delete` tears a bucket down including all of its
//! objects.  Failed cycles are retried with exponential backoff; a
//! periodic resync re-runs convergence for as long as the process runs.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use bucketkeeper::engine::BucketEngine;
use bucketkeeper::reconciler::{ReconcileEvent, Reconciler};
use bucketkeeper::scheduler::Scheduler;
use bucketkeeper::status::{MemoryStatusSink, StatusSink};
use bucketkeeper::store::aws::AwsObjectStore;
use bucketkeeper::store::client::ObjectStore;
use bucketkeeper::store::memory::MemoryStore;

/// Command-line arguments for the bucketkeeper service.
#[derive(Parser, Debug)]
#[command(
    name = "bucketkeeper",
    version,
    about = "Converge declarative bucket specs onto an S3-compatible store"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bucketkeeper.example.yaml")]
    config: String,

    /// Run a single convergence pass and exit, ignoring the configured
    /// resync interval.
    #[arg(long)]
    once: bool,

    /// Delete the named bucket (and all of its objects) instead of
    /// converging the configured buckets.
    #[arg(long, value_name = "NAME")]
    delete: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bucketkeeper::config::load_config(&cli.config)?;

    // Initialize tracing / logging.  RUST_LOG overrides the config level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("loaded configuration from {}", cli.config);

    if config.observability.metrics {
        bucketkeeper::metrics::init_metrics(&config.observability.listen)?;
        bucketkeeper::metrics::describe_metrics();
        info!(
            "Prometheus exporter listening on {}",
            config.observability.listen
        );
    }

    // Initialize the object store backend based on config.
    let store: Arc<dyn ObjectStore> = match config.store.backend.as_str() {
        "memory" => {
            info!("memory store backend initialized (dry-run)");
            Arc::new(MemoryStore::new())
        }
        "s3" | _ => {
            let s3_config = config.store.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!("store.backend is 's3' but store.s3 config section is missing")
            })?;
            let details = s3_config.connection_details()?;
            Arc::new(AwsObjectStore::connect(details).await?)
        }
    };

    let engine = Arc::new(BucketEngine::new(store));
    let sink = Arc::new(MemoryStatusSink::new());
    let reconciler = Arc::new(Reconciler::new(
        engine,
        Arc::clone(&sink) as Arc<dyn StatusSink>,
    ));
    let scheduler = Scheduler::new(reconciler, config.reconcile.retry_policy());

    if let Some(name) = cli.delete {
        info!("deleting bucket {}", name);
        let failures = scheduler
            .converge(vec![ReconcileEvent::Delete { name: name.clone() }])
            .await;
        if failures > 0 {
            anyhow::bail!("failed to delete bucket {name}");
        }
        info!("bucket {} deleted", name);
        return Ok(());
    }

    let events: Vec<ReconcileEvent> = config
        .buckets
        .iter()
        .map(|spec| ReconcileEvent::Apply(spec.into()))
        .collect();

    if events.is_empty() {
        info!("no buckets configured, nothing to reconcile");
        return Ok(());
    }

    let resync_interval = if cli.once {
        std::time::Duration::ZERO
    } else {
        config.reconcile.resync_interval()
    };

    tokio::select! {
        _ = scheduler.run(events, resync_interval) => {},
        _ = shutdown_signal() => {},
    }

    for spec in &config.buckets {
        if let Some(status) = sink.get(&spec.name).await {
            info!("bucket {}: status {}", spec.name, status);
        }
    }

    info!("bucketkeeper shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to stop the resync
/// loop.  In-flight store calls are dropped; the next startup simply
/// reconverges.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
