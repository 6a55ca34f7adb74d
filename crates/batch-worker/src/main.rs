use anyhow::Context;
use batch_worker::handler::{EchoHandler, ProcessRecordHandler};
use batch_worker::{Worker, WorkerConfig};
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "batch-worker")]
#[command(about = "Batch processing worker", long_about = None)]
struct Args {
    /// Port for the Prometheus scrape endpoint [default: 8085]
    metrics_port: Option<u16>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Worker failed to start: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load configuration
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    config.apply_env();
    if let Some(port) = args.metrics_port {
        config.metrics.port = port;
    }
    config.validate()?;

    info!(
        "Starting worker for {} (namespace: {}, task queue: {})",
        config.target_address, config.namespace, config.task_queue
    );

    let worker = Worker::launch(&config, |runtime| {
        runtime.register_activity("Echo", EchoHandler)?;
        runtime.register_activity(
            "ProcessRecord",
            ProcessRecordHandler::new(Duration::from_millis(10)),
        )
    })
    .await
    .with_context(|| format!("failed to start worker for {}", config.target_address))?;

    shutdown_signal().await;

    let report = worker.shutdown().await;
    if report.abandoned > 0 {
        info!("{} executions were still running at exit", report.abandoned);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
