mod demo;

use bytes::Bytes;
use clap::Parser;
use demo::{CHECKSUM, Pi, PiParams};
use futures::future::join_all;
use std::{sync::Arc, time::Instant};
use tokio::signal;
use workhost::{
    Dispatcher, spawn_worker,
    config::{CliArgs, DemoConfig},
    telemetry::init_tracing,
    workhost_core::types::Payload,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    init_tracing(config.pool.log_level)?;

    let actions = Arc::new(demo::actions()?);
    let (workers, tasks): (Vec<_>, Vec<_>) =
        (0..config.num_workers).map(|_| spawn_worker(&actions)).unzip();
    let pool = Dispatcher::new(
        config.pool.clone().with_manifest(actions.manifest()),
        workers,
    );

    let outcome = tokio::select! {
        res = run_jobs(&pool, &config) => res,
        () = shutdown_signal() => Ok(()),
    };

    let stats = pool.snapshot().await?;
    tracing::info!(?stats, "Pool state before shutdown");

    pool.shutdown().await?;
    match tokio::time::timeout(config.pool.shutdown_timeout, join_all(tasks)).await {
        Ok(joined) => {
            for res in joined {
                res?;
            }
        }
        Err(_) => tracing::warn!("Some workers were still busy after shutdown, abandoning them"),
    }

    outcome?;
    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Runs the demo batch: `config.jobs` pi estimations, then one checksum over
/// a 1 MiB attachment.
async fn run_jobs(pool: &Dispatcher, config: &DemoConfig) -> anyhow::Result<()> {
    tracing::info!(
        workers = config.num_workers,
        jobs = config.jobs,
        terms = config.pi_terms,
        "Submitting pi jobs"
    );
    let started = Instant::now();
    let params = PiParams {
        terms: config.pi_terms,
    };
    let results = join_all((0..config.jobs).map(|_| pool.call::<Pi>(params))).await;
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(pi) => tracing::info!(job = i, pi, "got pi"),
            Err(err) => tracing::error!(job = i, error = %err, "pi job failed"),
        }
    }
    tracing::info!(elapsed = ?started.elapsed(), "All pi jobs settled");

    let blob = Bytes::from((0..=u8::MAX).cycle().take(1 << 20).collect::<Vec<u8>>());
    let checksum = pool
        .submit(CHECKSUM, Payload::default().with_transfer([blob]))
        .await?;
    tracing::info!(result = %checksum.value, "Checksum finished");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM. A handler that cannot be
/// installed never resolves.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal, stopping the batch"),
        () = terminate => tracing::info!("Received SIGTERM signal, stopping the batch"),
    }
}
