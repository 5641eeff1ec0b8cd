// ABOUTME: Server binary running the sync engine behind its HTTP surface
// ABOUTME: Loads configuration, starts background workers, and shuts down cleanly on Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # HealthSync Server Binary
//!
//! Starts the scheduler, the streaming gateway worker, and the retention
//! sweeper, then serves the device and ingestion routes until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use healthsync::config::SyncEngineConfig;
use healthsync::engine::SyncEngine;
use healthsync::logging;
use healthsync::routes;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "healthsync-server")]
#[command(about = "HealthSync - device synchronization engine for family health records")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Override scheduler worker pool size
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = SyncEngineConfig::from_env();
    if let Some(port) = args.http_port {
        config.server.port = port;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(workers) = args.workers {
        config.scheduler.worker_pool_size = workers.max(1);
    }

    info!("Starting HealthSync server");
    info!("{}", config.summary());

    let address = format!("{}:{}", config.server.host, config.server.port);
    let engine = Arc::new(
        SyncEngine::from_config(config)
            .await
            .context("failed to initialize sync engine")?,
    );
    engine.start().await;

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(address = %address, "HTTP server listening");

    let served = axum::serve(listener, routes::router(&engine))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.shutdown().await;
    if let Err(e) = served {
        error!(error = %e, "HTTP server failed");
        return Err(e.into());
    }
    info!("HealthSync server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown signal received");
}
