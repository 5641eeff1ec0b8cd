// ABOUTME: Route module organization for the HealthSync HTTP surface
// ABOUTME: Merges health, device, and ingestion routes over a shared SyncEngine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! HTTP routes
//!
//! Each domain module contains only route definitions and thin handlers that
//! delegate to [`SyncEngine`].

/// Device connection routes
pub mod devices;
/// Health check and readiness routes
pub mod health;
/// Relay push ingestion routes
pub mod ingest;

pub use devices::DeviceRoutes;
pub use health::HealthRoutes;
pub use ingest::IngestRoutes;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::engine::SyncEngine;

/// Complete application router
pub fn router(engine: &Arc<SyncEngine>) -> Router {
    Router::new()
        .merge(HealthRoutes::routes(Arc::clone(engine)))
        .merge(DeviceRoutes::routes(Arc::clone(engine)))
        .merge(IngestRoutes::routes(Arc::clone(engine)))
        .layer(TraceLayer::new_for_http())
}
