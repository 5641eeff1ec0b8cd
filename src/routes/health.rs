// ABOUTME: Health check route handlers for service monitoring
// ABOUTME: Liveness answers unconditionally; readiness checks the database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use healthsync_core::errors::AppError;
use serde_json::{json, Value};

use crate::engine::SyncEngine;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(engine: Arc<SyncEngine>) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .route("/ready", get(Self::handle_ready))
            .with_state(engine)
    }

    async fn handle_health() -> Json<Value> {
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339()
        }))
    }

    async fn handle_ready(State(engine): State<Arc<SyncEngine>>) -> Result<Json<Value>, AppError> {
        engine.health_check().await?;
        Ok(Json(json!({
            "status": "ready",
            "vendors": engine.vendors(),
            "timestamp": Utc::now().to_rfc3339()
        })))
    }
}
