// ABOUTME: Relay push route feeding the streaming ingestion gateway
// ABOUTME: Verifies the relay signature and answers 202 Accepted or 429 with Retry-After
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use healthsync_core::errors::AppError;
use healthsync_providers::signature::SIGNATURE_HEADER;
use uuid::Uuid;

use crate::engine::SyncEngine;

/// Largest relay payload accepted, in bytes
const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Push ingestion routes
pub struct IngestRoutes;

impl IngestRoutes {
    /// Create the ingestion route
    pub fn routes(engine: Arc<SyncEngine>) -> Router {
        Router::new()
            .route("/ingest/:connection_id", post(Self::handle_ingest))
            .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
            .with_state(engine)
    }

    async fn handle_ingest(
        State(engine): State<Arc<SyncEngine>>,
        Path(connection_id): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let connection_id = Uuid::parse_str(&connection_id).map_err(|_| {
            AppError::invalid_input(format!("Invalid connection id: {connection_id}"))
        })?;
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        engine.verify_relay_signature(signature, &body)?;

        let receipt = engine.stream_ingest(connection_id, &body).await?;
        Ok((StatusCode::ACCEPTED, Json(receipt)).into_response())
    }
}
