// ABOUTME: Device connection route handlers: authorize, callback, list, sync, toggle, disconnect
// ABOUTME: Thin axum handlers delegating to the SyncEngine trigger surface
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Device connection routes
//!
//! The OAuth callback accepts both OAuth 2 (`code`) and OAuth 1.0a
//! (`oauth_token` + `oauth_verifier`) parameters; `state` is required either way.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use healthsync_core::errors::{AppError, AppResult, ErrorCode};
use healthsync_core::models::{AuthorizationGrant, VendorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{SyncEngine, DEFAULT_ATTEMPT_LIMIT};

/// Optional subject filter
#[derive(Debug, Deserialize)]
pub struct SubjectQuery {
    /// Subject the request is made for
    pub subject_id: Option<String>,
}

/// Query parameters delivered to the OAuth callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    /// OAuth 2 authorization code
    pub code: Option<String>,
    /// State issued with the consent URL
    pub state: Option<String>,
    /// OAuth 1.0a request token
    pub oauth_token: Option<String>,
    /// OAuth 1.0a verifier
    pub oauth_verifier: Option<String>,
    /// Error reported by the vendor when the user declined
    pub error: Option<String>,
}

/// Manual sync parameters
#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    /// Days to look back
    pub days: Option<u32>,
}

/// Attempt history parameters
#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    /// Maximum attempts returned
    pub limit: Option<u32>,
}

/// Body of the sync toggle
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    /// Whether scheduled sync is enabled
    pub enabled: bool,
}

/// Consent URL handed to the client
#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    /// URL the user opens to grant access
    pub authorization_url: String,
    /// State the callback will echo
    pub state: String,
}

/// Device connection routes
pub struct DeviceRoutes;

impl DeviceRoutes {
    /// Create all device routes
    pub fn routes(engine: Arc<SyncEngine>) -> Router {
        // Vendor and connection id share one parameter name at this position
        Router::new()
            .route("/devices", get(Self::handle_list))
            .route("/devices/:key", delete(Self::handle_disconnect))
            .route("/devices/:key/authorize", get(Self::handle_authorize))
            .route("/devices/:key/callback", get(Self::handle_callback))
            .route("/devices/:key/sync", post(Self::handle_sync))
            .route("/devices/:key/sync-enabled", put(Self::handle_toggle))
            .route("/devices/:key/attempts", get(Self::handle_attempts))
            .with_state(engine)
    }

    async fn handle_list(
        State(engine): State<Arc<SyncEngine>>,
        Query(query): Query<SubjectQuery>,
    ) -> Result<Response, AppError> {
        let connections = engine.list_connections(query.subject_id.as_deref()).await?;
        Ok((StatusCode::OK, Json(connections)).into_response())
    }

    async fn handle_authorize(
        State(engine): State<Arc<SyncEngine>>,
        Path(vendor): Path<String>,
        Query(query): Query<SubjectQuery>,
    ) -> Result<Response, AppError> {
        let vendor = parse_vendor(&vendor)?;
        let subject_id = query
            .subject_id
            .ok_or_else(|| AppError::invalid_input("subject_id is required"))?;
        let request = engine.authorization_url(vendor, &subject_id).await?;
        let body = AuthorizeResponse {
            authorization_url: request.url,
            state: request.state,
        };
        Ok((StatusCode::OK, Json(body)).into_response())
    }

    async fn handle_callback(
        State(engine): State<Arc<SyncEngine>>,
        Path(vendor): Path<String>,
        Query(query): Query<CallbackQuery>,
    ) -> Result<Response, AppError> {
        let vendor = parse_vendor(&vendor)?;
        let grant = grant_from_callback(query)?;
        let connection = engine.complete_authorization(vendor, &grant).await?;
        Ok((StatusCode::CREATED, Json(connection)).into_response())
    }

    async fn handle_disconnect(
        State(engine): State<Arc<SyncEngine>>,
        Path(id): Path<String>,
    ) -> Result<Response, AppError> {
        engine.disconnect(parse_connection_id(&id)?).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_sync(
        State(engine): State<Arc<SyncEngine>>,
        Path(id): Path<String>,
        Query(query): Query<SyncQuery>,
    ) -> Result<Response, AppError> {
        let attempt = engine
            .trigger_sync(parse_connection_id(&id)?, query.days)
            .await?;
        Ok((StatusCode::OK, Json(attempt)).into_response())
    }

    async fn handle_toggle(
        State(engine): State<Arc<SyncEngine>>,
        Path(id): Path<String>,
        Json(request): Json<ToggleRequest>,
    ) -> Result<Response, AppError> {
        let connection = engine
            .toggle(parse_connection_id(&id)?, request.enabled)
            .await?;
        Ok((StatusCode::OK, Json(connection)).into_response())
    }

    async fn handle_attempts(
        State(engine): State<Arc<SyncEngine>>,
        Path(id): Path<String>,
        Query(query): Query<AttemptsQuery>,
    ) -> Result<Response, AppError> {
        let limit = query.limit.unwrap_or(DEFAULT_ATTEMPT_LIMIT).clamp(1, 500);
        let attempts = engine.attempts(parse_connection_id(&id)?, limit).await?;
        Ok((StatusCode::OK, Json(attempts)).into_response())
    }
}

fn parse_vendor(raw: &str) -> AppResult<VendorKind> {
    raw.parse().map_err(AppError::invalid_input)
}

fn parse_connection_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::invalid_input(format!("Invalid connection id: {raw}")))
}

fn grant_from_callback(query: CallbackQuery) -> AppResult<AuthorizationGrant> {
    if let Some(error) = query.error {
        return Err(AppError::new(
            ErrorCode::AuthInvalid,
            format!("Vendor authorization was declined: {error}"),
        ));
    }
    let code = query
        .code
        .or(query.oauth_token)
        .ok_or_else(|| AppError::invalid_input("Callback carries no authorization code"))?;
    Ok(AuthorizationGrant {
        code,
        verifier: query.oauth_verifier,
        state: query.state,
    })
}
