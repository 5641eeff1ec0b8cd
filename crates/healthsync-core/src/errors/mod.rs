// ABOUTME: Unified error handling for the engine boundary with standard codes and HTTP mapping
// ABOUTME: Defines ErrorCode, AppError, and AppResult with conversions from lower layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Error handling
//!
//! Every fallible engine operation returns [`AppResult`]. Vendor-level failures are
//! described by [`ProviderError`] and converted at the engine boundary so that the
//! HTTP surface sees one consistent shape.

/// Vendor adapter error taxonomy
pub mod provider;

pub use provider::ProviderError;

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

/// Standard error codes exposed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Authorization (1000-1999)
    /// Vendor authorization expired or was revoked
    #[serde(rename = "AUTH_EXPIRED")]
    AuthExpired = 1002,
    /// Signature or authorization grant rejected
    #[serde(rename = "AUTH_INVALID")]
    AuthInvalid = 1001,

    // Rate limiting and flow control (2000-2999)
    /// Vendor quota exhausted
    #[serde(rename = "RATE_LIMIT_EXCEEDED")]
    RateLimitExceeded = 2000,
    /// Ingestion queue is full; caller must retry later
    #[serde(rename = "BACKPRESSURE")]
    Backpressure = 2002,

    // Validation (3000-3999)
    /// Request input is invalid
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput = 3000,
    /// Payload could not be parsed at all
    #[serde(rename = "MALFORMED_PAYLOAD")]
    MalformedPayload = 3002,

    // Resources (4000-4999)
    /// Resource not found
    #[serde(rename = "RESOURCE_NOT_FOUND")]
    ResourceNotFound = 4000,
    /// Resource is held by another operation
    #[serde(rename = "RESOURCE_LOCKED")]
    ResourceLocked = 4002,

    // External services (5000-5999)
    /// Vendor API returned an error
    #[serde(rename = "EXTERNAL_SERVICE_ERROR")]
    ExternalServiceError = 5000,
    /// Vendor API unreachable or timed out
    #[serde(rename = "EXTERNAL_SERVICE_UNAVAILABLE")]
    ExternalServiceUnavailable = 5001,

    // Internal (9000-9999)
    /// Operation was cancelled
    #[serde(rename = "CANCELLED")]
    Cancelled = 9003,
    /// Configuration is invalid
    #[serde(rename = "CONFIG_ERROR")]
    ConfigError = 9001,
    /// Database failure
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9002,
    /// Anything else
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
}

impl ErrorCode {
    /// HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::AuthInvalid => 401,
            Self::AuthExpired => 403,
            Self::ResourceNotFound => 404,
            Self::ResourceLocked => 409,
            Self::MalformedPayload => 422,
            Self::RateLimitExceeded | Self::Backpressure => 429,
            Self::Cancelled => 499,
            Self::ExternalServiceError => 502,
            Self::ExternalServiceUnavailable => 503,
            Self::ConfigError | Self::DatabaseError | Self::InternalError => 500,
        }
    }

    /// Short human description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthExpired => "Vendor authorization expired",
            Self::AuthInvalid => "Authorization rejected",
            Self::RateLimitExceeded => "Rate limit exceeded",
            Self::Backpressure => "Ingestion queue full, retry later",
            Self::InvalidInput => "Invalid input",
            Self::MalformedPayload => "Malformed payload",
            Self::ResourceNotFound => "Resource not found",
            Self::ResourceLocked => "Resource is busy",
            Self::ExternalServiceError => "Vendor API error",
            Self::ExternalServiceUnavailable => "Vendor API unavailable",
            Self::Cancelled => "Operation cancelled",
            Self::ConfigError => "Configuration error",
            Self::DatabaseError => "Database error",
            Self::InternalError => "Internal error",
        }
    }
}

/// Error returned by engine operations
#[derive(Debug, thiserror::Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Seconds the caller should wait before retrying, when known
    pub retry_after_secs: Option<u64>,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
            source: None,
        }
    }

    /// Attach a retry hint
    #[must_use]
    pub const fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Attach a source error
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Invalid caller input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Resource held by another operation
    pub fn resource_locked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceLocked, message)
    }

    /// Ingestion queue is full
    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Backpressure, message)
    }

    /// Database failure
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration problem
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Vendor API failure
    pub fn external_service(vendor: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{vendor}: {}", message.into()),
        )
    }

    /// Internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result alias for engine operations
pub type AppResult<T> = Result<T, AppError>;

impl From<ProviderError> for AppError {
    fn from(error: ProviderError) -> Self {
        let code = match &error {
            ProviderError::AuthExpired { .. } => ErrorCode::AuthExpired,
            ProviderError::AuthorizationFailed { .. } => ErrorCode::AuthInvalid,
            ProviderError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            ProviderError::TransientNetwork { .. } => ErrorCode::ExternalServiceUnavailable,
            ProviderError::MalformedPayload { .. } => ErrorCode::MalformedPayload,
            ProviderError::UnsupportedFeature { .. } => ErrorCode::InvalidInput,
            ProviderError::Configuration { .. } => ErrorCode::ConfigError,
            ProviderError::Api { .. } => ErrorCode::ExternalServiceError,
        };
        let retry_after_secs = error.retry_after_secs();
        Self {
            code,
            message: error.to_string(),
            retry_after_secs,
            source: Some(Box::new(error)),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorCode::InternalError, format!("JSON error: {error}")).with_source(error)
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(error.to_string()).with_source(error)
    }
}

#[cfg(feature = "http-response")]
mod http_response {
    use super::AppError;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use http::header::RETRY_AFTER;
    use http::{HeaderValue, StatusCode};

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = Json(serde_json::json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                    "retry_after_secs": self.retry_after_secs,
                }
            }));
            let mut response = (status, body).into_response();
            if let Some(secs) = self.retry_after_secs {
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
            }
            response
        }
    }
}
