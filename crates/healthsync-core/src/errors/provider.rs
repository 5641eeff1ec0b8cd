// ABOUTME: Error taxonomy for vendor adapter calls with retry classification
// ABOUTME: Separates expired authorization and rate limiting from transient and payload faults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Vendor adapter errors.
//!
//! The executor branches on these variants: `AuthExpired` triggers one credential
//! refresh, `RateLimited` and `TransientNetwork` reschedule with backoff, and a
//! `MalformedPayload` for a whole batch fails the attempt.

use std::time::Duration;

/// Errors produced by vendor adapters
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Access credential is expired or was revoked by the vendor
    #[error("{vendor} authorization expired: {message}")]
    AuthExpired {
        /// Vendor name
        vendor: String,
        /// Vendor supplied detail
        message: String,
    },

    /// Authorization code exchange or refresh was rejected outright
    #[error("{vendor} authorization failed: {message}")]
    AuthorizationFailed {
        /// Vendor name
        vendor: String,
        /// Vendor supplied detail
        message: String,
    },

    /// Vendor quota exhausted
    #[error("{vendor} rate limit exceeded")]
    RateLimited {
        /// Vendor name
        vendor: String,
        /// Seconds until the vendor accepts calls again, when advertised
        retry_after_secs: Option<u64>,
    },

    /// Connection failure, timeout, or 5xx from the vendor
    #[error("{vendor} transient network error: {message}")]
    TransientNetwork {
        /// Vendor name
        vendor: String,
        /// Error detail
        message: String,
    },

    /// Payload failed shape validation and nothing could be recovered from it
    #[error("{vendor} malformed payload: {message}")]
    MalformedPayload {
        /// Vendor name
        vendor: String,
        /// Validation detail
        message: String,
    },

    /// Operation is not offered by this adapter
    #[error("{vendor} does not support {feature}")]
    UnsupportedFeature {
        /// Vendor name
        vendor: String,
        /// Operation name
        feature: &'static str,
    },

    /// Adapter is missing client configuration
    #[error("{vendor} configuration error: {message}")]
    Configuration {
        /// Vendor name
        vendor: String,
        /// Detail
        message: String,
    },

    /// Non-retryable vendor API failure
    #[error("{vendor} API error ({status}): {message}")]
    Api {
        /// Vendor name
        vendor: String,
        /// HTTP or vendor status code
        status: u16,
        /// Response detail
        message: String,
    },
}

impl ProviderError {
    /// Whether the failure is expected to clear on its own after a delay
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Whether the failure is an expired or revoked credential
    #[must_use]
    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    /// Vendor advertised retry delay in seconds
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Vendor advertised retry delay
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs().map(Duration::from_secs)
    }

    /// Name of the vendor that produced the error
    #[must_use]
    pub fn vendor(&self) -> &str {
        match self {
            Self::AuthExpired { vendor, .. }
            | Self::AuthorizationFailed { vendor, .. }
            | Self::RateLimited { vendor, .. }
            | Self::TransientNetwork { vendor, .. }
            | Self::MalformedPayload { vendor, .. }
            | Self::UnsupportedFeature { vendor, .. }
            | Self::Configuration { vendor, .. }
            | Self::Api { vendor, .. } => vendor,
        }
    }

    /// Convenience constructor for transient failures
    pub fn transient(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for malformed payloads
    pub fn malformed(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for expired authorization
    pub fn auth_expired(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthExpired {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    /// Classify a transport error from `reqwest`
    #[cfg(feature = "provider-errors")]
    #[must_use]
    pub fn from_transport(vendor: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            return Self::transient(vendor, error.to_string());
        }
        if error.is_decode() || error.is_body() {
            return Self::malformed(vendor, error.to_string());
        }
        Self::transient(vendor, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::transient("garmin", "reset").is_retryable());
        assert!(!ProviderError::auth_expired("garmin", "revoked").is_retryable());
        assert!(!ProviderError::malformed("garmin", "bad json").is_retryable());
    }
}
