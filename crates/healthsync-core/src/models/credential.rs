// ABOUTME: OAuth credential and authorization grant types with redacted debug output
// ABOUTME: Covers OAuth 2 bearer tokens and OAuth 1.0a token/secret pairs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decrypted vendor credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    /// Bearer token (OAuth 2) or access token (OAuth 1.0a)
    pub access_token: String,
    /// Refresh token, absent for OAuth 1.0a vendors
    pub refresh_token: Option<String>,
    /// OAuth 1.0a token secret
    pub token_secret: Option<String>,
    /// Expiry of `access_token`, absent when the vendor issues non-expiring tokens
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes
    pub scope: Option<String>,
    /// Vendor-side account identifier
    pub external_user_id: Option<String>,
}

impl OAuthCredential {
    /// Whether the access token is already expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the access token expires within `margin` of `now`
    #[must_use]
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now + margin)
    }
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_secret", &self.token_secret.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("external_user_id", &self.external_user_id)
            .finish()
    }
}

/// Values delivered to the OAuth callback
#[derive(Clone, Default, Deserialize)]
pub struct AuthorizationGrant {
    /// OAuth 2 authorization code, or the OAuth 1.0a request token
    pub code: String,
    /// OAuth 1.0a verifier
    pub verifier: Option<String>,
    /// Opaque state echoed by the vendor
    pub state: Option<String>,
}

impl AuthorizationGrant {
    /// OAuth 2 grant from an authorization code
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("code", &"[REDACTED]")
            .field("verifier", &self.verifier.as_ref().map(|_| "[REDACTED]"))
            .field("state", &self.state)
            .finish()
    }
}

/// Where to send the user to grant access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    /// Vendor consent URL
    pub url: String,
    /// State value the callback must echo
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_tokens() {
        let credential = OAuthCredential {
            access_token: "secret-access".to_owned(),
            refresh_token: Some("secret-refresh".to_owned()),
            token_secret: None,
            expires_at: None,
            scope: Some("activity".to_owned()),
            external_user_id: None,
        };
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
