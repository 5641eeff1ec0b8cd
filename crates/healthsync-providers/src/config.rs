// ABOUTME: Per-vendor OAuth client configuration consumed by adapter constructors
// ABOUTME: Holds client id, secret, redirect URI, and an optional API base URL override
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;

/// OAuth client registration for one vendor
#[derive(Clone, Default)]
pub struct VendorClientConfig {
    /// OAuth client id (consumer key for OAuth 1.0a)
    pub client_id: String,
    /// OAuth client secret (consumer secret for OAuth 1.0a)
    pub client_secret: String,
    /// Callback registered with the vendor
    pub redirect_uri: String,
    /// Replaces the descriptor's API base URL, for sandboxes
    pub api_base_url: Option<String>,
}

impl VendorClientConfig {
    /// Whether the minimum fields for an OAuth flow are present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

impl fmt::Debug for VendorClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}
