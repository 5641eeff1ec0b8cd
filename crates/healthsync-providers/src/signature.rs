// ABOUTME: HMAC-SHA256 signatures on payloads pushed by the mobile relay
// ABOUTME: Validates timestamped signature headers with constant-time comparison
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Relay payload signatures.
//!
//! The relay sends `x-healthsync-signature: t=<unix seconds>,v1=<hex>` where the
//! hex value is HMAC-SHA256 over `"<t>." + body`. Signatures older than the
//! tolerance window are rejected to limit replays.

use chrono::Utc;
use ring::hmac;
use subtle::ConstantTimeEq;

/// Header carrying the relay signature
pub const SIGNATURE_HEADER: &str = "x-healthsync-signature";

/// Default accepted clock skew, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Signature validation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureValidation {
    /// Signature is valid
    Valid,
    /// Signature does not match the body
    Invalid,
    /// Signature timestamp is outside the tolerance window
    Expired,
    /// Signature header is missing
    Missing,
}

/// Validates relay signatures against a shared secret
pub struct RelaySignatureValidator {
    key: hmac::Key,
    tolerance_secs: i64,
}

impl RelaySignatureValidator {
    /// Validator for `secret` with the default tolerance
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Override the accepted clock skew
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    fn digest(&self, timestamp: i64, body: &[u8]) -> String {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(timestamp.to_string().as_bytes());
        ctx.update(b".");
        ctx.update(body);
        hex::encode(ctx.sign().as_ref())
    }

    /// Header value the relay would send for `body` at `timestamp`
    #[must_use]
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        format!("t={timestamp},v1={}", self.digest(timestamp, body))
    }

    /// Validate a signature header against the raw body
    #[must_use]
    pub fn validate(&self, header: Option<&str>, body: &[u8]) -> SignatureValidation {
        let Some(header) = header else {
            return SignatureValidation::Missing;
        };

        let mut timestamp = None;
        let mut signature = None;
        for part in header.split(',') {
            if let Some(value) = part.trim().strip_prefix("t=") {
                timestamp = value.parse::<i64>().ok();
            } else if let Some(value) = part.trim().strip_prefix("v1=") {
                signature = Some(value);
            }
        }
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return SignatureValidation::Invalid;
        };

        let skew = Utc::now()
            .timestamp()
            .checked_sub(timestamp)
            .and_then(i64::checked_abs);
        if skew.map_or(true, |skew| skew > self.tolerance_secs) {
            return SignatureValidation::Expired;
        }

        let expected = self.digest(timestamp, body);
        if signature.as_bytes().ct_eq(expected.as_bytes()).into() {
            SignatureValidation::Valid
        } else {
            SignatureValidation::Invalid
        }
    }
}
