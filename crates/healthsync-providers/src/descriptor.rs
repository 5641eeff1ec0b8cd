// ABOUTME: Static vendor descriptors with OAuth endpoints, quotas, capabilities, and granularity
// ABOUTME: Lets the engine size rate limiters and fingerprint buckets without touching adapters
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Vendor descriptors
//!
//! Each vendor is described once, statically. The rate controller reads the
//! published quota, the dedup index reads the reporting granularity, and the
//! adapters read the OAuth endpoints and API base URL.

use healthsync_core::models::{Granularity, MetricKind, VendorKind};
use std::time::Duration;

/// OAuth endpoint configuration
#[derive(Debug, Clone, Copy)]
pub struct OAuthEndpoints {
    /// User consent endpoint
    pub auth_url: &'static str,
    /// Token exchange endpoint (access token endpoint for OAuth 1.0a)
    pub token_url: &'static str,
    /// Optional token revocation endpoint
    pub revoke_url: Option<&'static str>,
    /// OAuth 1.0a request token endpoint
    pub request_token_url: Option<&'static str>,
}

bitflags::bitflags! {
    /// Operations an adapter implements
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct VendorCapabilities: u8 {
        /// Exchanges authorization grants for credentials
        const AUTHORIZE = 0b0000_0001;
        /// Pulls data for a time range
        const FETCH = 0b0000_0010;
        /// Parses pushed payloads
        const PARSE = 0b0000_0100;
        /// Refreshes expired access tokens
        const REFRESH = 0b0000_1000;
        /// Revokes credentials on disconnect
        const REVOKE = 0b0001_0000;
    }
}

impl VendorCapabilities {
    /// Whether range fetches are supported
    #[must_use]
    pub const fn supports_fetch(&self) -> bool {
        self.contains(Self::FETCH)
    }

    /// Whether pushed payloads are supported
    #[must_use]
    pub const fn supports_parse(&self) -> bool {
        self.contains(Self::PARSE)
    }

    /// Whether token refresh is supported
    #[must_use]
    pub const fn supports_refresh(&self) -> bool {
        self.contains(Self::REFRESH)
    }
}

/// OAuth protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// OAuth 1.0a with HMAC-SHA1 request signing
    OAuth1,
    /// OAuth 2 authorization code grant
    OAuth2,
}

/// How data reaches the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionMode {
    /// The scheduler polls the vendor
    Pull,
    /// A relay pushes payloads to the gateway
    Push,
}

/// Published request quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window
    pub requests: u32,
    /// Window length
    pub window: Duration,
}

impl Quota {
    /// Quota of `requests` per `window_secs`
    #[must_use]
    pub const fn per_secs(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Static description of one vendor
#[derive(Debug)]
pub struct VendorDescriptor {
    /// Vendor kind
    pub kind: VendorKind,
    /// Human-readable name
    pub display_name: &'static str,
    /// OAuth flavour
    pub auth_scheme: AuthScheme,
    /// Pull or push
    pub ingestion_mode: IngestionMode,
    /// Implemented operations
    pub capabilities: VendorCapabilities,
    /// OAuth endpoints
    pub oauth: OAuthEndpoints,
    /// Data API base URL
    pub api_base_url: &'static str,
    /// Scopes requested at consent time
    pub default_scopes: &'static [&'static str],
    /// Published quota, `None` when the vendor is not called by the engine
    pub quota: Option<Quota>,
    /// Per-metric reporting resolution; unlisted metrics are reported to the second
    granularity: &'static [(MetricKind, Granularity)],
}

impl VendorDescriptor {
    /// Resolution at which this vendor reports `metric`
    #[must_use]
    pub fn granularity(&self, metric: MetricKind) -> Granularity {
        self.granularity
            .iter()
            .find(|(kind, _)| *kind == metric)
            .map_or(Granularity::Second, |(_, granularity)| *granularity)
    }
}

const DAILY_SUMMARY_METRICS: &[(MetricKind, Granularity)] = &[
    (MetricKind::Steps, Granularity::Day),
    (MetricKind::Distance, Granularity::Day),
    (MetricKind::Calories, Granularity::Day),
    (MetricKind::HeartRate, Granularity::Day),
    (MetricKind::SleepHours, Granularity::Day),
    (MetricKind::ExerciseMinutes, Granularity::Day),
];

static FITBIT: VendorDescriptor = VendorDescriptor {
    kind: VendorKind::Fitbit,
    display_name: "Fitbit",
    auth_scheme: AuthScheme::OAuth2,
    ingestion_mode: IngestionMode::Pull,
    capabilities: VendorCapabilities::AUTHORIZE
        .union(VendorCapabilities::FETCH)
        .union(VendorCapabilities::REFRESH)
        .union(VendorCapabilities::REVOKE),
    oauth: OAuthEndpoints {
        auth_url: "https://www.fitbit.com/oauth2/authorize",
        token_url: "https://api.fitbit.com/oauth2/token",
        revoke_url: Some("https://api.fitbit.com/oauth2/revoke"),
        request_token_url: None,
    },
    api_base_url: "https://api.fitbit.com",
    default_scopes: &["activity", "heartrate", "sleep", "weight"],
    quota: Some(Quota::per_secs(150, 3600)),
    granularity: DAILY_SUMMARY_METRICS,
};

static GARMIN: VendorDescriptor = VendorDescriptor {
    kind: VendorKind::Garmin,
    display_name: "Garmin Connect",
    auth_scheme: AuthScheme::OAuth1,
    ingestion_mode: IngestionMode::Pull,
    capabilities: VendorCapabilities::AUTHORIZE
        .union(VendorCapabilities::FETCH)
        .union(VendorCapabilities::PARSE)
        .union(VendorCapabilities::REVOKE),
    oauth: OAuthEndpoints {
        auth_url: "https://connect.garmin.com/oauthConfirm",
        token_url: "https://connectapi.garmin.com/oauth-service/oauth/access_token",
        revoke_url: Some("https://apis.garmin.com/wellness-api/rest/user/registration"),
        request_token_url: Some("https://connectapi.garmin.com/oauth-service/oauth/request_token"),
    },
    api_base_url: "https://apis.garmin.com/wellness-api/rest",
    default_scopes: &[],
    quota: Some(Quota::per_secs(600, 3600)),
    granularity: DAILY_SUMMARY_METRICS,
};

static WITHINGS: VendorDescriptor = VendorDescriptor {
    kind: VendorKind::Withings,
    display_name: "Withings",
    auth_scheme: AuthScheme::OAuth2,
    ingestion_mode: IngestionMode::Pull,
    capabilities: VendorCapabilities::AUTHORIZE
        .union(VendorCapabilities::FETCH)
        .union(VendorCapabilities::REFRESH),
    oauth: OAuthEndpoints {
        auth_url: "https://account.withings.com/oauth2_user/authorize2",
        token_url: "https://wbsapi.withings.net/v2/oauth2",
        revoke_url: None,
        request_token_url: None,
    },
    api_base_url: "https://wbsapi.withings.net",
    default_scopes: &["user.metrics", "user.activity", "user.sleepevents"],
    quota: Some(Quota::per_secs(120, 60)),
    granularity: &[
        (MetricKind::Steps, Granularity::Day),
        (MetricKind::Distance, Granularity::Day),
        (MetricKind::Calories, Granularity::Day),
        (MetricKind::SleepHours, Granularity::Day),
        (MetricKind::ExerciseMinutes, Granularity::Day),
    ],
};

static APPLE_HEALTH: VendorDescriptor = VendorDescriptor {
    kind: VendorKind::AppleHealth,
    display_name: "Apple Health",
    auth_scheme: AuthScheme::OAuth2,
    ingestion_mode: IngestionMode::Push,
    capabilities: VendorCapabilities::AUTHORIZE
        .union(VendorCapabilities::PARSE)
        .union(VendorCapabilities::REFRESH)
        .union(VendorCapabilities::REVOKE),
    oauth: OAuthEndpoints {
        auth_url: "https://appleid.apple.com/auth/authorize",
        token_url: "https://appleid.apple.com/auth/token",
        revoke_url: Some("https://appleid.apple.com/auth/revoke"),
        request_token_url: None,
    },
    api_base_url: "https://appleid.apple.com",
    default_scopes: &["health.read"],
    quota: None,
    granularity: &[(MetricKind::HeartRate, Granularity::Minute)],
};

/// Descriptor for a vendor
#[must_use]
pub const fn descriptor(kind: VendorKind) -> &'static VendorDescriptor {
    match kind {
        VendorKind::Fitbit => &FITBIT,
        VendorKind::Garmin => &GARMIN,
        VendorKind::Withings => &WITHINGS,
        VendorKind::AppleHealth => &APPLE_HEALTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_vendor_has_no_quota() {
        let apple = descriptor(VendorKind::AppleHealth);
        assert_eq!(apple.ingestion_mode, IngestionMode::Push);
        assert!(apple.quota.is_none());
        assert!(!apple.capabilities.supports_fetch());
    }

    #[test]
    fn test_granularity_lookup_defaults_to_second() {
        let withings = descriptor(VendorKind::Withings);
        assert_eq!(withings.granularity(MetricKind::Steps), Granularity::Day);
        assert_eq!(withings.granularity(MetricKind::Weight), Granularity::Second);
    }
}
