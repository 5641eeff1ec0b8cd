// ABOUTME: Wearable vendor adapters for Fitbit, Garmin, Withings, and Apple Health
// ABOUTME: Adapter contract and vendor descriptors plus the shared HTTP and OAuth plumbing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Vendor adapter implementations and the contract the engine drives them through.
//!
//! Every vendor is one variant of a closed set ([`VendorKind`]) and implements the
//! same [`VendorAdapter`] operations independently. Pull vendors produce lazy
//! streams of pages; the push vendor parses payloads delivered by a mobile relay.

pub use healthsync_core::errors;
pub use healthsync_core::models;

/// Adapter contract shared by all vendors
pub mod adapter;
/// Client credentials for each vendor
pub mod config;
/// Static vendor descriptors (endpoints, quotas, granularity)
pub mod descriptor;
/// Shared HTTP client and response classification
pub mod http_client;
/// OAuth 1.0a request signing
pub mod oauth1;
/// OAuth 2 authorization code helpers
pub mod oauth2;
/// Adapter registry keyed by vendor kind
pub mod registry;
/// HMAC signatures on relay-pushed payloads
pub mod signature;

/// Apple Health relay adapter (push)
pub mod apple_health;
/// Fitbit Web API adapter (pull)
pub mod fitbit;
/// Garmin Health API adapter (pull, also accepts pushed summaries)
pub mod garmin;
/// Withings Public API adapter (pull)
pub mod withings;

mod json;

pub use adapter::{ParsedBatch, RawPointStream, VendorAdapter};
pub use config::VendorClientConfig;
pub use descriptor::{descriptor, IngestionMode, VendorCapabilities, VendorDescriptor};
pub use healthsync_core::models::VendorKind;
pub use registry::{create_adapter, AdapterRegistry};
pub use signature::{RelaySignatureValidator, SignatureValidation};
