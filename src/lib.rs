// ABOUTME: Main library entry point for the HealthSync device synchronization engine
// ABOUTME: Pulls wearable data from vendor APIs and relays into one deduplicated canonical store
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # HealthSync
//!
//! Keeps a family's connected health devices in sync with a canonical record
//! store. Pull vendors (Fitbit, Garmin, Withings) are polled by a scheduler;
//! push vendors (Apple Health through a mobile relay) submit payloads to a
//! bounded streaming gateway. Both paths share one map, dedup, and store
//! pipeline, so a measurement is stored at most once however it arrives.
//!
//! ## Architecture
//!
//! - **Engine**: [`engine::SyncEngine`], the trigger surface
//! - **Scheduler / Executor**: due-connection selection, leases, the attempt
//!   state machine, retry backoff
//! - **Credentials**: encrypted token storage with single-flight refresh
//! - **Mapper / Dedup**: vendor fields to canonical records, fingerprint index
//! - **Gateway**: bounded push queue answering backpressure when full
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use healthsync::config::SyncEngineConfig;
//! use healthsync::engine::SyncEngine;
//! use healthsync_core::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let engine = Arc::new(SyncEngine::from_config(SyncEngineConfig::from_env()).await?);
//!     engine.start().await;
//!     for connection in engine.list_connections(None).await? {
//!         println!("{} {} {:?}", connection.id, connection.vendor, connection.status);
//!     }
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by the server binary and integration tests (tests/).

/// OAuth state issued with consent URLs
pub mod authorization;
/// Cooperative cancellation tokens
pub mod cancellation;
/// Environment-driven configuration
pub mod config;
/// Credential store with single-flight refresh
pub mod credentials;
/// Credential encryption at rest
pub mod crypto;
/// SQLite persistence for connections, attempts, and records
pub mod database;
/// Fingerprint dedup index
pub mod dedup;
/// Engine facade and trigger surface
pub mod engine;
/// Sync attempt executor and state machine
pub mod executor;
/// Streaming ingestion gateway
pub mod gateway;
/// Structured logging
pub mod logging;
/// Vendor sample to canonical record mapping
pub mod mapper;
/// Shared map, dedup, and store path
pub mod pipeline;
/// Per-vendor rate limiting and retry backoff
pub mod rate_limiting;
/// Sync attempt retention
pub mod retention;
/// HTTP routes
pub mod routes;
/// Periodic sync scheduler
pub mod scheduler;
/// Canonical store contract
pub mod store;

pub use healthsync_core::{constants, errors, models};
