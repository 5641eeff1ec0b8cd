// ABOUTME: Configuration management module for the sync engine
// ABOUTME: Re-exports the environment-driven configuration types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module for HealthSync
//!
//! All settings come from the environment; the server binary overrides a few
//! of them from command-line flags.

/// Environment and server configuration
pub mod environment;

pub use environment::{
    vendor_env_prefix, BackoffConfig, DatabaseConfig, GatewayConfig, HttpClientConfig,
    RetentionConfig, SchedulerConfig, SecretsConfig, ServerConfig, SyncEngineConfig,
};
