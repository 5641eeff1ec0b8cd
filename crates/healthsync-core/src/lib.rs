// ABOUTME: Core types and constants for the HealthSync device synchronization engine
// ABOUTME: Foundation crate with error handling, domain models, and default constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # HealthSync Core
//!
//! Foundation crate providing the shared vocabulary of the device synchronization
//! engine. Nothing in here performs I/O; the vendor adapters and the engine crate
//! both build on these types.
//!
//! ## Modules
//!
//! - **errors**: `AppError`/`ErrorCode` for the engine boundary, `ProviderError` for vendor calls
//! - **models**: device connections, sync attempts, raw points, canonical records, credentials
//! - **constants**: engine defaults and environment variable names

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Engine defaults and configuration key names
pub mod constants;

/// Domain models shared by the engine and the vendor adapters
pub mod models;
