// ABOUTME: SQLite persistence for device connections, sync attempts, and canonical health records
// ABOUTME: Owns the connection pool, idempotent migrations, and the credential cipher
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Database Management
//!
//! One SQLite database holds the three engine tables. Timestamps are stored as
//! unix milliseconds so lease comparisons are plain integer comparisons inside
//! the guarded `UPDATE` statements.

mod attempts;
mod connections;
mod records;

pub use connections::{ConnectionRelease, NewConnection};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use healthsync_core::errors::{AppError, AppResult};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::TokenCipher;

/// Database manager for engine state
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    cipher: Arc<TokenCipher>,
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated
    pub async fn new(database_url: &str, cipher: TokenCipher) -> AppResult<Self> {
        let is_memory = database_url.contains(":memory:");

        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if is_memory || database_url.contains('?') {
            database_url.to_owned()
        } else {
            Self::ensure_parent_dir(database_url).await?;
            format!("{database_url}?mode=rwc")
        };

        // Every pooled connection to `:memory:` would see its own empty database,
        // so the in-memory pool holds exactly one connection for its whole life
        let options = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = options.connect(&connection_options).await?;

        let db = Self {
            pool,
            cipher: Arc::new(cipher),
        };
        db.migrate().await?;

        info!(database.memory = is_memory, "Database ready");
        Ok(db)
    }

    async fn ensure_parent_dir(database_url: &str) -> AppResult<()> {
        let path = database_url
            .trim_start_matches("sqlite:")
            .trim_start_matches("//");
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::database(format!(
                        "Cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any table or index cannot be created
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_connections().await?;
        self.migrate_attempts().await?;
        self.migrate_records().await?;
        debug!("Database migrations applied");
        Ok(())
    }
}

pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::database(format!("Timestamp out of range: {millis}")))
}

pub(crate) fn opt_from_millis(millis: Option<i64>) -> AppResult<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}

pub(crate) fn parse_uuid(value: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::database(format!("Invalid UUID {value}: {e}")))
}

pub(crate) fn parse_column<T>(value: &str) -> AppResult<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(AppError::database)
}
