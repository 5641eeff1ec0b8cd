// ABOUTME: Append-only sync attempt log with guarded state transitions and retention pruning
// ABOUTME: Terminal attempts are never updated; open attempts of a reclaimed lease are failed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use healthsync_core::errors::AppResult;
use healthsync_core::models::{FailureReason, SyncAttempt, TimeRange};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, opt_from_millis, parse_column, parse_uuid, to_millis, Database};

const ATTEMPT_COLUMNS: &str = r"
    id, connection_id, vendor, range_start, range_end, sync_trigger, started_at,
    completed_at, outcome, records_synced, duplicates_skipped, invalid_skipped,
    failure_reason, error_detail
";

impl Database {
    pub(super) async fn migrate_attempts(&self) -> AppResult<()> {
        // No foreign key: attempts outlive a disconnected connection until pruned
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_attempts (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                vendor TEXT NOT NULL,
                range_start INTEGER NOT NULL,
                range_end INTEGER NOT NULL,
                sync_trigger TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                outcome TEXT NOT NULL
                    CHECK (outcome IN ('pending', 'running', 'completed', 'failed')),
                records_synced INTEGER NOT NULL DEFAULT 0,
                duplicates_skipped INTEGER NOT NULL DEFAULT 0,
                invalid_skipped INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                error_detail TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_attempts_connection ON sync_attempts(connection_id, started_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_attempts_completed ON sync_attempts(outcome, completed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append a new attempt
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn insert_attempt(&self, attempt: &SyncAttempt) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO sync_attempts (
                id, connection_id, vendor, range_start, range_end, sync_trigger, started_at,
                completed_at, outcome, records_synced, duplicates_skipped, invalid_skipped,
                failure_reason, error_detail
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(attempt.id.to_string())
        .bind(attempt.connection_id.to_string())
        .bind(attempt.vendor.as_str())
        .bind(to_millis(attempt.range.start))
        .bind(to_millis(attempt.range.end))
        .bind(attempt.trigger.as_str())
        .bind(to_millis(attempt.started_at))
        .bind(attempt.completed_at.map(to_millis))
        .bind(attempt.outcome.as_str())
        .bind(i64::from(attempt.records_synced))
        .bind(i64::from(attempt.duplicates_skipped))
        .bind(i64::from(attempt.invalid_skipped))
        .bind(attempt.failure_reason.map(FailureReason::as_str))
        .bind(&attempt.error_detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the in-memory state of an attempt
    ///
    /// Only rows still `pending` or `running` are written, so a terminal row
    /// can never change. Returns `false` when the stored row was already terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn update_attempt(&self, attempt: &SyncAttempt) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE sync_attempts
            SET outcome = $1, completed_at = $2, records_synced = $3, duplicates_skipped = $4,
                invalid_skipped = $5, failure_reason = $6, error_detail = $7
            WHERE id = $8 AND outcome IN ('pending', 'running')
            ",
        )
        .bind(attempt.outcome.as_str())
        .bind(attempt.completed_at.map(to_millis))
        .bind(i64::from(attempt.records_synced))
        .bind(i64::from(attempt.duplicates_skipped))
        .bind(i64::from(attempt.invalid_skipped))
        .bind(attempt.failure_reason.map(FailureReason::as_str))
        .bind(&attempt.error_detail)
        .bind(attempt.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail every open attempt of a connection
    ///
    /// Called by a new lease holder: anything still open belongs to a holder
    /// whose lease expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn fail_open_attempts(
        &self,
        connection_id: Uuid,
        reason: FailureReason,
        detail: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r"
            UPDATE sync_attempts
            SET outcome = 'failed', completed_at = $1, failure_reason = $2, error_detail = $3
            WHERE connection_id = $4 AND outcome IN ('pending', 'running')
            ",
        )
        .bind(to_millis(now))
        .bind(reason.as_str())
        .bind(detail)
        .bind(connection_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Get one attempt
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_attempt(&self, id: Uuid) -> AppResult<Option<SyncAttempt>> {
        let row = sqlx::query(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM sync_attempts WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    /// Most recent attempts of a connection, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_attempts(
        &self,
        connection_id: Uuid,
        limit: u32,
    ) -> AppResult<Vec<SyncAttempt>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ATTEMPT_COLUMNS} FROM sync_attempts
            WHERE connection_id = $1
            ORDER BY started_at DESC, rowid DESC
            LIMIT $2
            "
        ))
        .bind(connection_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }

    /// Delete terminal attempts that completed before `cutoff`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn prune_attempts(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM sync_attempts
            WHERE outcome IN ('completed', 'failed') AND completed_at < $1
            ",
        )
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn count(row: &SqliteRow, column: &str) -> AppResult<u32> {
    let value: i64 = row.try_get(column)?;
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

fn row_to_attempt(row: &SqliteRow) -> AppResult<SyncAttempt> {
    let failure_reason: Option<String> = row.try_get("failure_reason")?;

    Ok(SyncAttempt {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        connection_id: parse_uuid(&row.try_get::<String, _>("connection_id")?)?,
        vendor: parse_column(&row.try_get::<String, _>("vendor")?)?,
        range: TimeRange::new(
            from_millis(row.try_get("range_start")?)?,
            from_millis(row.try_get("range_end")?)?,
        ),
        trigger: parse_column(&row.try_get::<String, _>("sync_trigger")?)?,
        started_at: from_millis(row.try_get("started_at")?)?,
        completed_at: opt_from_millis(row.try_get("completed_at")?)?,
        outcome: parse_column(&row.try_get::<String, _>("outcome")?)?,
        records_synced: count(row, "records_synced")?,
        duplicates_skipped: count(row, "duplicates_skipped")?,
        invalid_skipped: count(row, "invalid_skipped")?,
        failure_reason: failure_reason.as_deref().map(parse_column).transpose()?,
        error_detail: row.try_get("error_detail")?,
    })
}
