// ABOUTME: Canonical health record log keyed by dedup fingerprint and value digest
// ABOUTME: Replays are ignored on conflict while superseding values append a new row
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::Utc;
use healthsync_core::errors::AppResult;
use healthsync_core::models::{CanonicalHealthRecord, Fingerprint, MetricKind, MetricValue};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_millis, parse_column, parse_uuid, to_millis, Database};
use crate::store::HealthRecordStore;

impl Database {
    pub(super) async fn migrate_records(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS health_records (
                fingerprint TEXT NOT NULL,
                value_digest TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                metric TEXT NOT NULL,
                value_json TEXT NOT NULL,
                unit TEXT NOT NULL,
                measured_at INTEGER NOT NULL,
                source_connection_id TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                PRIMARY KEY (fingerprint, value_digest)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_health_records_subject_metric ON health_records(subject_id, metric, measured_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Count stored records, optionally for one subject
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn count_records(&self, subject_id: Option<&str>) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM health_records WHERE $1 IS NULL OR subject_id = $1",
        )
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Every stored revision of one subject and metric in measurement order
    ///
    /// Revisions of the same bucket follow each other in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupt
    pub async fn list_records(
        &self,
        subject_id: &str,
        metric: MetricKind,
    ) -> AppResult<Vec<CanonicalHealthRecord>> {
        let rows = sqlx::query(
            r"
            SELECT fingerprint, subject_id, metric, value_json, unit, measured_at,
                   source_connection_id
            FROM health_records
            WHERE subject_id = $1 AND metric = $2
            ORDER BY measured_at ASC, rowid ASC
            ",
        )
        .bind(subject_id)
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Current value of each bucket: the newest revision per fingerprint
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupt
    pub async fn latest_records(
        &self,
        subject_id: &str,
        metric: MetricKind,
    ) -> AppResult<Vec<CanonicalHealthRecord>> {
        let rows = sqlx::query(
            r"
            SELECT fingerprint, subject_id, metric, value_json, unit, measured_at,
                   source_connection_id
            FROM health_records AS current
            WHERE subject_id = $1 AND metric = $2
              AND rowid = (
                  SELECT MAX(rowid) FROM health_records
                  WHERE fingerprint = current.fingerprint
              )
            ORDER BY measured_at ASC
            ",
        )
        .bind(subject_id)
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl HealthRecordStore for Database {
    async fn insert_if_absent(&self, record: &CanonicalHealthRecord) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO health_records (
                fingerprint, value_digest, subject_id, metric, value_json, unit,
                measured_at, source_connection_id, inserted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (fingerprint, value_digest) DO NOTHING
            ",
        )
        .bind(record.fingerprint.as_str())
        .bind(record.value.digest())
        .bind(&record.subject_id)
        .bind(record.metric.as_str())
        .bind(serde_json::to_string(&record.value)?)
        .bind(record.unit.as_str())
        .bind(to_millis(record.measured_at))
        .bind(record.source_connection_id.to_string())
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_record(row: &SqliteRow) -> AppResult<CanonicalHealthRecord> {
    let metric: MetricKind = parse_column(&row.try_get::<String, _>("metric")?)?;
    let value: MetricValue = serde_json::from_str(&row.try_get::<String, _>("value_json")?)?;

    Ok(CanonicalHealthRecord {
        subject_id: row.try_get("subject_id")?,
        metric,
        value,
        unit: metric.canonical_unit(),
        measured_at: from_millis(row.try_get("measured_at")?)?,
        source_connection_id: parse_uuid(&row.try_get::<String, _>("source_connection_id")?)?,
        fingerprint: Fingerprint::from_hex(row.try_get("fingerprint")?),
    })
}
