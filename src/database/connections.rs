// ABOUTME: Device connection table operations including lease claim and guarded release
// ABOUTME: Credentials are stored encrypted per column and decrypted only on explicit load
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use healthsync_core::errors::{AppError, AppResult};
use healthsync_core::models::{ConnectionStatus, DeviceConnection, OAuthCredential, VendorKind};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{from_millis, opt_from_millis, parse_column, parse_uuid, to_millis, Database};
use crate::crypto::credential_aad;

const CONNECTION_COLUMNS: &str = r"
    id, subject_id, vendor, external_account_id, credential_expires_at, sync_enabled,
    sync_interval_secs, last_sync_at, status, last_error, lease_owner, lease_expires_at,
    next_attempt_at, consecutive_failures, created_at, updated_at
";

/// Data needed to create or re-authorize a connection
pub struct NewConnection<'a> {
    /// Subject (family member) the device belongs to
    pub subject_id: &'a str,
    /// Vendor of the device
    pub vendor: VendorKind,
    /// Credential obtained from the vendor handshake
    pub credential: &'a OAuthCredential,
    /// Sync interval for a newly created connection
    pub sync_interval_secs: i64,
    /// Creation instant
    pub now: DateTime<Utc>,
}

/// How a lease holder leaves a connection when its attempt ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRelease {
    /// Status after release; never `syncing`
    pub status: ConnectionStatus,
    /// Error to surface on the connection, cleared when `None`
    pub last_error: Option<String>,
    /// New last-successful-sync instant, kept unchanged when `None`
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Earliest instant the scheduler may pick the connection again
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Consecutive self-healing failures so far
    pub consecutive_failures: u32,
}

struct SealedCredential {
    access_token: String,
    refresh_token: Option<String>,
    token_secret: Option<String>,
}

impl Database {
    pub(super) async fn migrate_connections(&self) -> AppResult<()> {
        // Absent external account ids are stored as '' so the UNIQUE constraint applies
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS device_connections (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                vendor TEXT NOT NULL,
                external_account_id TEXT NOT NULL DEFAULT '',
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_secret TEXT,
                scope TEXT,
                credential_expires_at INTEGER,
                sync_enabled INTEGER NOT NULL DEFAULT 1,
                sync_interval_secs INTEGER NOT NULL,
                last_sync_at INTEGER,
                status TEXT NOT NULL DEFAULT 'idle'
                    CHECK (status IN ('idle', 'syncing', 'error')),
                last_error TEXT,
                lease_owner TEXT,
                lease_expires_at INTEGER,
                next_attempt_at INTEGER,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(subject_id, vendor, external_account_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_device_connections_subject ON device_connections(subject_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_device_connections_due ON device_connections(sync_enabled, status, last_sync_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a connection, or re-authorize the existing one for the same
    /// subject, vendor, and external account
    ///
    /// Re-authorizing replaces the credential and clears any error state; sync
    /// history and the sync interval are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database operation fails
    pub async fn upsert_connection(
        &self,
        connection: &NewConnection<'_>,
    ) -> AppResult<DeviceConnection> {
        let account = connection
            .credential
            .external_user_id
            .clone()
            .unwrap_or_default();

        let existing: Option<String> = sqlx::query_scalar(
            r"
            SELECT id FROM device_connections
            WHERE subject_id = $1 AND vendor = $2 AND external_account_id = $3
            ",
        )
        .bind(connection.subject_id)
        .bind(connection.vendor.as_str())
        .bind(&account)
        .fetch_optional(&self.pool)
        .await?;

        let id = existing.as_deref().map_or_else(|| Ok(Uuid::new_v4()), parse_uuid)?;
        let sealed = self.seal_credential(id, connection.vendor, connection.credential)?;
        let now = to_millis(connection.now);

        sqlx::query(
            r"
            INSERT INTO device_connections (
                id, subject_id, vendor, external_account_id, access_token, refresh_token,
                token_secret, scope, credential_expires_at, sync_enabled, sync_interval_secs,
                status, consecutive_failures, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10, 'idle', 0, $11, $11)
            ON CONFLICT (subject_id, vendor, external_account_id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_secret = EXCLUDED.token_secret,
                scope = EXCLUDED.scope,
                credential_expires_at = EXCLUDED.credential_expires_at,
                status = CASE WHEN device_connections.status = 'syncing'
                    THEN 'syncing' ELSE 'idle' END,
                last_error = NULL,
                next_attempt_at = NULL,
                consecutive_failures = 0,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(id.to_string())
        .bind(connection.subject_id)
        .bind(connection.vendor.as_str())
        .bind(&account)
        .bind(&sealed.access_token)
        .bind(&sealed.refresh_token)
        .bind(&sealed.token_secret)
        .bind(&connection.credential.scope)
        .bind(connection.credential.expires_at.map(to_millis))
        .bind(connection.sync_interval_secs)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_connection(id)
            .await?
            .ok_or_else(|| AppError::database("Upserted connection vanished"))
    }

    /// Get a connection by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_connection(&self, id: Uuid) -> AppResult<Option<DeviceConnection>> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM device_connections WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_connection).transpose()
    }

    /// List connections, optionally for one subject, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_connections(
        &self,
        subject_id: Option<&str>,
    ) -> AppResult<Vec<DeviceConnection>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {CONNECTION_COLUMNS} FROM device_connections
            WHERE $1 IS NULL OR subject_id = $1
            ORDER BY created_at ASC
            "
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_connection).collect()
    }

    /// Connections the scheduler may consider, least recently synced first
    ///
    /// The final due decision is [`DeviceConnection::is_due`]; this query only
    /// narrows the candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn sync_candidates(&self) -> AppResult<Vec<DeviceConnection>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {CONNECTION_COLUMNS} FROM device_connections
            WHERE sync_enabled = 1 AND status != 'error'
            ORDER BY COALESCE(last_sync_at, 0) ASC, created_at ASC
            "
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_connection).collect()
    }

    /// Delete a connection and its stored credential
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn delete_connection(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM device_connections WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable scheduled syncing
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn set_sync_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE device_connections SET sync_enabled = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(enabled)
        .bind(to_millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record data pushed for a connection, advancing `last_sync_at` to `at`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn record_push(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let at = to_millis(at);
        let result = sqlx::query(
            r"
            UPDATE device_connections
            SET last_sync_at = MAX(COALESCE(last_sync_at, 0), $1), updated_at = $1
            WHERE id = $2
            ",
        )
        .bind(at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Take the per-connection lease
    ///
    /// Succeeds when the connection is not `syncing`, or when its lease has
    /// expired. Returns `false` when another holder owns a live lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn claim_connection(
        &self,
        id: Uuid,
        owner: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> AppResult<bool> {
        let now = to_millis(now);
        let result = sqlx::query(
            r"
            UPDATE device_connections
            SET status = 'syncing', lease_owner = $1, lease_expires_at = $2, updated_at = $3
            WHERE id = $4
              AND (status != 'syncing' OR lease_expires_at IS NULL OR lease_expires_at <= $3)
            ",
        )
        .bind(owner.to_string())
        .bind(to_millis(lease_until))
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Give the lease back and record the outcome on the connection
    ///
    /// Returns `false` when `owner` no longer holds the lease, in which case
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn release_connection(
        &self,
        id: Uuid,
        owner: Uuid,
        release: &ConnectionRelease,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE device_connections
            SET status = $1,
                last_error = $2,
                last_sync_at = COALESCE($3, last_sync_at),
                next_attempt_at = $4,
                consecutive_failures = $5,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $6
            WHERE id = $7 AND lease_owner = $8
            ",
        )
        .bind(release.status.as_str())
        .bind(&release.last_error)
        .bind(release.last_sync_at.map(to_millis))
        .bind(release.next_attempt_at.map(to_millis))
        .bind(i64::from(release.consecutive_failures))
        .bind(to_millis(now))
        .bind(id.to_string())
        .bind(owner.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Store a refreshed credential for an existing connection
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the database operation fails
    pub async fn store_credential(
        &self,
        id: Uuid,
        vendor: VendorKind,
        credential: &OAuthCredential,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let sealed = self.seal_credential(id, vendor, credential)?;
        let result = sqlx::query(
            r"
            UPDATE device_connections
            SET access_token = $1, refresh_token = $2, token_secret = $3, scope = $4,
                credential_expires_at = $5, updated_at = $6
            WHERE id = $7
            ",
        )
        .bind(&sealed.access_token)
        .bind(&sealed.refresh_token)
        .bind(&sealed.token_secret)
        .bind(&credential.scope)
        .bind(credential.expires_at.map(to_millis))
        .bind(to_millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load and decrypt the credential of a connection
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored column cannot be decrypted
    pub async fn load_credential(
        &self,
        id: Uuid,
    ) -> AppResult<Option<(VendorKind, OAuthCredential)>> {
        let row = sqlx::query(
            r"
            SELECT vendor, external_account_id, access_token, refresh_token, token_secret,
                   scope, credential_expires_at
            FROM device_connections WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let vendor: VendorKind = parse_column(&row.try_get::<String, _>("vendor")?)?;
        let open = |column: &str, value: &str| {
            self.cipher()
                .decrypt(value, &credential_aad(id, vendor, column))
        };

        let access_token = open("access_token", &row.try_get::<String, _>("access_token")?)?;
        let refresh_token = row
            .try_get::<Option<String>, _>("refresh_token")?
            .map(|value| open("refresh_token", &value))
            .transpose()?;
        let token_secret = row
            .try_get::<Option<String>, _>("token_secret")?
            .map(|value| open("token_secret", &value))
            .transpose()?;
        let account: String = row.try_get("external_account_id")?;

        Ok(Some((
            vendor,
            OAuthCredential {
                access_token,
                refresh_token,
                token_secret,
                expires_at: opt_from_millis(row.try_get("credential_expires_at")?)?,
                scope: row.try_get("scope")?,
                external_user_id: (!account.is_empty()).then_some(account),
            },
        )))
    }

    fn seal_credential(
        &self,
        id: Uuid,
        vendor: VendorKind,
        credential: &OAuthCredential,
    ) -> AppResult<SealedCredential> {
        let seal = |column: &str, value: &str| {
            self.cipher()
                .encrypt(value, &credential_aad(id, vendor, column))
        };
        Ok(SealedCredential {
            access_token: seal("access_token", &credential.access_token)?,
            refresh_token: credential
                .refresh_token
                .as_deref()
                .map(|value| seal("refresh_token", value))
                .transpose()?,
            token_secret: credential
                .token_secret
                .as_deref()
                .map(|value| seal("token_secret", value))
                .transpose()?,
        })
    }
}

fn row_to_connection(row: &SqliteRow) -> AppResult<DeviceConnection> {
    let account: String = row.try_get("external_account_id")?;
    let lease_owner: Option<String> = row.try_get("lease_owner")?;
    let consecutive_failures: i64 = row.try_get("consecutive_failures")?;

    Ok(DeviceConnection {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        subject_id: row.try_get("subject_id")?,
        vendor: parse_column(&row.try_get::<String, _>("vendor")?)?,
        external_account_id: (!account.is_empty()).then_some(account),
        credential_expires_at: opt_from_millis(row.try_get("credential_expires_at")?)?,
        sync_enabled: row.try_get("sync_enabled")?,
        sync_interval_secs: row.try_get("sync_interval_secs")?,
        last_sync_at: opt_from_millis(row.try_get("last_sync_at")?)?,
        status: parse_column(&row.try_get::<String, _>("status")?)?,
        last_error: row.try_get("last_error")?,
        lease_owner: lease_owner.as_deref().map(parse_uuid).transpose()?,
        lease_expires_at: opt_from_millis(row.try_get("lease_expires_at")?)?,
        next_attempt_at: opt_from_millis(row.try_get("next_attempt_at")?)?,
        consecutive_failures: u32::try_from(consecutive_failures).unwrap_or(u32::MAX),
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
