// ABOUTME: Credential store over the encrypted connection table with single-flight refresh
// ABOUTME: Concurrent refreshes of one connection share a single vendor token exchange
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Credential Store
//!
//! Refresh tokens are frequently single-use: when two callers exchange the same
//! refresh token concurrently, the vendor accepts one and revokes the other,
//! and the connection ends up unauthorized. [`CredentialStore::refresh`]
//! therefore collapses concurrent calls for the same connection into one
//! in-flight exchange whose result every caller receives.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use healthsync_core::errors::{AppError, ErrorCode, ProviderError};
use healthsync_core::models::{OAuthCredential, VendorKind};
use healthsync_providers::AdapterRegistry;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::logging::SyncLogger;

/// Credential store failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// No credential is stored for the connection
    #[error("no credential stored for connection {0}")]
    NotFound(Uuid),
    /// The vendor rejected or failed the refresh
    #[error("credential refresh failed: {0}")]
    RefreshFailed(#[source] ProviderError),
    /// Loading, decrypting, or saving the credential failed
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl CredentialError {
    fn storage(error: &AppError) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<CredentialError> for AppError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::NotFound(id) => Self::not_found(format!("Credential for {id}")),
            CredentialError::RefreshFailed(provider) => provider.into(),
            CredentialError::Storage(message) => Self::new(ErrorCode::DatabaseError, message),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<OAuthCredential, CredentialError>>>;

/// Encrypted credential access plus refresh and revocation through the adapters
#[derive(Clone)]
pub struct CredentialStore {
    database: Database,
    adapters: AdapterRegistry,
    refresh_margin: Duration,
    in_flight: Arc<DashMap<Uuid, RefreshFuture>>,
}

impl CredentialStore {
    /// Create a store; credentials expiring within `refresh_margin` are
    /// refreshed proactively by [`Self::get_fresh`]
    #[must_use]
    pub fn new(database: Database, adapters: AdapterRegistry, refresh_margin: Duration) -> Self {
        Self {
            database,
            adapters,
            refresh_margin,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Current stored credential
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when the connection has no credential
    pub async fn get(&self, connection_id: Uuid) -> Result<OAuthCredential, CredentialError> {
        self.load(connection_id).await.map(|(_, credential)| credential)
    }

    /// Stored credential, refreshed first when it is about to expire
    ///
    /// # Errors
    ///
    /// Returns an error when the credential is missing or a needed refresh fails
    pub async fn get_fresh(
        &self,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<OAuthCredential, CredentialError> {
        let credential = self.get(connection_id).await?;
        if credential.expires_within(self.refresh_margin, now) {
            debug!(connection.id = %connection_id, "Credential near expiry, refreshing");
            return self.refresh(connection_id).await;
        }
        Ok(credential)
    }

    /// Exchange the stored refresh token for a new credential and persist it
    ///
    /// Concurrent calls for the same connection share one exchange.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::RefreshFailed`] when the vendor refuses the refresh
    pub async fn refresh(&self, connection_id: Uuid) -> Result<OAuthCredential, CredentialError> {
        let refresh = match self.in_flight.entry(connection_id) {
            Entry::Occupied(mut entry) => {
                // A finished exchange left behind by a dropped caller is stale
                if entry.get().peek().is_some() {
                    let fresh = self.start_refresh(connection_id);
                    entry.insert(fresh.clone());
                    fresh
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let fresh = self.start_refresh(connection_id);
                entry.insert(fresh.clone());
                fresh
            }
        };

        let result = refresh.clone().await;
        self.in_flight
            .remove_if(&connection_id, |_, current| current.ptr_eq(&refresh));
        result
    }

    fn start_refresh(&self, connection_id: Uuid) -> RefreshFuture {
        let store = self.clone();
        async move { store.exchange(connection_id).await }
            .boxed()
            .shared()
    }

    async fn exchange(&self, connection_id: Uuid) -> Result<OAuthCredential, CredentialError> {
        let (vendor, current) = self.load(connection_id).await?;
        let adapter = self
            .adapters
            .get(vendor)
            .map_err(CredentialError::RefreshFailed)?;

        let mut fresh = match adapter.refresh(&current).await {
            Ok(fresh) => fresh,
            Err(error) => {
                SyncLogger::log_credential_refresh(connection_id, vendor, false);
                return Err(CredentialError::RefreshFailed(error));
            }
        };

        // Vendors that do not rotate refresh tokens omit them from the response
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = current.refresh_token;
        }
        if fresh.external_user_id.is_none() {
            fresh.external_user_id = current.external_user_id;
        }

        self.store(connection_id, vendor, &fresh).await?;
        SyncLogger::log_credential_refresh(connection_id, vendor, true);
        Ok(fresh)
    }

    /// Persist a credential for an existing connection
    ///
    /// # Errors
    ///
    /// Returns an error when the connection does not exist or storage fails
    pub async fn store(
        &self,
        connection_id: Uuid,
        vendor: VendorKind,
        credential: &OAuthCredential,
    ) -> Result<(), CredentialError> {
        let stored = self
            .database
            .store_credential(connection_id, vendor, credential, Utc::now())
            .await
            .map_err(|e| CredentialError::storage(&e))?;
        if stored {
            Ok(())
        } else {
            Err(CredentialError::NotFound(connection_id))
        }
    }

    /// Revoke the credential at the vendor
    ///
    /// Revocation is best effort: a vendor failure is logged and the caller
    /// still forgets the credential locally.
    ///
    /// # Errors
    ///
    /// Returns an error when the credential cannot be loaded
    pub async fn revoke(&self, connection_id: Uuid) -> Result<(), CredentialError> {
        let (vendor, credential) = self.load(connection_id).await?;
        match self.adapters.get(vendor) {
            Ok(adapter) => {
                if let Err(error) = adapter.revoke(&credential).await {
                    warn!(
                        connection.id = %connection_id,
                        connection.vendor = %vendor,
                        error = %error,
                        "Vendor revocation failed; forgetting credential locally"
                    );
                }
            }
            Err(error) => {
                warn!(connection.vendor = %vendor, error = %error, "Cannot revoke at vendor");
            }
        }
        Ok(())
    }

    async fn load(
        &self,
        connection_id: Uuid,
    ) -> Result<(VendorKind, OAuthCredential), CredentialError> {
        self.database
            .load_credential(connection_id)
            .await
            .map_err(|e| CredentialError::storage(&e))?
            .ok_or(CredentialError::NotFound(connection_id))
    }
}
