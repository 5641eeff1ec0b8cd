// ABOUTME: Pending OAuth authorization states between consent redirect and callback
// ABOUTME: Single-use, time-limited states binding a callback to a subject and vendor
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use healthsync_core::errors::{AppError, AppResult, ErrorCode};
use healthsync_core::models::VendorKind;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// How long a consent redirect stays valid
const STATE_TTL_MINUTES: i64 = 10;

/// Who started an authorization flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    /// Subject the new connection will belong to
    pub subject_id: String,
    /// Vendor being connected
    pub vendor: VendorKind,
    /// When the flow started
    pub created_at: DateTime<Utc>,
    /// When the state stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// In-memory store of outstanding OAuth states
#[derive(Debug, Clone, Default)]
pub struct AuthorizationStates {
    states: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
}

impl AuthorizationStates {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a flow for `subject_id` and return its state value
    pub async fn issue(&self, subject_id: &str, vendor: VendorKind, now: DateTime<Utc>) -> String {
        let state = Uuid::new_v4().simple().to_string();
        let pending = PendingAuthorization {
            subject_id: subject_id.to_owned(),
            vendor,
            created_at: now,
            expires_at: now + Duration::minutes(STATE_TTL_MINUTES),
        };

        let mut states = self.states.write().await;
        states.retain(|_, existing| existing.expires_at > now);
        states.insert(state.clone(), pending);
        state
    }

    /// Consume a state delivered to the callback
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::AuthInvalid`] when the state is unknown, already
    /// used, expired, or was issued for another vendor
    pub async fn consume(
        &self,
        state: &str,
        vendor: VendorKind,
        now: DateTime<Utc>,
    ) -> AppResult<PendingAuthorization> {
        let pending = self
            .states
            .write()
            .await
            .remove(state)
            .ok_or_else(|| AppError::new(ErrorCode::AuthInvalid, "Unknown authorization state"))?;

        if pending.expires_at <= now {
            return Err(AppError::new(
                ErrorCode::AuthInvalid,
                "Authorization state expired",
            ));
        }
        if pending.vendor != vendor {
            warn!(
                expected = pending.vendor.as_str(),
                received = vendor.as_str(),
                "Authorization callback for a different vendor"
            );
            return Err(AppError::new(
                ErrorCode::AuthInvalid,
                "Authorization state does not match vendor",
            ));
        }
        Ok(pending)
    }

    /// Number of states still outstanding
    pub async fn outstanding(&self) -> usize {
        self.states.read().await.len()
    }
}
