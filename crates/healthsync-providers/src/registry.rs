// ABOUTME: Adapter construction and lookup keyed by vendor kind
// ABOUTME: Only vendors with complete client registrations are registered
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::sync::Arc;

use healthsync_core::errors::ProviderError;
use healthsync_core::models::VendorKind;
use tracing::{info, warn};

use crate::adapter::VendorAdapter;
use crate::apple_health::AppleHealthAdapter;
use crate::config::VendorClientConfig;
use crate::fitbit::FitbitAdapter;
use crate::garmin::GarminAdapter;
use crate::withings::WithingsAdapter;

/// Build the adapter for `kind`
#[must_use]
pub fn create_adapter(kind: VendorKind, client: VendorClientConfig) -> Arc<dyn VendorAdapter> {
    match kind {
        VendorKind::Fitbit => Arc::new(FitbitAdapter::new(client)),
        VendorKind::Garmin => Arc::new(GarminAdapter::new(client)),
        VendorKind::Withings => Arc::new(WithingsAdapter::new(client)),
        VendorKind::AppleHealth => Arc::new(AppleHealthAdapter::new(client)),
    }
}

/// Registered adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<VendorKind, Arc<dyn VendorAdapter>>,
}

impl AdapterRegistry {
    /// Registry with no adapters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry built from client registrations
    ///
    /// Incomplete registrations are skipped with a warning so that one
    /// unconfigured vendor does not prevent the others from syncing.
    pub fn from_config<I>(clients: I) -> Self
    where
        I: IntoIterator<Item = (VendorKind, VendorClientConfig)>,
    {
        let mut registry = Self::new();
        for (kind, client) in clients {
            if client.is_complete() {
                registry.register(create_adapter(kind, client));
                info!(vendor = kind.as_str(), "vendor adapter registered");
            } else {
                warn!(
                    vendor = kind.as_str(),
                    "vendor client registration incomplete, adapter disabled"
                );
            }
        }
        registry
    }

    /// Register or replace the adapter for its vendor
    pub fn register(&mut self, adapter: Arc<dyn VendorAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Adapter for `kind`
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] when the vendor is not registered
    pub fn get(&self, kind: VendorKind) -> Result<Arc<dyn VendorAdapter>, ProviderError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Configuration {
                vendor: kind.as_str().to_owned(),
                message: "vendor is not configured".to_owned(),
            })
    }

    /// Whether an adapter is registered for `kind`
    #[must_use]
    pub fn contains(&self, kind: VendorKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered vendor kinds
    pub fn kinds(&self) -> impl Iterator<Item = VendorKind> + '_ {
        self.adapters.keys().copied()
    }
}
