// ABOUTME: Per-vendor token bucket limiter and exponential backoff with bounded jitter
// ABOUTME: Gates every outbound vendor call and computes reschedule delays after failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Rate and Backoff Control
//!
//! Each vendor gets one token bucket sized to its published quota (or a
//! configured override). Buckets refill continuously, so a quota of 150 calls
//! per hour allows a burst of 150 and then one call every 24 seconds.
//!
//! Backoff never sleeps: it only computes how long the executor should wait
//! before the connection is eligible again. Retries are rescheduled, not run
//! inline.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use healthsync_core::models::VendorKind;
use healthsync_providers::descriptor::{descriptor, Quota};
use rand::Rng;
use tracing::debug;

use crate::config::BackoffConfig;

/// Outcome of asking for a vendor call permit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The call may proceed
    Permit,
    /// The bucket is empty; try again after the given delay
    Denied {
        /// Time until a token is available
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether a permit was granted
    #[must_use]
    pub const fn is_permit(self) -> bool {
        matches!(self, Self::Permit)
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    blocked_until: Option<Instant>,
}

impl TokenBucket {
    fn new(quota: Quota, now: Instant) -> Self {
        let capacity = f64::from(quota.requests.max(1));
        let window = quota.window.as_secs_f64().max(1.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window,
            last_refill: now,
            blocked_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.refill_per_sec, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self, now: Instant) -> RateDecision {
        if let Some(until) = self.blocked_until {
            if until > now {
                return RateDecision::Denied {
                    retry_after: until - now,
                };
            }
            self.blocked_until = None;
        }

        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return RateDecision::Permit;
        }

        let missing = 1.0 - self.tokens;
        RateDecision::Denied {
            retry_after: Duration::from_secs_f64(missing / self.refill_per_sec),
        }
    }

    fn block_for(&mut self, delay: Duration, now: Instant) {
        self.tokens = 0.0;
        self.last_refill = now;
        let until = now + delay;
        if self.blocked_until.map_or(true, |current| current < until) {
            self.blocked_until = Some(until);
        }
    }
}

/// Per-vendor token bucket limiter
///
/// Vendors without a quota (push vendors) are never throttled.
#[derive(Debug, Default)]
pub struct RateLimiter {
    quotas: HashMap<VendorKind, Quota>,
    buckets: DashMap<VendorKind, TokenBucket>,
}

impl RateLimiter {
    /// Limiter using published quotas, replaced per vendor by `overrides`
    #[must_use]
    pub fn new(overrides: &HashMap<VendorKind, Quota>) -> Self {
        let quotas = VendorKind::ALL
            .into_iter()
            .filter_map(|kind| {
                overrides
                    .get(&kind)
                    .copied()
                    .or(descriptor(kind).quota)
                    .map(|quota| (kind, quota))
            })
            .collect();
        Self {
            quotas,
            buckets: DashMap::new(),
        }
    }

    /// Quota applied to a vendor
    #[must_use]
    pub fn quota(&self, vendor: VendorKind) -> Option<Quota> {
        self.quotas.get(&vendor).copied()
    }

    /// Take a permit for one vendor call
    pub fn acquire(&self, vendor: VendorKind) -> RateDecision {
        self.acquire_at(vendor, Instant::now())
    }

    /// Take a permit as of `now`
    pub fn acquire_at(&self, vendor: VendorKind, now: Instant) -> RateDecision {
        let Some(quota) = self.quota(vendor) else {
            return RateDecision::Permit;
        };
        let decision = self
            .buckets
            .entry(vendor)
            .or_insert_with(|| TokenBucket::new(quota, now))
            .try_acquire(now);
        if let RateDecision::Denied { retry_after } = decision {
            debug!(
                vendor = vendor.as_str(),
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate permit denied"
            );
        }
        decision
    }

    /// Stop issuing permits for `vendor` for `delay`
    ///
    /// Used when the vendor itself answered with a rate limit, which means our
    /// bucket is out of step with the vendor's counter.
    pub fn penalize(&self, vendor: VendorKind, delay: Duration) {
        self.penalize_at(vendor, delay, Instant::now());
    }

    /// Penalize as of `now`
    pub fn penalize_at(&self, vendor: VendorKind, delay: Duration, now: Instant) {
        let Some(quota) = self.quota(vendor) else {
            return;
        };
        self.buckets
            .entry(vendor)
            .or_insert_with(|| TokenBucket::new(quota, now))
            .block_for(delay, now);
    }
}

/// Exponential backoff with jitter, tracked per vendor
///
/// The n-th consecutive failure waits `base * factor^(n-1)` capped at
/// `max_delay`, plus jitter of at most 10% that never reaches the next step,
/// so successive delays are non-decreasing.
#[derive(Debug)]
pub struct BackoffController {
    config: BackoffConfig,
    failures: DashMap<VendorKind, u32>,
}

impl BackoffController {
    /// Controller with the given policy
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: DashMap::new(),
        }
    }

    /// Policy in use
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before retry number `failures` (1 = first failure), without jitter
    #[must_use]
    pub fn nominal_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let multiplier = self.config.factor.max(1).checked_pow(exponent);
        multiplier
            .and_then(|m| self.config.base_delay.checked_mul(m))
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// Delay before retry number `failures`, jittered when enabled
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let nominal = self.nominal_delay(failures);
        if !self.config.jitter {
            return nominal;
        }
        let next = self.nominal_delay(failures.saturating_add(1));
        let headroom = (next.saturating_sub(nominal)).min(nominal / 10);
        if headroom.is_zero() {
            return nominal;
        }
        // Strictly below the next step so ordering holds
        let jitter_ms = rand::thread_rng().gen_range(0..headroom.as_millis().max(1) as u64);
        nominal + Duration::from_millis(jitter_ms)
    }

    /// Record a transient failure for `vendor` and return the delay to apply
    pub fn record_failure(&self, vendor: VendorKind) -> Duration {
        let failures = {
            let mut count = self.failures.entry(vendor).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let delay = self.delay_for(failures);
        debug!(
            vendor = vendor.as_str(),
            consecutive_failures = failures,
            delay_ms = delay.as_millis() as u64,
            "Backoff computed"
        );
        delay
    }

    /// Clear the failure streak of `vendor`
    pub fn record_success(&self, vendor: VendorKind) {
        self.failures.remove(&vendor);
    }

    /// Current failure streak of `vendor`
    #[must_use]
    pub fn consecutive_failures(&self, vendor: VendorKind) -> u32 {
        self.failures.get(&vendor).map_or(0, |count| *count)
    }
}
