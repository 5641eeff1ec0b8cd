// ABOUTME: Vendor adapter contract implemented independently by every vendor
// ABOUTME: Authorize, refresh, revoke, lazy range fetch, and tolerant payload parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Vendor adapter contract
//!
//! Fetching is lazy: [`VendorAdapter::fetch`] returns a stream whose every item is
//! the result of exactly one vendor call. The executor polls it page by page, so
//! it can stop between calls on cancellation and put a deadline on each call.
//!
//! Parsing never fails on a single bad record. Bad records are skipped and
//! counted in [`ParsedBatch::skipped`]; only a payload where nothing parses is a
//! [`ProviderError::MalformedPayload`].

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, OAuthCredential, RawDataPoint, TimeRange, VendorKind,
};

use crate::descriptor::{descriptor, VendorDescriptor};

/// Points recovered from one vendor response or pushed payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    /// Well-formed points
    pub points: Vec<RawDataPoint>,
    /// Records that were present but unusable
    pub skipped: usize,
}

impl ParsedBatch {
    /// Empty batch
    #[must_use]
    pub const fn new() -> Self {
        Self {
            points: Vec::new(),
            skipped: 0,
        }
    }

    /// Append another batch
    pub fn extend(&mut self, other: Self) {
        self.points.extend(other.points);
        self.skipped += other.skipped;
    }

    /// Record one unusable entry
    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    /// Fail when records were present but none of them parsed
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MalformedPayload`] when every record was skipped
    pub fn require_any(self, vendor: VendorKind) -> Result<Self, ProviderError> {
        if self.points.is_empty() && self.skipped > 0 {
            return Err(ProviderError::malformed(
                vendor.as_str(),
                format!("none of {} records could be parsed", self.skipped),
            ));
        }
        Ok(self)
    }
}

/// Lazy sequence of pages, one vendor call per item
pub type RawPointStream<'a> =
    Pin<Box<dyn Stream<Item = Result<ParsedBatch, ProviderError>> + Send + 'a>>;

/// Operations every vendor variant implements
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Vendor this adapter speaks to
    fn kind(&self) -> VendorKind;

    /// Static vendor description
    fn descriptor(&self) -> &'static VendorDescriptor {
        descriptor(self.kind())
    }

    /// Consent URL the user is redirected to
    async fn authorization_url(&self, state: &str)
        -> Result<AuthorizationRequest, ProviderError>;

    /// Exchange an authorization grant for credentials
    async fn authorize(&self, grant: &AuthorizationGrant)
        -> Result<OAuthCredential, ProviderError>;

    /// Obtain a fresh access credential
    ///
    /// Vendors without refresh tokens report the credential as expired.
    async fn refresh(&self, credential: &OAuthCredential)
        -> Result<OAuthCredential, ProviderError> {
        let _ = credential;
        Err(ProviderError::auth_expired(
            self.kind().as_str(),
            "vendor does not issue refresh tokens; reconnect required",
        ))
    }

    /// Revoke credentials at the vendor
    async fn revoke(&self, credential: &OAuthCredential) -> Result<(), ProviderError> {
        let _ = credential;
        Ok(())
    }

    /// Lazily fetch every point in `range`
    fn fetch<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        range: TimeRange,
    ) -> RawPointStream<'a> {
        let _ = (credential, range);
        Box::pin(stream::once(async move {
            Err(ProviderError::UnsupportedFeature {
                vendor: self.kind().as_str().to_owned(),
                feature: "fetch",
            })
        }))
    }

    /// Parse a pushed payload
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MalformedPayload`] when the payload shape is wrong
    /// or nothing in it parses
    fn parse(&self, payload: &[u8]) -> Result<ParsedBatch, ProviderError> {
        let _ = payload;
        Err(ProviderError::UnsupportedFeature {
            vendor: self.kind().as_str().to_owned(),
            feature: "parse",
        })
    }
}
