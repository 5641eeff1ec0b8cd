// ABOUTME: Shared map, dedup, and store path used by both polling and push ingestion
// ABOUTME: Counts every raw point as inserted, duplicate, or invalid
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Ingestion Pipeline
//!
//! Counting is per raw point, by its primary record. Derived records (the
//! exercise-minutes estimate) are stored alongside but not counted, so an
//! attempt's `records_synced` matches the number of new vendor points.

use std::sync::Arc;

use healthsync_core::errors::AppError;
use healthsync_core::models::{RawDataPoint, VendorKind};
use healthsync_providers::ParsedBatch;
use tracing::{debug, trace};

use crate::dedup::{Acceptance, DedupIndex};
use crate::mapper::{self, MappingContext};

/// Counts produced by processing raw points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Points whose record was newly stored
    pub inserted: u32,
    /// Points whose record was already stored
    pub duplicates: u32,
    /// Points skipped as unparseable, unmappable, or empty
    pub invalid: u32,
}

impl ProcessReport {
    /// Add another report's counts
    pub fn absorb(&mut self, other: Self) {
        self.inserted = self.inserted.saturating_add(other.inserted);
        self.duplicates = self.duplicates.saturating_add(other.duplicates);
        self.invalid = self.invalid.saturating_add(other.invalid);
    }

    /// Points accounted for
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.inserted
            .saturating_add(self.duplicates)
            .saturating_add(self.invalid)
    }
}

/// Storage failed part way through a batch
#[derive(Debug, thiserror::Error)]
#[error("ingestion stopped after {} points: {error}", .partial.total())]
pub struct PipelineFailure {
    /// Counts for the points fully handled before the failure
    ///
    /// `partial.total()` is the index of the point that failed.
    pub partial: ProcessReport,
    /// The storage error
    #[source]
    pub error: AppError,
}

/// Mapper, dedup index, and store in sequence
#[derive(Clone)]
pub struct IngestionPipeline {
    dedup: Arc<DedupIndex>,
}

impl IngestionPipeline {
    /// Pipeline writing through `dedup`
    #[must_use]
    pub const fn new(dedup: Arc<DedupIndex>) -> Self {
        Self { dedup }
    }

    /// Process one parsed batch; the batch's skipped count is carried as invalid
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineFailure`] carrying the partial counts if the store fails
    pub async fn process_batch(
        &self,
        vendor: VendorKind,
        context: MappingContext<'_>,
        batch: &ParsedBatch,
    ) -> Result<ProcessReport, PipelineFailure> {
        let mut report = self.process(vendor, context, &batch.points).await?;
        report.invalid = report
            .invalid
            .saturating_add(u32::try_from(batch.skipped).unwrap_or(u32::MAX));
        Ok(report)
    }

    /// Map, dedup, and store each point
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineFailure`] carrying the partial counts if the store fails
    pub async fn process(
        &self,
        vendor: VendorKind,
        context: MappingContext<'_>,
        points: &[RawDataPoint],
    ) -> Result<ProcessReport, PipelineFailure> {
        let mut report = ProcessReport::default();

        for point in points {
            let records = match mapper::map(vendor, point, context) {
                Ok(records) => records,
                Err(error) => {
                    trace!(vendor = vendor.as_str(), error = %error, "Point skipped");
                    report.invalid += 1;
                    continue;
                }
            };

            let mut records = records.iter();
            let Some(primary) = records.next() else {
                report.invalid += 1;
                continue;
            };

            // A point counts only once its derived records are stored too, so
            // a resumed batch starts at the first point not fully written
            let accepted = match self.dedup.accept(primary).await {
                Ok(accepted) => accepted,
                Err(error) => {
                    return Err(PipelineFailure {
                        partial: report,
                        error,
                    })
                }
            };
            for derived in records {
                if let Err(error) = self.dedup.accept(derived).await {
                    return Err(PipelineFailure {
                        partial: report,
                        error,
                    });
                }
            }
            match accepted {
                Acceptance::Inserted => report.inserted += 1,
                Acceptance::DuplicateSkipped => report.duplicates += 1,
            }
        }

        debug!(
            vendor = vendor.as_str(),
            inserted = report.inserted,
            duplicates = report.duplicates,
            invalid = report.invalid,
            "Batch processed"
        );
        Ok(report)
    }
}
