// ABOUTME: Deterministic normalization of raw vendor points into canonical health records
// ABOUTME: Applies the vendor field table, unit conversion, value checks, and fingerprinting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Data Mapper
//!
//! [`map`] turns one [`RawDataPoint`] into zero or more canonical records: one
//! for the matching table row, plus an exercise-minutes estimate for step
//! counts. A point the mapper cannot use yields a [`MappingError`], which the
//! caller counts as invalid and moves on. A zero step count or zero sleep is
//! "no data" and yields no records without being an error.

mod tables;

pub use tables::{field_table, find_rule, Conversion, FieldRule, UnitFactor};

use healthsync_core::constants::mapping::STEPS_PER_EXERCISE_MINUTE;
use healthsync_core::models::{
    CanonicalHealthRecord, Fingerprint, MetricKind, MetricValue, RawDataPoint, RawValue,
    VendorKind,
};
use healthsync_providers::descriptor::descriptor;
use uuid::Uuid;

/// Why a raw point produced no record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    /// The field is not in the vendor's table
    #[error("unmapped field {field}")]
    UnknownField {
        /// Source field
        field: String,
    },
    /// The value has the wrong shape for the field's conversion
    #[error("field {field} has an unexpected value shape")]
    UnexpectedShape {
        /// Source field
        field: String,
    },
    /// The quantity's unit is not one the field accepts
    #[error("field {field} has unsupported unit {unit}")]
    UnknownUnit {
        /// Source field
        field: String,
        /// Unit as sent
        unit: String,
    },
    /// The converted value is not a plausible measurement
    #[error("field {field} has invalid value {value}")]
    InvalidValue {
        /// Source field
        field: String,
        /// Converted value
        value: f64,
    },
}

/// Who a point belongs to
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    /// Subject the records are about
    pub subject_id: &'a str,
    /// Connection the point came from
    pub connection_id: Uuid,
}

/// Map one raw point of `vendor` into canonical records
///
/// # Errors
///
/// Returns a [`MappingError`] when the point is unusable
pub fn map(
    vendor: VendorKind,
    point: &RawDataPoint,
    context: MappingContext<'_>,
) -> Result<Vec<CanonicalHealthRecord>, MappingError> {
    let rule = find_rule(vendor, &point.field).ok_or_else(|| MappingError::UnknownField {
        field: point.field.clone(),
    })?;

    let value = convert(rule, point)?;
    if !is_plausible(rule.metric, value) {
        return Err(MappingError::InvalidValue {
            field: point.field.clone(),
            value: primary(value),
        });
    }
    if is_no_data(rule.metric, value) {
        return Ok(Vec::new());
    }

    let mut records = vec![record(vendor, point, context, rule.metric, value)];

    if rule.derives_exercise_minutes {
        if let Some(minutes) = exercise_minutes(primary(value)) {
            records.push(record(
                vendor,
                point,
                context,
                MetricKind::ExerciseMinutes,
                MetricValue::Scalar(minutes),
            ));
        }
    }

    Ok(records)
}

fn convert(rule: &FieldRule, point: &RawDataPoint) -> Result<MetricValue, MappingError> {
    let shape = || MappingError::UnexpectedShape {
        field: point.field.clone(),
    };

    let scalar = match (rule.conversion, &point.value) {
        (Conversion::Pair, RawValue::Pair { first, second }) => {
            return Ok(MetricValue::BloodPressure {
                systolic: *first,
                diastolic: *second,
            });
        }
        (Conversion::Pair, _) => return Err(shape()),
        (
            Conversion::Identity | Conversion::PowerOfTen | Conversion::Units(_),
            RawValue::Number { value },
        ) => *value,
        (Conversion::Multiply(factor), RawValue::Number { value }) => value * factor,
        (Conversion::Divide(divisor), RawValue::Number { value }) => value / divisor,
        (Conversion::PowerOfTen, RawValue::Scaled { value, exponent }) => {
            scale(*value, *exponent)
        }
        (Conversion::Units(units), RawValue::Quantity { value, unit }) => {
            let factor = units
                .iter()
                .find(|known| known.unit.eq_ignore_ascii_case(unit))
                .ok_or_else(|| MappingError::UnknownUnit {
                    field: point.field.clone(),
                    unit: unit.clone(),
                })?
                .factor;
            value * factor
        }
        _ => return Err(shape()),
    };
    Ok(MetricValue::Scalar(scalar))
}

fn scale(value: i64, exponent: i32) -> f64 {
    let magnitude = 10f64.powi(exponent.abs());
    if exponent < 0 {
        value as f64 / magnitude
    } else {
        value as f64 * magnitude
    }
}

const fn primary(value: MetricValue) -> f64 {
    match value {
        MetricValue::Scalar(scalar) => scalar,
        MetricValue::BloodPressure { systolic, .. } => systolic,
    }
}

/// Metrics where zero means the device recorded nothing
const fn is_cumulative(metric: MetricKind) -> bool {
    matches!(
        metric,
        MetricKind::Steps
            | MetricKind::SleepHours
            | MetricKind::Distance
            | MetricKind::Calories
            | MetricKind::ExerciseMinutes
    )
}

fn is_plausible(metric: MetricKind, value: MetricValue) -> bool {
    match value {
        MetricValue::BloodPressure {
            systolic,
            diastolic,
        } => {
            systolic.is_finite()
                && diastolic.is_finite()
                && systolic > 0.0
                && diastolic > 0.0
                && systolic >= diastolic
        }
        // Negative cumulative values are dropped later as "no data"
        MetricValue::Scalar(scalar) => {
            scalar.is_finite() && (is_cumulative(metric) || scalar > 0.0)
        }
    }
}

fn is_no_data(metric: MetricKind, value: MetricValue) -> bool {
    is_cumulative(metric) && primary(value) <= 0.0
}

fn exercise_minutes(steps: f64) -> Option<f64> {
    let minutes = (steps.max(0.0) as u64) / STEPS_PER_EXERCISE_MINUTE;
    (minutes >= 1).then_some(minutes as f64)
}

fn record(
    vendor: VendorKind,
    point: &RawDataPoint,
    context: MappingContext<'_>,
    metric: MetricKind,
    value: MetricValue,
) -> CanonicalHealthRecord {
    let granularity = descriptor(vendor).granularity(metric);
    CanonicalHealthRecord {
        subject_id: context.subject_id.to_owned(),
        metric,
        value,
        unit: metric.canonical_unit(),
        measured_at: point.observed_at,
        source_connection_id: context.connection_id,
        fingerprint: Fingerprint::compute(
            context.subject_id,
            context.connection_id,
            metric,
            point.observed_at,
            granularity,
        ),
    }
}
