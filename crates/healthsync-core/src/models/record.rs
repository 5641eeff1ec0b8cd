// ABOUTME: Raw vendor data points and vendor-neutral canonical health records
// ABOUTME: Includes metric kinds, canonical units, reporting granularity, and dedup fingerprints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::connection::VendorKind;

/// Canonical metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Heart rate
    HeartRate,
    /// Step count
    Steps,
    /// Time asleep
    SleepHours,
    /// Body weight
    Weight,
    /// Systolic and diastolic pressure
    BloodPressure,
    /// Blood glucose concentration
    BloodGlucose,
    /// Energy expenditure
    Calories,
    /// Distance covered
    Distance,
    /// Estimated minutes of exercise
    ExerciseMinutes,
}

impl MetricKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::Steps => "steps",
            Self::SleepHours => "sleep_hours",
            Self::Weight => "weight",
            Self::BloodPressure => "blood_pressure",
            Self::BloodGlucose => "blood_glucose",
            Self::Calories => "calories",
            Self::Distance => "distance",
            Self::ExerciseMinutes => "exercise_minutes",
        }
    }

    /// The single unit every record of this metric is stored in
    #[must_use]
    pub const fn canonical_unit(self) -> CanonicalUnit {
        match self {
            Self::HeartRate => CanonicalUnit::BeatsPerMinute,
            Self::Steps => CanonicalUnit::Count,
            Self::SleepHours => CanonicalUnit::Hours,
            Self::Weight => CanonicalUnit::Kilograms,
            Self::BloodPressure => CanonicalUnit::MillimetersOfMercury,
            Self::BloodGlucose => CanonicalUnit::MilligramsPerDeciliter,
            Self::Calories => CanonicalUnit::Kilocalories,
            Self::Distance => CanonicalUnit::Meters,
            Self::ExerciseMinutes => CanonicalUnit::Minutes,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart_rate" => Ok(Self::HeartRate),
            "steps" => Ok(Self::Steps),
            "sleep_hours" => Ok(Self::SleepHours),
            "weight" => Ok(Self::Weight),
            "blood_pressure" => Ok(Self::BloodPressure),
            "blood_glucose" => Ok(Self::BloodGlucose),
            "calories" => Ok(Self::Calories),
            "distance" => Ok(Self::Distance),
            "exercise_minutes" => Ok(Self::ExerciseMinutes),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// Units used by canonical records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalUnit {
    /// Dimensionless count
    #[serde(rename = "count")]
    Count,
    /// Beats per minute
    #[serde(rename = "bpm")]
    BeatsPerMinute,
    /// Hours
    #[serde(rename = "hours")]
    Hours,
    /// Minutes
    #[serde(rename = "minutes")]
    Minutes,
    /// Kilograms
    #[serde(rename = "kg")]
    Kilograms,
    /// Millimeters of mercury
    #[serde(rename = "mmHg")]
    MillimetersOfMercury,
    /// Milligrams per deciliter
    #[serde(rename = "mg/dL")]
    MilligramsPerDeciliter,
    /// Kilocalories
    #[serde(rename = "kcal")]
    Kilocalories,
    /// Meters
    #[serde(rename = "m")]
    Meters,
}

impl CanonicalUnit {
    /// Unit symbol
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::BeatsPerMinute => "bpm",
            Self::Hours => "hours",
            Self::Minutes => "minutes",
            Self::Kilograms => "kg",
            Self::MillimetersOfMercury => "mmHg",
            Self::MilligramsPerDeciliter => "mg/dL",
            Self::Kilocalories => "kcal",
            Self::Meters => "m",
        }
    }
}

/// Vendor-shaped value carried by a raw point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawValue {
    /// Plain number in the vendor's native unit for the field
    Number {
        /// Value
        value: f64,
    },
    /// Two related numbers, such as systolic and diastolic pressure
    Pair {
        /// First component
        first: f64,
        /// Second component
        second: f64,
    },
    /// Integer mantissa with a power-of-ten exponent
    Scaled {
        /// Mantissa
        value: i64,
        /// Power of ten
        exponent: i32,
    },
    /// Number with an explicit unit string supplied by the device
    Quantity {
        /// Value
        value: f64,
        /// Unit as reported
        unit: String,
    },
}

impl RawValue {
    /// Plain number shorthand
    #[must_use]
    pub const fn number(value: f64) -> Self {
        Self::Number { value }
    }
}

/// One vendor-shaped sample, transient within a single pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataPoint {
    /// Vendor that produced the point
    pub vendor: VendorKind,
    /// Source field path, for example `activities.summary.steps`
    pub field: String,
    /// When the measurement was taken (start of the day for daily summaries)
    pub observed_at: DateTime<Utc>,
    /// Reported value
    pub value: RawValue,
}

impl RawDataPoint {
    /// Build a point
    pub fn new(
        vendor: VendorKind,
        field: impl Into<String>,
        observed_at: DateTime<Utc>,
        value: RawValue,
    ) -> Self {
        Self {
            vendor,
            field: field.into(),
            observed_at,
            value,
        }
    }
}

/// Canonical value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Single number in the metric's canonical unit
    Scalar(f64),
    /// Blood pressure pair in mmHg
    BloodPressure {
        /// Systolic pressure
        systolic: f64,
        /// Diastolic pressure
        diastolic: f64,
    },
}

impl MetricValue {
    /// Hex digest of the exact value
    ///
    /// Paired with the fingerprint it identifies one revision of a bucket: a
    /// replay of the same value collides, a superseding value does not.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match *self {
            Self::Scalar(value) => {
                hasher.update(b"scalar|");
                hasher.update(value.to_bits().to_be_bytes());
            }
            Self::BloodPressure {
                systolic,
                diastolic,
            } => {
                hasher.update(b"blood_pressure|");
                hasher.update(systolic.to_bits().to_be_bytes());
                hasher.update(diastolic.to_bits().to_be_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Resolution at which a vendor reports a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Exact to the second
    Second,
    /// Minute buckets
    Minute,
    /// Hour buckets
    Hour,
    /// Daily summaries
    Day,
}

impl Granularity {
    /// Truncate an instant to the start of its bucket
    #[must_use]
    pub fn truncate(self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let step = match self {
            Self::Second => TimeDelta::seconds(1),
            Self::Minute => TimeDelta::minutes(1),
            Self::Hour => TimeDelta::hours(1),
            Self::Day => TimeDelta::days(1),
        };
        instant.duration_trunc(step).unwrap_or(instant)
    }
}

/// Deterministic dedup key for a canonical record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over subject, source connection, metric, and the truncated instant
    #[must_use]
    pub fn compute(
        subject_id: &str,
        connection_id: Uuid,
        metric: MetricKind,
        measured_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Self {
        let bucket = granularity.truncate(measured_at).timestamp();
        let mut hasher = Sha256::new();
        hasher.update(subject_id.as_bytes());
        hasher.update(b"|");
        hasher.update(connection_id.as_bytes());
        hasher.update(b"|");
        hasher.update(metric.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a stored fingerprint
    #[must_use]
    pub const fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    /// Hex representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vendor-neutral measurement proposed to the canonical store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalHealthRecord {
    /// Family member the measurement belongs to
    pub subject_id: String,
    /// Metric kind
    pub metric: MetricKind,
    /// Value in the canonical unit
    pub value: MetricValue,
    /// Canonical unit of `value`
    pub unit: CanonicalUnit,
    /// Measurement instant
    pub measured_at: DateTime<Utc>,
    /// Connection that reported the measurement
    pub source_connection_id: Uuid,
    /// Dedup key
    pub fingerprint: Fingerprint,
}
