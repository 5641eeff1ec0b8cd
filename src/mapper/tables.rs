// ABOUTME: Static per-vendor field tables mapping source fields to canonical metrics
// ABOUTME: Each row names the conversion into the metric's canonical unit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use healthsync_core::constants::mapping::{GLUCOSE_MMOL_TO_MG_DL, POUNDS_TO_KG};
use healthsync_core::models::{MetricKind, VendorKind};

/// Accepted unit spelling and its factor into the canonical unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitFactor {
    /// Unit as sent by the vendor, compared case-insensitively
    pub unit: &'static str,
    /// Multiplier into the canonical unit
    pub factor: f64,
}

/// How a raw value becomes a canonical value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// Already in the canonical unit
    Identity,
    /// Multiply by a constant
    Multiply(f64),
    /// Divide by a constant
    Divide(f64),
    /// `value * 10^exponent`, from a scaled integer
    PowerOfTen,
    /// Systolic/diastolic pair in mmHg
    Pair,
    /// Quantity whose unit picks the factor; unit-less values are canonical
    Units(&'static [UnitFactor]),
}

/// One documented mapping row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    /// Source field as produced by the vendor adapter
    pub source: &'static str,
    /// Canonical metric
    pub metric: MetricKind,
    /// Conversion into the canonical unit
    pub conversion: Conversion,
    /// Also emit an exercise-minutes estimate from this step count
    pub derives_exercise_minutes: bool,
}

const fn rule(source: &'static str, metric: MetricKind, conversion: Conversion) -> FieldRule {
    FieldRule {
        source,
        metric,
        conversion,
        derives_exercise_minutes: false,
    }
}

const fn steps(source: &'static str) -> FieldRule {
    FieldRule {
        source,
        metric: MetricKind::Steps,
        conversion: Conversion::Identity,
        derives_exercise_minutes: true,
    }
}

const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const METERS_PER_KILOMETER: f64 = 1000.0;

static FITBIT_FIELDS: &[FieldRule] = &[
    steps("activities.summary.steps"),
    rule(
        "activities.summary.distance",
        MetricKind::Distance,
        Conversion::Multiply(METERS_PER_KILOMETER),
    ),
    rule(
        "activities.summary.caloriesOut",
        MetricKind::Calories,
        Conversion::Identity,
    ),
    rule(
        "heart.restingHeartRate",
        MetricKind::HeartRate,
        Conversion::Identity,
    ),
    rule(
        "sleep.summary.totalMinutesAsleep",
        MetricKind::SleepHours,
        Conversion::Divide(MINUTES_PER_HOUR),
    ),
    rule("body.weight", MetricKind::Weight, Conversion::Identity),
];

static GARMIN_FIELDS: &[FieldRule] = &[
    steps("dailies.steps"),
    rule(
        "dailies.distanceInMeters",
        MetricKind::Distance,
        Conversion::Identity,
    ),
    rule(
        "dailies.activeKilocalories",
        MetricKind::Calories,
        Conversion::Identity,
    ),
    rule(
        "dailies.restingHeartRateInBeatsPerMinute",
        MetricKind::HeartRate,
        Conversion::Identity,
    ),
    rule(
        "sleeps.durationInSeconds",
        MetricKind::SleepHours,
        Conversion::Divide(SECONDS_PER_HOUR),
    ),
];

static WITHINGS_FIELDS: &[FieldRule] = &[
    rule("measure.weight", MetricKind::Weight, Conversion::PowerOfTen),
    rule(
        "measure.blood_pressure",
        MetricKind::BloodPressure,
        Conversion::Pair,
    ),
    steps("activity.steps"),
    rule("activity.distance", MetricKind::Distance, Conversion::Identity),
    rule("activity.calories", MetricKind::Calories, Conversion::Identity),
    rule(
        "sleep.total_sleep_time",
        MetricKind::SleepHours,
        Conversion::Divide(SECONDS_PER_HOUR),
    ),
];

static COUNT_UNITS: &[UnitFactor] = &[UnitFactor {
    unit: "count",
    factor: 1.0,
}];

static HEART_RATE_UNITS: &[UnitFactor] = &[
    UnitFactor {
        unit: "count/min",
        factor: 1.0,
    },
    UnitFactor {
        unit: "bpm",
        factor: 1.0,
    },
];

static SLEEP_UNITS: &[UnitFactor] = &[
    UnitFactor {
        unit: "h",
        factor: 1.0,
    },
    UnitFactor {
        unit: "hr",
        factor: 1.0,
    },
    UnitFactor {
        unit: "min",
        factor: 1.0 / MINUTES_PER_HOUR,
    },
];

static GLUCOSE_UNITS: &[UnitFactor] = &[
    UnitFactor {
        unit: "mg/dL",
        factor: 1.0,
    },
    UnitFactor {
        unit: "mmol/L",
        factor: GLUCOSE_MMOL_TO_MG_DL,
    },
];

static WEIGHT_UNITS: &[UnitFactor] = &[
    UnitFactor {
        unit: "kg",
        factor: 1.0,
    },
    UnitFactor {
        unit: "lb",
        factor: POUNDS_TO_KG,
    },
];

static DISTANCE_UNITS: &[UnitFactor] = &[
    UnitFactor {
        unit: "m",
        factor: 1.0,
    },
    UnitFactor {
        unit: "km",
        factor: METERS_PER_KILOMETER,
    },
];

static CALORIE_UNITS: &[UnitFactor] = &[UnitFactor {
    unit: "kcal",
    factor: 1.0,
}];

static APPLE_HEALTH_FIELDS: &[FieldRule] = &[
    FieldRule {
        source: "samples.steps",
        metric: MetricKind::Steps,
        conversion: Conversion::Units(COUNT_UNITS),
        derives_exercise_minutes: true,
    },
    rule(
        "samples.heart_rate",
        MetricKind::HeartRate,
        Conversion::Units(HEART_RATE_UNITS),
    ),
    rule(
        "samples.sleep_hours",
        MetricKind::SleepHours,
        Conversion::Units(SLEEP_UNITS),
    ),
    rule(
        "samples.blood_glucose",
        MetricKind::BloodGlucose,
        Conversion::Units(GLUCOSE_UNITS),
    ),
    rule(
        "samples.weight",
        MetricKind::Weight,
        Conversion::Units(WEIGHT_UNITS),
    ),
    rule(
        "samples.distance",
        MetricKind::Distance,
        Conversion::Units(DISTANCE_UNITS),
    ),
    rule(
        "samples.blood_pressure",
        MetricKind::BloodPressure,
        Conversion::Pair,
    ),
    rule(
        "samples.calories",
        MetricKind::Calories,
        Conversion::Units(CALORIE_UNITS),
    ),
];

/// The documented field table of a vendor
#[must_use]
pub fn field_table(vendor: VendorKind) -> &'static [FieldRule] {
    match vendor {
        VendorKind::Fitbit => FITBIT_FIELDS,
        VendorKind::Garmin => GARMIN_FIELDS,
        VendorKind::Withings => WITHINGS_FIELDS,
        VendorKind::AppleHealth => APPLE_HEALTH_FIELDS,
    }
}

/// Row for `source` in the vendor's table
#[must_use]
pub fn find_rule(vendor: VendorKind, source: &str) -> Option<&'static FieldRule> {
    field_table(vendor).iter().find(|rule| rule.source == source)
}
