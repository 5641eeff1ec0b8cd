// ABOUTME: Fixture tests for the data mapper across every vendor's field table
// ABOUTME: Checks unit conversion, derived exercise minutes, no-data days, and rejected values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used, clippy::panic, clippy::float_cmp)]

use chrono::{TimeZone, Utc};
use healthsync::mapper::{field_table, map, MappingContext, MappingError};
use healthsync_core::models::{
    CanonicalHealthRecord, CanonicalUnit, MetricKind, MetricValue, RawDataPoint, RawValue,
    VendorKind,
};
use uuid::Uuid;

const CONNECTION: Uuid = Uuid::from_u128(0x5eed);

fn context() -> MappingContext<'static> {
    MappingContext {
        subject_id: "member-1",
        connection_id: CONNECTION,
    }
}

fn point(vendor: VendorKind, field: &str, value: RawValue) -> RawDataPoint {
    let at = Utc.with_ymd_and_hms(2025, 3, 4, 7, 30, 0).unwrap();
    RawDataPoint::new(vendor, field, at, value)
}

fn quantity(value: f64, unit: &str) -> RawValue {
    RawValue::Quantity {
        value,
        unit: unit.to_owned(),
    }
}

fn map_one(vendor: VendorKind, field: &str, value: RawValue) -> CanonicalHealthRecord {
    let mut records = map(vendor, &point(vendor, field, value), context()).unwrap();
    assert_eq!(records.len(), 1, "expected exactly one record for {field}");
    records.remove(0)
}

fn scalar(record: &CanonicalHealthRecord) -> f64 {
    match record.value {
        MetricValue::Scalar(value) => value,
        MetricValue::BloodPressure { .. } => panic!("expected a scalar for {}", record.metric),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_conversions_into_canonical_units() {
    let cases = [
        (
            VendorKind::Fitbit,
            "activities.summary.distance",
            RawValue::number(5.2),
            MetricKind::Distance,
            5200.0,
        ),
        (
            VendorKind::Fitbit,
            "sleep.summary.totalMinutesAsleep",
            RawValue::number(450.0),
            MetricKind::SleepHours,
            7.5,
        ),
        (
            VendorKind::Fitbit,
            "heart.restingHeartRate",
            RawValue::number(58.0),
            MetricKind::HeartRate,
            58.0,
        ),
        (
            VendorKind::Garmin,
            "sleeps.durationInSeconds",
            RawValue::number(27_000.0),
            MetricKind::SleepHours,
            7.5,
        ),
        (
            VendorKind::Garmin,
            "dailies.activeKilocalories",
            RawValue::number(640.0),
            MetricKind::Calories,
            640.0,
        ),
        (
            VendorKind::Withings,
            "measure.weight",
            RawValue::Scaled {
                value: 72_500,
                exponent: -3,
            },
            MetricKind::Weight,
            72.5,
        ),
        (
            VendorKind::Withings,
            "sleep.total_sleep_time",
            RawValue::number(25_200.0),
            MetricKind::SleepHours,
            7.0,
        ),
        (
            VendorKind::AppleHealth,
            "samples.blood_glucose",
            quantity(5.5, "mmol/L"),
            MetricKind::BloodGlucose,
            99.0,
        ),
        (
            VendorKind::AppleHealth,
            "samples.weight",
            quantity(160.0, "lb"),
            MetricKind::Weight,
            72.574_779_2,
        ),
        (
            VendorKind::AppleHealth,
            "samples.sleep_hours",
            quantity(480.0, "min"),
            MetricKind::SleepHours,
            8.0,
        ),
        (
            VendorKind::AppleHealth,
            "samples.distance",
            quantity(3.0, "KM"),
            MetricKind::Distance,
            3000.0,
        ),
        (
            VendorKind::AppleHealth,
            "samples.heart_rate",
            RawValue::number(62.0),
            MetricKind::HeartRate,
            62.0,
        ),
    ];

    for (vendor, field, value, metric, expected) in cases {
        let record = map_one(vendor, field, value);
        assert_eq!(record.metric, metric, "{vendor} {field}");
        assert_eq!(record.unit, metric.canonical_unit());
        assert_eq!(record.subject_id, "member-1");
        assert_eq!(record.source_connection_id, CONNECTION);
        assert_close(scalar(&record), expected);
    }
}

#[test]
fn test_steps_derive_exercise_minutes() {
    for (vendor, field) in [
        (VendorKind::Fitbit, "activities.summary.steps"),
        (VendorKind::Garmin, "dailies.steps"),
        (VendorKind::Withings, "activity.steps"),
    ] {
        let raw = point(vendor, field, RawValue::number(8000.0));
        let records = map(vendor, &raw, context()).unwrap();
        assert_eq!(records.len(), 2, "{vendor}");
        assert_eq!(records[0].metric, MetricKind::Steps);
        assert_eq!(records[0].unit, CanonicalUnit::Count);
        assert_close(scalar(&records[0]), 8000.0);
        assert_eq!(records[1].metric, MetricKind::ExerciseMinutes);
        assert_eq!(records[1].unit, CanonicalUnit::Minutes);
        assert_close(scalar(&records[1]), 400.0);
        assert_ne!(records[0].fingerprint, records[1].fingerprint);
    }
}

#[test]
fn test_few_steps_yield_no_exercise_estimate() {
    let records = map(
        VendorKind::AppleHealth,
        &point(VendorKind::AppleHealth, "samples.steps", quantity(12.0, "count")),
        context(),
    )
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metric, MetricKind::Steps);
}

#[test]
fn test_blood_pressure_pair() {
    let record = map_one(
        VendorKind::Withings,
        "measure.blood_pressure",
        RawValue::Pair {
            first: 121.0,
            second: 79.0,
        },
    );
    assert_eq!(record.metric, MetricKind::BloodPressure);
    assert_eq!(record.unit, CanonicalUnit::MillimetersOfMercury);
    assert_eq!(
        record.value,
        MetricValue::BloodPressure {
            systolic: 121.0,
            diastolic: 79.0
        }
    );

    let inverted = map(
        VendorKind::Withings,
        &point(
            VendorKind::Withings,
            "measure.blood_pressure",
            RawValue::Pair {
                first: 79.0,
                second: 121.0,
            },
        ),
        context(),
    );
    assert!(matches!(inverted, Err(MappingError::InvalidValue { .. })));
}

#[test]
fn test_zero_cumulative_values_are_no_data() {
    for (vendor, field) in [
        (VendorKind::Fitbit, "activities.summary.steps"),
        (VendorKind::Garmin, "sleeps.durationInSeconds"),
        (VendorKind::Withings, "activity.distance"),
    ] {
        let raw = point(vendor, field, RawValue::number(0.0));
        let records = map(vendor, &raw, context()).unwrap();
        assert!(records.is_empty(), "{vendor} {field}");
    }
}

#[test]
fn test_rejected_points() {
    let unknown = map(
        VendorKind::Fitbit,
        &point(VendorKind::Fitbit, "activities.summary.floors", RawValue::number(3.0)),
        context(),
    );
    assert_eq!(
        unknown,
        Err(MappingError::UnknownField {
            field: "activities.summary.floors".to_owned()
        })
    );

    let wrong_shape = map(
        VendorKind::Fitbit,
        &point(
            VendorKind::Fitbit,
            "activities.summary.steps",
            RawValue::Pair {
                first: 1.0,
                second: 2.0,
            },
        ),
        context(),
    );
    assert!(matches!(wrong_shape, Err(MappingError::UnexpectedShape { .. })));

    let unit = map(
        VendorKind::AppleHealth,
        &point(VendorKind::AppleHealth, "samples.weight", quantity(11.0, "stone")),
        context(),
    );
    assert!(matches!(unit, Err(MappingError::UnknownUnit { unit, .. }) if unit == "stone"));

    let zero_heart_rate = map(
        VendorKind::Garmin,
        &point(
            VendorKind::Garmin,
            "dailies.restingHeartRateInBeatsPerMinute",
            RawValue::number(0.0),
        ),
        context(),
    );
    assert!(matches!(zero_heart_rate, Err(MappingError::InvalidValue { .. })));

    let not_finite = map(
        VendorKind::Fitbit,
        &point(VendorKind::Fitbit, "body.weight", RawValue::number(f64::NAN)),
        context(),
    );
    assert!(matches!(not_finite, Err(MappingError::InvalidValue { .. })));
}

#[test]
fn test_mapping_is_deterministic() {
    let raw = point(
        VendorKind::Fitbit,
        "activities.summary.steps",
        RawValue::number(9123.0),
    );
    let first = map(VendorKind::Fitbit, &raw, context()).unwrap();
    let second = map(VendorKind::Fitbit, &raw, context()).unwrap();
    assert_eq!(first, second);

    let other_connection = MappingContext {
        connection_id: Uuid::from_u128(0xbeef),
        ..context()
    };
    let elsewhere = map(VendorKind::Fitbit, &raw, other_connection).unwrap();
    assert_ne!(first[0].fingerprint, elsewhere[0].fingerprint);
}

#[test]
fn test_every_table_row_maps_a_positive_sample() {
    for vendor in [
        VendorKind::Fitbit,
        VendorKind::Garmin,
        VendorKind::Withings,
        VendorKind::AppleHealth,
    ] {
        for rule in field_table(vendor) {
            let value = if rule.metric == MetricKind::BloodPressure {
                RawValue::Pair {
                    first: 118.0,
                    second: 76.0,
                }
            } else {
                RawValue::number(70.0)
            };
            let records = map(vendor, &point(vendor, rule.source, value), context()).unwrap();
            assert!(!records.is_empty(), "{vendor} {}", rule.source);
            assert_eq!(records[0].metric, rule.metric);
        }
    }
}
