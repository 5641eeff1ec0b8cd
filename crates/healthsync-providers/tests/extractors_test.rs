// ABOUTME: Fixture tests for vendor response extractors and pushed payload parsing
// ABOUTME: Covers field naming, timestamp handling, and tolerance of malformed records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used, clippy::float_cmp)]

use chrono::{NaiveDate, TimeZone, Utc};
use healthsync_providers::errors::ProviderError;
use healthsync_providers::models::RawValue;
use healthsync_providers::{
    create_adapter, fitbit, garmin, withings, VendorAdapter, VendorClientConfig, VendorKind,
};
use std::sync::Arc;
use serde_json::json;

fn adapter(kind: VendorKind) -> Arc<dyn VendorAdapter> {
    create_adapter(kind, VendorClientConfig::default())
}

#[test]
fn test_fitbit_activity_summary_fields() {
    let day = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
    let body = json!({
        "summary": {
            "steps": 8012,
            "caloriesOut": 2310,
            "distances": [
                {"activity": "tracker", "distance": 5.1},
                {"activity": "total", "distance": 5.9}
            ]
        }
    });

    let batch = fitbit::extract_activity_summary(day, &body);
    let fields: Vec<&str> = batch.points.iter().map(|p| p.field.as_str()).collect();
    assert_eq!(
        fields,
        vec![
            "activities.summary.steps",
            "activities.summary.caloriesOut",
            "activities.summary.distance"
        ]
    );
    assert_eq!(batch.points[2].value, RawValue::number(5.9));
    assert_eq!(
        batch.points[0].observed_at,
        Utc.with_ymd_and_hms(2025, 1, 4, 0, 0, 0).unwrap()
    );
    assert_eq!(batch.skipped, 0);
}

#[test]
fn test_fitbit_weight_log_skips_bad_entries() {
    let body = json!({
        "weight": [
            {"date": "2025-01-04", "time": "07:30:00", "weight": 72.4},
            {"date": "2025-01-04", "time": "19:00:00", "weight": "heavy"},
            {"time": "08:00:00", "weight": 72.0}
        ]
    });

    let batch = fitbit::extract_weight(&body);
    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.skipped, 2);
    assert_eq!(
        batch.points[0].observed_at,
        Utc.with_ymd_and_hms(2025, 1, 4, 7, 30, 0).unwrap()
    );
}

#[test]
fn test_fitbit_heart_without_resting_rate_is_empty() {
    let body = json!({
        "activities-heart": [{"dateTime": "2025-01-04", "value": {"heartRateZones": []}}]
    });
    let batch = fitbit::extract_heart(&body);
    assert!(batch.points.is_empty());
    assert_eq!(batch.skipped, 0);
}

#[test]
fn test_garmin_dailies_use_start_time() {
    let entries = vec![json!({
        "calendarDate": "2025-01-04",
        "startTimeInSeconds": 1_735_948_800,
        "steps": 10_250,
        "distanceInMeters": 7600.5,
        "activeKilocalories": 512,
        "restingHeartRateInBeatsPerMinute": 58
    })];

    let batch = garmin::extract_dailies(&entries);
    assert_eq!(batch.points.len(), 4);
    assert!(batch
        .points
        .iter()
        .all(|p| p.observed_at == Utc.timestamp_opt(1_735_948_800, 0).unwrap()));
}

#[test]
fn test_garmin_push_notification_parses() {
    let payload = json!({
        "sleeps": [
            {"calendarDate": "2025-01-04", "durationInSeconds": 27_000},
            {"calendarDate": "2025-01-05", "durationInSeconds": "long"}
        ]
    });
    let batch = adapter(VendorKind::Garmin)
        .parse(payload.to_string().as_bytes())
        .unwrap();
    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.points[0].field, "sleeps.durationInSeconds");
    assert_eq!(batch.skipped, 1);
}

#[test]
fn test_garmin_unknown_notification_is_malformed() {
    let result = adapter(VendorKind::Garmin).parse(br#"{"activities": []}"#);
    assert!(matches!(result, Err(ProviderError::MalformedPayload { .. })));
}

#[test]
fn test_withings_weight_keeps_exponent() {
    let body = json!({
        "measuregrps": [{
            "date": 1_736_000_000,
            "measures": [{"type": 1, "value": 72_450, "unit": -3}]
        }]
    });
    let batch = withings::extract_measures(&body);
    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.points[0].field, "measure.weight");
    assert_eq!(
        batch.points[0].value,
        RawValue::Scaled {
            value: 72_450,
            exponent: -3
        }
    );
}

#[test]
fn test_withings_activity_and_sleep() {
    let activity = json!({
        "activities": [{"date": "2025-01-04", "steps": 9000, "distance": 6400.0, "calories": 410.5}]
    });
    assert_eq!(withings::extract_activity(&activity).points.len(), 3);

    let sleep = json!({
        "series": [
            {"date": "2025-01-04", "data": {"total_sleep_time": 26_100}},
            {"date": "not-a-date", "data": {"total_sleep_time": 100}}
        ]
    });
    let batch = withings::extract_sleep(&sleep);
    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.points[0].field, "sleep.total_sleep_time");
    assert_eq!(batch.skipped, 1);
}

#[test]
fn test_apple_health_batch_with_one_bad_sample() {
    let payload = json!({
        "samples": [
            {"type": "steps", "value": 1200, "start": "2025-01-04T10:00:00Z"},
            {"type": "heart_rate", "value": "fast", "start": "2025-01-04T10:00:00Z"},
            {
                "type": "blood_pressure",
                "systolic": 121,
                "diastolic": 79,
                "start": "2025-01-04T10:05:00Z"
            }
        ]
    });
    let batch = adapter(VendorKind::AppleHealth)
        .parse(payload.to_string().as_bytes())
        .unwrap();
    assert_eq!(batch.points.len(), 2);
    assert_eq!(batch.skipped, 1);
    assert_eq!(
        batch.points[1].value,
        RawValue::Pair {
            first: 121.0,
            second: 79.0
        }
    );
}

#[test]
fn test_apple_health_single_sample_object() {
    let payload =
        br#"{"type": "weight", "value": 160, "unit": "lb", "date": "2025-01-04T07:00:00Z"}"#;
    let batch = adapter(VendorKind::AppleHealth).parse(payload).unwrap();
    assert_eq!(batch.points.len(), 1);
    assert_eq!(batch.points[0].field, "samples.weight");
}

#[test]
fn test_apple_health_rejects_garbage() {
    let adapter = adapter(VendorKind::AppleHealth);
    assert!(matches!(
        adapter.parse(b"not json"),
        Err(ProviderError::MalformedPayload { .. })
    ));
    assert!(matches!(
        adapter.parse(br#"{"samples": [{"type": "steps"}]}"#),
        Err(ProviderError::MalformedPayload { .. })
    ));
    assert!(matches!(
        adapter.parse(br#"{"unexpected": true}"#),
        Err(ProviderError::MalformedPayload { .. })
    ));
}

#[test]
fn test_pull_only_vendor_rejects_pushed_payload() {
    let result = adapter(VendorKind::Fitbit).parse(b"{}");
    assert!(matches!(result, Err(ProviderError::UnsupportedFeature { .. })));
}
