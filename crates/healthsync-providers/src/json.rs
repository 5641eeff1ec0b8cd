// ABOUTME: Small JSON and calendar helpers shared by the vendor extractors
// ABOUTME: Distinguishes absent fields from present-but-invalid ones so skips are counted correctly
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{RawDataPoint, RawValue, TimeRange, VendorKind};
use serde_json::Value;

use crate::adapter::ParsedBatch;

/// Numeric lookup outcome
pub(crate) enum Numeric {
    Absent,
    Present(f64),
    Invalid,
}

/// Read a numeric field, accepting numbers and numeric strings
pub(crate) fn numeric(value: &Value, key: &str) -> Numeric {
    match value.get(key) {
        None | Some(Value::Null) => Numeric::Absent,
        Some(Value::Number(n)) => n.as_f64().map_or(Numeric::Invalid, Numeric::Present),
        Some(Value::String(s)) => s.trim().parse().map_or(Numeric::Invalid, Numeric::Present),
        Some(_) => Numeric::Invalid,
    }
}

/// Push a plain-number point for `key`, counting a skip when the value is unusable
pub(crate) fn push_number(
    batch: &mut ParsedBatch,
    vendor: VendorKind,
    field: &str,
    observed_at: DateTime<Utc>,
    source: &Value,
    key: &str,
) {
    match numeric(source, key) {
        Numeric::Absent => {}
        Numeric::Present(number) => batch.points.push(RawDataPoint::new(
            vendor,
            field,
            observed_at,
            RawValue::number(number),
        )),
        Numeric::Invalid => batch.skip(),
    }
}

/// `YYYY-MM-DD` at midnight UTC
pub(crate) fn parse_day(text: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// RFC 3339 timestamp or unix seconds
pub(crate) fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| parse_day(text)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Calendar days touched by `range`, oldest first
pub(crate) fn days_in(range: TimeRange) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = range.start.date_naive();
    let last = (range.end - Duration::nanoseconds(1)).date_naive();
    while day <= last {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Decode a payload into a JSON value
pub(crate) fn decode(vendor: VendorKind, payload: &[u8]) -> Result<Value, ProviderError> {
    serde_json::from_slice(payload)
        .map_err(|e| ProviderError::malformed(vendor.as_str(), format!("invalid JSON: {e}")))
}
