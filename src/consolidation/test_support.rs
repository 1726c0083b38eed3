//! Shared fixtures for the consolidation test modules.

use crate::consolidation::fields::{FieldName, FieldValue};
use crate::consolidation::keys::{GameKey, Season, SourceKind, TeamKey};
use crate::consolidation::normalize::NormalizedRecord;
use crate::consolidation::raw::{RawEnvelope, RawRecord};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;

/// 2024-01-15 12:00 UTC plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// BOS at LAL, 2024-01-15.
pub fn lal_bos() -> GameKey {
    GameKey::derive(Season::new(2023), date(2024, 1, 15), TeamKey::Lal, TeamKey::Bos)
}

/// MIA at NYK, 2024-01-16.
pub fn nyk_mia() -> GameKey {
    GameKey::derive(Season::new(2023), date(2024, 1, 16), TeamKey::Nyk, TeamKey::Mia)
}

pub fn int(v: i64) -> FieldValue {
    FieldValue::Int(v)
}

pub fn float(v: f64) -> FieldValue {
    FieldValue::Float(v)
}

pub fn text(v: &str) -> FieldValue {
    FieldValue::Text(v.to_string())
}

pub fn record(
    source: SourceKind,
    game_key: GameKey,
    fields: &[(&str, FieldValue)],
    observed_at: DateTime<Utc>,
) -> NormalizedRecord {
    let fields: BTreeMap<FieldName, FieldValue> = fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    NormalizedRecord {
        source,
        game_key,
        team: None,
        fields,
        observed_at,
        rejected_fields: Vec::new(),
    }
}

pub fn raw(source: SourceKind, value: serde_json::Value) -> RawRecord {
    RawRecord::from_json(source, value).unwrap()
}

pub fn envelope(source: SourceKind, value: serde_json::Value, observed_at: DateTime<Utc>) -> RawEnvelope {
    RawEnvelope::new(raw(source, value), observed_at)
}
