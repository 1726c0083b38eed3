//! Derived Variables
//!
//! Feature variables computed from a game's merged fields once folding is done. Each
//! variable is produced only when all of its inputs are present. They are kept apart from
//! the merged fields so that provenance only ever names real sources.
//!
//! Integer inputs come straight from source payloads and may sit anywhere in `i64`.
//! Sums and differences that would overflow fall back to `Float`; the range check
//! flags the out-of-domain inputs themselves.

use crate::consolidation::fields::{names, FieldName, FieldValue};
use std::collections::BTreeMap;

/// `a - b` over two numeric fields.
fn diff(fields: &BTreeMap<FieldName, FieldValue>, a: &str, b: &str) -> Option<FieldValue> {
    let a = fields.get(a)?;
    let b = fields.get(b)?;
    if let (FieldValue::Int(x), FieldValue::Int(y)) = (a, b) {
        if let Some(d) = x.checked_sub(*y) {
            return Some(FieldValue::Int(d));
        }
    }
    Some(FieldValue::Float(a.as_f64()? - b.as_f64()?))
}

pub fn derive_variables(
    fields: &BTreeMap<FieldName, FieldValue>,
) -> BTreeMap<FieldName, FieldValue> {
    let mut derived = BTreeMap::new();
    let num = |name: &str| fields.get(name).and_then(FieldValue::as_f64);

    if let (Some(home), Some(away)) = (num(names::HOME_SCORE), num(names::AWAY_SCORE)) {
        derived.insert(names::HOME_WIN.to_string(), FieldValue::Flag(home > away));
        let total = match (fields.get(names::HOME_SCORE), fields.get(names::AWAY_SCORE)) {
            (Some(FieldValue::Int(h)), Some(FieldValue::Int(a))) => h
                .checked_add(*a)
                .map_or(FieldValue::Float(home + away), FieldValue::Int),
            _ => FieldValue::Float(home + away),
        };
        derived.insert(names::TOTAL_POINTS.to_string(), total);
    }

    let pairs: [(&str, &str, &str); 4] = [
        (names::POINT_DIFF, names::HOME_SCORE, names::AWAY_SCORE),
        (names::REB_DIFF, "home_reb", "away_reb"),
        (names::AST_DIFF, "home_ast", "away_ast"),
        // More away turnovers is good for the home side.
        (names::TOV_DIFF, "away_to", "home_to"),
    ];
    for (name, a, b) in pairs {
        if let Some(value) = diff(fields, a, b) {
            derived.insert(name.to_string(), value);
        }
    }

    if let (Some(fg_h), Some(fg_a), Some(tp_h), Some(tp_a)) = (
        num("home_fg_pct"),
        num("away_fg_pct"),
        num("home_3p_pct"),
        num("away_3p_pct"),
    ) {
        derived.insert(
            names::NET_RATING_DIFF.to_string(),
            FieldValue::Float((fg_h - fg_a) + (tp_h - tp_a)),
        );
    }

    derived
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, FieldValue)]) -> BTreeMap<FieldName, FieldValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_score_variables() {
        let derived = derive_variables(&fields(&[
            ("home_score", FieldValue::Int(102)),
            ("away_score", FieldValue::Int(98)),
        ]));
        assert_eq!(derived.get("home_win"), Some(&FieldValue::Flag(true)));
        assert_eq!(derived.get("point_diff"), Some(&FieldValue::Int(4)));
        assert_eq!(derived.get("total_points"), Some(&FieldValue::Int(200)));
        assert!(!derived.contains_key("reb_diff"));
    }

    #[test]
    fn test_boxscore_variables_need_both_sides() {
        let derived = derive_variables(&fields(&[
            ("home_to", FieldValue::Int(11)),
            ("away_to", FieldValue::Int(15)),
            ("home_reb", FieldValue::Int(44)),
            ("home_fg_pct", FieldValue::Float(48.0)),
            ("away_fg_pct", FieldValue::Float(45.0)),
            ("home_3p_pct", FieldValue::Float(36.0)),
            ("away_3p_pct", FieldValue::Float(38.0)),
        ]));
        assert_eq!(derived.get("tov_diff"), Some(&FieldValue::Int(4)));
        assert!(!derived.contains_key("reb_diff"));
        assert_eq!(derived.get("net_rating_diff"), Some(&FieldValue::Float(1.0)));
        assert!(!derived.contains_key("home_win"));
    }

    #[test]
    fn test_overflowing_integers_fall_back_to_float() {
        let derived = derive_variables(&fields(&[
            ("home_score", FieldValue::Int(i64::MAX)),
            ("away_score", FieldValue::Int(1)),
            ("home_reb", FieldValue::Int(-i64::MAX)),
            ("away_reb", FieldValue::Int(10)),
        ]));
        assert_eq!(
            derived.get("total_points"),
            Some(&FieldValue::Float(i64::MAX as f64 + 1.0))
        );
        assert_eq!(derived.get("point_diff"), Some(&FieldValue::Int(i64::MAX - 1)));
        assert_eq!(
            derived.get("reb_diff"),
            Some(&FieldValue::Float(-(i64::MAX as f64) - 10.0))
        );
        assert_eq!(derived.get("home_win"), Some(&FieldValue::Flag(true)));
    }
}
