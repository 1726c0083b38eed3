//! Normalizer tests: key derivation across sources, field mapping and drop reasons.

use crate::consolidation::config::{PipelineConfig, ValidatedConfig};
use crate::consolidation::fields::FieldValue;
use crate::consolidation::keys::{Season, SourceKind, TeamKey, TeamRef};
use crate::consolidation::normalize::{NormalizationErrorKind, NormalizationStats, Normalizer};
use crate::consolidation::test_support::*;
use serde_json::json;

fn config() -> ValidatedConfig {
    ValidatedConfig::default()
}

// =============================================================================
// KEY DERIVATION
// =============================================================================

#[test]
fn test_every_source_derives_the_same_key() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let inputs = [
        (
            SourceKind::Schedule,
            json!({"game_id": 401584773, "date": "2024-01-15", "home_team": "LAL", "away_team": "BOS"}),
        ),
        (
            SourceKind::Boxscore,
            json!({"fecha": "20240115", "home_team": "Los Angeles Lakers", "away_team": "Boston Celtics"}),
        ),
        (
            SourceKind::TeamStats,
            json!({"game_date": "01/15/2024", "home_team": "lal", "away_team": "bos",
                   "side": "home", "team": "LAL", "PPG": 117.2}),
        ),
        (
            SourceKind::Standings,
            json!({"date": "2024-01-15", "season": "2023-24", "home_team": "LAL", "away_team": "BOS",
                   "side": "away", "team": "Boston Celtics", "W": 32, "L": 8, "PCT": ".800", "GB": "-"}),
        ),
        (
            SourceKind::Injuries,
            json!({"date": "2024-01-15", "season": 2024, "home_team": "LAL", "away_team": "BOS",
                   "side": "home", "team": "LAL", "entries": []}),
        ),
        (
            SourceKind::Odds,
            // 7:30pm Eastern tip-off, already the next day in UTC
            json!({"commence_time": "2024-01-16T00:30:00Z", "home_team": "Los Angeles Lakers",
                   "away_team": "Boston Celtics", "moneyline_home": "-150", "moneyline_away": "+130"}),
        ),
    ];

    for (source, value) in inputs {
        let record = normalizer
            .normalize(&raw(source, value), source, at(0))
            .unwrap_or_else(|e| panic!("{} failed: {}", source, e));
        assert_eq!(record.game_key, lal_bos(), "{}", source);
        assert_eq!(record.source, source);
        assert_eq!(record.observed_at, at(0));
    }
}

#[test]
fn test_season_is_derived_from_date_when_missing() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let record = normalizer
        .normalize(
            &raw(
                SourceKind::Schedule,
                json!({"date": "2023-10-24", "home_team": "DEN", "away_team": "LAL"}),
            ),
            SourceKind::Schedule,
            at(0),
        )
        .unwrap();
    assert_eq!(record.game_key.season, Season::new(2023));
    assert_eq!(record.game_key.home, TeamKey::Den);
}

#[test]
fn test_source_aliases_from_config() {
    let mut file = PipelineConfig::default();
    file.teams
        .aliases
        .entry("odds".to_string())
        .or_default()
        .insert("LA Lakers".to_string(), "LAL".to_string());
    let config = file.validate().unwrap();
    let normalizer = Normalizer::new(&config);

    let value = json!({"date": "2024-01-15", "home_team": "LA Lakers", "away_team": "BOS"});
    assert!(normalizer
        .normalize(&raw(SourceKind::Odds, value.clone()), SourceKind::Odds, at(0))
        .is_ok());
    let err = normalizer
        .normalize(&raw(SourceKind::Schedule, value), SourceKind::Schedule, at(0))
        .unwrap_err();
    assert_eq!(err.kind, NormalizationErrorKind::UnmappableTeam);
}

// =============================================================================
// DROP REASONS
// =============================================================================

#[test]
fn test_unkeyable_records_are_dropped_with_a_reason() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let cases = [
        (
            json!({"home_team": "LAL", "away_team": "BOS"}),
            NormalizationErrorKind::MissingDate,
        ),
        (
            json!({"date": "next tuesday", "home_team": "LAL", "away_team": "BOS"}),
            NormalizationErrorKind::MalformedDate,
        ),
        (
            json!({"date": "2024-01-15", "home_team": "LAL"}),
            NormalizationErrorKind::MissingTeams,
        ),
        (
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "  "}),
            NormalizationErrorKind::MissingTeams,
        ),
        (
            json!({"date": "2024-01-15", "home_team": "Seattle SuperSonics", "away_team": "BOS"}),
            NormalizationErrorKind::UnmappableTeam,
        ),
        (
            json!({"date": "2024-01-15", "season": "2023-25", "home_team": "LAL", "away_team": "BOS"}),
            NormalizationErrorKind::MalformedSeason,
        ),
    ];
    for (value, expected) in cases {
        let err = normalizer
            .normalize(&raw(SourceKind::Schedule, value.clone()), SourceKind::Schedule, at(0))
            .unwrap_err();
        assert_eq!(err.kind, expected, "{}", value);
        assert_eq!(err.source, SourceKind::Schedule);
    }
}

#[test]
fn test_payload_must_match_declared_source() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let odds = raw(
        SourceKind::Odds,
        json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS"}),
    );
    let err = normalizer
        .normalize(&odds, SourceKind::Boxscore, at(0))
        .unwrap_err();
    assert_eq!(err.kind, NormalizationErrorKind::SourceMismatch);
}

#[test]
fn test_delivery_stats_count_drops_per_kind() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let envelopes = vec![
        envelope(
            SourceKind::Boxscore,
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS", "home_score": "abc"}),
            at(0),
        ),
        envelope(
            SourceKind::Boxscore,
            json!({"home_team": "LAL", "away_team": "BOS"}),
            at(0),
        ),
        envelope(
            SourceKind::Boxscore,
            json!({"date": "2024-01-15", "home_team": "XXX", "away_team": "BOS"}),
            at(0),
        ),
    ];
    let mut stats = NormalizationStats::default();
    let records = normalizer.normalize_delivery(SourceKind::Boxscore, &envelopes, &mut stats);

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rejected_fields, vec!["home_score".to_string()]);
    assert_eq!(stats.total_received(), 3);
    assert_eq!(stats.total_normalized(), 1);
    assert_eq!(stats.total_dropped(), 2);
    assert_eq!(stats.dropped_by_kind[&NormalizationErrorKind::MissingDate], 1);
    assert_eq!(stats.dropped_by_kind[&NormalizationErrorKind::UnmappableTeam], 1);
    assert_eq!(stats.rejected_fields, 1);
    assert!(stats.summary().contains("dropped=2"));
}

// =============================================================================
// FIELD MAPPING
// =============================================================================

#[test]
fn test_boxscore_fields_and_winner_by_team() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let record = normalizer
        .normalize(
            &raw(
                SourceKind::Boxscore,
                json!({
                    "date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                    "home_score": 102, "away_score": 98, "winner": "Los Angeles Lakers",
                    "home_stats": {"FG%": "48.2", "3P%": 36.1, "REB": 44, "TO": 12, "PTS": 102},
                    "away_stats": {"FG%": 45.0, "AST": 25, "PTS": 98.0}
                }),
            ),
            SourceKind::Boxscore,
            at(0),
        )
        .unwrap();

    let f = &record.fields;
    assert_eq!(f["winner"], FieldValue::Text("home".to_string()));
    assert_eq!(f["home_fg_pct"], FieldValue::Float(48.2));
    assert_eq!(f["home_3p_pct"], FieldValue::Float(36.1));
    assert_eq!(f["home_reb"], FieldValue::Int(44));
    assert_eq!(f["home_to"], FieldValue::Int(12));
    assert_eq!(f["away_pts"], FieldValue::Int(98));
    assert!(!f.contains_key("away_reb"));
    assert!(record.team.is_none());
}

#[test]
fn test_winner_outside_the_game_is_kept_as_team() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let record = normalizer
        .normalize(
            &raw(
                SourceKind::Schedule,
                json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS", "winner": "MIA"}),
            ),
            SourceKind::Schedule,
            at(0),
        )
        .unwrap();
    assert_eq!(
        record.fields["winner"],
        FieldValue::Team(TeamRef::Known(TeamKey::Mia))
    );
}

#[test]
fn test_unknown_subject_team_is_kept_unresolved() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let record = normalizer
        .normalize(
            &raw(
                SourceKind::TeamStats,
                json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                       "side": "away", "team": "Seattle SuperSonics", "FG%": 47.1}),
            ),
            SourceKind::TeamStats,
            at(0),
        )
        .unwrap();
    let unresolved = TeamRef::Unresolved("Seattle SuperSonics".to_string());
    assert_eq!(record.team, Some(unresolved.clone()));
    assert_eq!(record.fields["away_stats_team"], FieldValue::Team(unresolved));
    assert_eq!(record.fields["away_avg_fg_pct"], FieldValue::Float(47.1));
}

#[test]
fn test_standings_and_injuries_fields() {
    let config = config();
    let normalizer = Normalizer::new(&config);

    let standings = normalizer
        .normalize(
            &raw(
                SourceKind::Standings,
                json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                       "side": "home", "team": "LAL", "W": "21", "L": 20, "PCT": 0.512, "GB": "9.5"}),
            ),
            SourceKind::Standings,
            at(0),
        )
        .unwrap();
    assert_eq!(standings.fields["home_wins"], FieldValue::Int(21));
    assert_eq!(standings.fields["home_games_behind"], FieldValue::Float(9.5));
    assert_eq!(
        standings.fields["home_standings_team"],
        FieldValue::Team(TeamRef::Known(TeamKey::Lal))
    );

    let injuries = normalizer
        .normalize(
            &raw(
                SourceKind::Injuries,
                json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                       "side": "away", "team": "BOS", "entries": [
                           {"player": "A", "status": "Out"},
                           {"player": "B", "status": "Day-To-Day"},
                           {"player": "C", "status": "Doubtful"},
                           {"player": "D", "status": "Out (knee)"},
                           {"player": "E"}
                       ]}),
            ),
            SourceKind::Injuries,
            at(0),
        )
        .unwrap();
    let f = &injuries.fields;
    assert_eq!(f["away_injuries_out"], FieldValue::Int(2));
    assert_eq!(f["away_injuries_doubtful"], FieldValue::Int(1));
    assert_eq!(f["away_injuries_day_to_day"], FieldValue::Int(1));
    assert_eq!(f["away_injuries_reported"], FieldValue::Int(5));
}

#[test]
fn test_odds_fields_parse_signed_text() {
    let config = config();
    let normalizer = Normalizer::new(&config);
    let record = normalizer
        .normalize(
            &raw(
                SourceKind::Odds,
                json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                       "bookmaker": "draftkings", "moneyline_home": "-150", "moneyline_away": "+130",
                       "spread_home": "-3.5", "total": 229.5, "home_win_prob": "NaN"}),
            ),
            SourceKind::Odds,
            at(0),
        )
        .unwrap();
    let f = &record.fields;
    assert_eq!(f["moneyline_home"], FieldValue::Int(-150));
    assert_eq!(f["moneyline_away"], FieldValue::Int(130));
    assert_eq!(f["spread_home"], FieldValue::Float(-3.5));
    assert_eq!(f["over_under"], FieldValue::Float(229.5));
    assert_eq!(f["bookmaker"], FieldValue::Text("draftkings".to_string()));
    assert!(!f.contains_key("home_win_prob"));
    assert_eq!(record.rejected_fields, vec!["home_win_prob".to_string()]);
}
