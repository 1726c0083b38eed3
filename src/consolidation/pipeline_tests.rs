//! Pipeline tests: partition, absence, cancellation, fingerprints and sinks.

use crate::consolidation::config::{CheckId, ValidatedConfig};
use crate::consolidation::keys::SourceKind;
use crate::consolidation::pipeline::{
    Pipeline, RunAborted, RunCancellation, RunInput, RunStage, SourceDelivery,
};
use crate::consolidation::raw::RawEnvelope;
use crate::consolidation::sink::{GameSink, JsonReportSink, SqliteSink};
use crate::consolidation::test_support::*;
use serde_json::json;

fn boxscores() -> Vec<RawEnvelope> {
    vec![
        envelope(
            SourceKind::Boxscore,
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                   "home_score": 102, "away_score": 98, "winner": "home",
                   "home_stats": {"PTS": 102}, "away_stats": {"PTS": 98}}),
            at(0),
        ),
        envelope(
            SourceKind::Boxscore,
            json!({"date": "2024-01-16", "home_team": "NYK", "away_team": "MIA",
                   "home_score": 95, "away_score": 104, "winner": "MIA"}),
            at(0),
        ),
    ]
}

fn schedules() -> Vec<RawEnvelope> {
    vec![
        envelope(
            SourceKind::Schedule,
            json!({"game_id": "1", "date": "2024-01-15", "home_team": "Los Angeles Lakers",
                   "away_team": "Boston Celtics", "status": "final"}),
            at(-60),
        ),
        envelope(
            SourceKind::Schedule,
            json!({"game_id": "2", "date": "2024-01-16", "home_team": "NYK", "away_team": "MIA",
                   "status": "final"}),
            at(-60),
        ),
    ]
}

fn team_stats() -> Vec<RawEnvelope> {
    vec![envelope(
        SourceKind::TeamStats,
        json!({"date": "2024-01-16", "home_team": "NYK", "away_team": "MIA",
               "side": "away", "team": "Miami Heatwave", "PPG": 110.4}),
        at(-30),
    )]
}

fn full_input() -> RunInput {
    RunInput::new()
        .deliver(SourceKind::Boxscore, boxscores())
        .deliver(SourceKind::Schedule, schedules())
        .deliver(SourceKind::TeamStats, team_stats())
        .absent(SourceKind::Odds, "timed out after 30s")
}

fn run(input: RunInput) -> crate::consolidation::pipeline::RunReport {
    Pipeline::new(ValidatedConfig::default())
        .run(input, &RunCancellation::new())
        .unwrap()
}

// =============================================================================
// PARTITION
// =============================================================================

#[test]
fn test_every_game_lands_in_exactly_one_partition() {
    let report = run(full_input());

    assert_eq!(report.game_count(), 2);
    assert_eq!(report.accepted.len() + report.flagged.len(), report.game_count());
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(*report.accepted[0].game_key(), lal_bos());

    // "Miami Heatwave" is not a team
    assert_eq!(report.flagged.len(), 1);
    let flagged = &report.flagged[0];
    assert_eq!(*flagged.game.game_key(), nyk_mia());
    assert!(flagged
        .violations
        .iter()
        .any(|v| v.check == CheckId::Referential && v.field.as_deref() == Some("away_stats_team")));
    assert!(!report.is_clean());

    assert_eq!(report.counters.accepted, 1);
    assert_eq!(report.counters.flagged, 1);
    assert_eq!(report.counters.normalization.total_normalized(), 5);
}

#[test]
fn test_absent_sources_are_reported_not_fatal() {
    let report = run(full_input());
    let absent: Vec<_> = report
        .absent_sources
        .iter()
        .map(|a| (a.source, a.reason.as_str()))
        .collect();
    assert_eq!(
        absent,
        vec![
            (SourceKind::Standings, "not delivered"),
            (SourceKind::Injuries, "not delivered"),
            (SourceKind::Odds, "timed out after 30s"),
        ]
    );
    assert_eq!(report.counters.absent_sources, 3);
}

#[test]
fn test_boxscore_only_run_consolidates_and_flags_incompleteness() {
    let report = run(RunInput::new().deliver(SourceKind::Boxscore, boxscores()));
    assert_eq!(report.game_count(), 2);
    assert!(report.accepted.is_empty());
    for flagged in &report.flagged {
        assert_eq!(
            flagged.game.completeness().iter().copied().collect::<Vec<_>>(),
            vec![SourceKind::Boxscore]
        );
        assert!(flagged.violations.iter().any(|v| v.check == CheckId::Completeness));
    }
}

#[test]
fn test_empty_delivery_is_absence() {
    let delivery = SourceDelivery::from_records(SourceKind::Odds, Vec::new());
    assert!(matches!(delivery, SourceDelivery::Absent { source: SourceKind::Odds, .. }));
    let report = run(RunInput::new());
    assert_eq!(report.game_count(), 0);
    assert_eq!(report.absent_sources.len(), 6);
}

// =============================================================================
// CANCELLATION & IDEMPOTENCE
// =============================================================================

#[test]
fn test_cancelled_run_discards_input() {
    let cancel = RunCancellation::new();
    cancel.cancel();
    let result = Pipeline::new(ValidatedConfig::default()).run(full_input(), &cancel);
    assert_eq!(
        result,
        Err(RunAborted::Cancelled {
            stage: RunStage::BeforeConsolidation
        })
    );
}

#[test]
fn test_rerun_yields_same_partition_and_fingerprint() {
    let first = run(full_input());
    let second = run(full_input());
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.fingerprint.as_str().len(), 64);
    assert_eq!(first.outcomes, second.outcomes);

    // Delivery order and record order inside a delivery do not matter either
    let mut reversed_boxscores = boxscores();
    reversed_boxscores.reverse();
    let shuffled = RunInput::new()
        .absent(SourceKind::Odds, "timed out after 30s")
        .deliver(SourceKind::TeamStats, team_stats())
        .deliver(SourceKind::Schedule, schedules())
        .deliver(SourceKind::Boxscore, reversed_boxscores);
    assert_eq!(run(shuffled).fingerprint, first.fingerprint);
}

#[test]
fn test_fingerprint_changes_with_output() {
    let baseline = run(full_input());
    let without_team_stats = run(
        RunInput::new()
            .deliver(SourceKind::Boxscore, boxscores())
            .deliver(SourceKind::Schedule, schedules()),
    );
    assert_ne!(baseline.fingerprint, without_team_stats.fingerprint);
}

// =============================================================================
// OUT-OF-DOMAIN NUMBERS
// =============================================================================

#[test]
fn test_out_of_range_integers_flag_the_game_field_by_field() {
    let boxscore = vec![
        envelope(
            SourceKind::Boxscore,
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                   "home_score": -40, "away_score": i64::MAX,
                   "home_stats": {"AST": -i64::MAX}, "away_stats": {"AST": 25}}),
            at(0),
        ),
        boxscores().remove(1),
    ];
    let standings = vec![
        envelope(
            SourceKind::Standings,
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                   "side": "home", "Team": "LAL", "W": i64::MAX, "L": -5}),
            at(-10),
        ),
        envelope(
            SourceKind::Standings,
            json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                   "side": "away", "Team": "BOS", "PCT": 7.5, "GB": -3}),
            at(-10),
        ),
    ];
    let report = run(RunInput::new()
        .deliver(SourceKind::Boxscore, boxscore)
        .deliver(SourceKind::Schedule, schedules())
        .deliver(SourceKind::Standings, standings));

    assert_eq!(report.game_count(), 2);
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(*report.accepted[0].game_key(), nyk_mia());

    assert_eq!(report.flagged.len(), 1);
    let flagged = &report.flagged[0];
    assert_eq!(*flagged.game.game_key(), lal_bos());
    let mut out_of_range: Vec<&str> = flagged
        .violations
        .iter()
        .filter(|v| v.check == CheckId::Range)
        .filter_map(|v| v.field.as_deref())
        .collect();
    out_of_range.sort_unstable();
    assert_eq!(
        out_of_range,
        vec![
            "away_games_behind",
            "away_score",
            "away_win_pct",
            "home_ast",
            "home_losses",
            "home_score",
            "home_wins",
        ]
    );
    assert!(report.counters.blocking_violations >= 7);
}

// =============================================================================
// SINKS
// =============================================================================

#[test]
fn test_sqlite_sink_upsert_is_idempotent() {
    let sink = SqliteSink::in_memory().unwrap();
    let report = run(full_input());

    sink.persist(&report).unwrap();
    let accepted = sink.accepted_keys().unwrap();
    let flagged = sink.flagged_keys().unwrap();
    let stored = sink.accepted_game(&lal_bos()).unwrap().unwrap();

    sink.persist(&run(full_input())).unwrap();
    assert_eq!(sink.accepted_keys().unwrap(), accepted);
    assert_eq!(sink.flagged_keys().unwrap(), flagged);
    assert_eq!(sink.accepted_game(&lal_bos()).unwrap().unwrap(), stored);
    assert_eq!(sink.run_count().unwrap(), 2);
    assert_eq!(
        sink.last_fingerprint().unwrap().as_deref(),
        Some(report.fingerprint.as_str())
    );

    assert_eq!(accepted, vec![lal_bos().to_string()]);
    assert_eq!(flagged, vec![nyk_mia().to_string()]);
    assert_eq!(stored["fields"]["home_score"], json!({"int": 102}));
    assert!(sink.flagged_violations(&nyk_mia()).unwrap().is_some());
}

#[test]
fn test_sqlite_sink_moves_games_between_tables() {
    let sink = SqliteSink::in_memory().unwrap();
    sink.persist(&run(full_input())).unwrap();
    assert_eq!(sink.flagged_keys().unwrap(), vec![nyk_mia().to_string()]);

    // The bad team-stats record is gone on the re-scrape, so the game is now accepted
    let fixed = run(
        RunInput::new()
            .deliver(SourceKind::Boxscore, boxscores())
            .deliver(SourceKind::Schedule, schedules()),
    );
    sink.persist(&fixed).unwrap();
    assert!(sink.flagged_keys().unwrap().is_empty());
    assert_eq!(
        sink.accepted_keys().unwrap(),
        vec![lal_bos().to_string(), nyk_mia().to_string()]
    );
    assert!(sink.flagged_violations(&nyk_mia()).unwrap().is_none());
}

#[test]
fn test_json_report_sink_writes_report() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("reports").join("run.json");
    let sink = JsonReportSink::new(&path);
    let report = run(full_input());
    let summary = sink.persist(&report).unwrap();
    assert_eq!(summary.accepted_written, 1);
    assert_eq!(summary.flagged_written, 1);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["fingerprint"], json!(report.fingerprint.as_str()));
    assert_eq!(written["accepted"][0]["game_key"], json!("2023-24/2024-01-15/BOS@LAL"));
    assert_eq!(written["flagged"][0]["violations"][0]["check"], json!("referential"));
}
