//! Integrity Validator
//!
//! Runs an ordered battery of [`IntegrityCheck`]s over each consolidated game. Every
//! check runs and every finding is collected; nothing short-circuits. The severity of a
//! check's findings comes from configuration, and a game is accepted iff none of its
//! violations is blocking.
//!
//! Built-in battery, in order:
//! 1. completeness: required sources present
//! 2. range: hard domain bounds per numeric field
//! 3. cross_field: winner vs score, boxscore points vs score, odds sanity
//! 4. referential: team references resolve and match the game; date inside its season
//! 5. plausibility: soft bounds over merged and derived values (advisory by default)

use crate::consolidation::config::{CheckId, RangeTable, Severity, ValidatedConfig};
use crate::consolidation::consolidate::ConsolidatedGame;
use crate::consolidation::fields::{field_side, names, side_field, FieldName, FieldValue};
use crate::consolidation::keys::{GameKey, Side, TeamRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// Tolerance when reported win probabilities are checked against 1.
const WIN_PROB_TOLERANCE: f64 = 0.02;

// =============================================================================
// TYPES
// =============================================================================

/// Something a check found, before severity is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub field: Option<FieldName>,
    pub message: String,
}

impl Finding {
    pub fn on_field(field: impl Into<FieldName>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn on_game(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub check: CheckId,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldName>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Accepted,
    Flagged,
}

/// Terminal result for one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub game_key: GameKey,
    pub status: ValidationStatus,
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        self.status == ValidationStatus::Accepted
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Blocking)
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Advisory)
    }
}

/// One invariant over a consolidated game.
pub trait IntegrityCheck: Send + Sync {
    fn id(&self) -> CheckId;

    fn check(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> Vec<Finding>;
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Ordered check battery. Holds no run state; configuration is passed per call.
pub struct Validator {
    battery: Vec<Box<dyn IntegrityCheck>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Validator with the built-in battery.
    pub fn new() -> Self {
        Self {
            battery: builtin_battery(),
        }
    }

    /// Validator with no checks; everything is accepted until checks are pushed.
    pub fn empty() -> Self {
        Self {
            battery: Vec::new(),
        }
    }

    /// Append a check to the end of the battery.
    pub fn push(&mut self, check: Box<dyn IntegrityCheck>) {
        self.battery.push(check);
    }

    pub fn with_check(mut self, check: Box<dyn IntegrityCheck>) -> Self {
        self.push(check);
        self
    }

    pub fn check_ids(&self) -> Vec<CheckId> {
        self.battery.iter().map(|c| c.id()).collect()
    }

    pub fn validate(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> ValidationOutcome {
        let mut violations = Vec::new();
        for check in &self.battery {
            let id = check.id();
            let severity = config.severity(&id);
            for finding in check.check(game, config) {
                violations.push(Violation {
                    check: id.clone(),
                    severity,
                    field: finding.field,
                    message: finding.message,
                });
            }
        }
        let status = if violations.iter().any(|v| v.severity == Severity::Blocking) {
            ValidationStatus::Flagged
        } else {
            ValidationStatus::Accepted
        };
        ValidationOutcome {
            game_key: *game.game_key(),
            status,
            violations,
        }
    }
}

pub fn builtin_battery() -> Vec<Box<dyn IntegrityCheck>> {
    vec![
        Box::new(CompletenessCheck),
        Box::new(RangeCheck),
        Box::new(CrossFieldCheck),
        Box::new(ReferentialCheck),
        Box::new(PlausibilityCheck),
    ]
}

// =============================================================================
// BUILT-IN CHECKS
// =============================================================================

pub struct CompletenessCheck;

impl IntegrityCheck for CompletenessCheck {
    fn id(&self) -> CheckId {
        CheckId::Completeness
    }

    fn check(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> Vec<Finding> {
        config
            .required_sources()
            .iter()
            .filter(|source| !game.completeness().contains(source))
            .map(|source| Finding::on_game(format!("required source {} is missing", source)))
            .collect()
    }
}

pub struct RangeCheck;

impl IntegrityCheck for RangeCheck {
    fn id(&self) -> CheckId {
        CheckId::Range
    }

    fn check(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> Vec<Finding> {
        out_of_bounds(game.fields(), config.ranges(), "outside")
    }
}

pub struct PlausibilityCheck;

impl IntegrityCheck for PlausibilityCheck {
    fn id(&self) -> CheckId {
        CheckId::Plausibility
    }

    fn check(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> Vec<Finding> {
        let wording = "implausible, expected";
        let mut findings = out_of_bounds(game.fields(), config.plausibility(), wording);
        findings.extend(out_of_bounds(game.derived(), config.plausibility(), wording));
        findings
    }
}

fn out_of_bounds(
    values: &BTreeMap<FieldName, FieldValue>,
    table: &RangeTable,
    wording: &str,
) -> Vec<Finding> {
    values
        .iter()
        .filter_map(|(name, value)| {
            let number = value.as_f64()?;
            let bound = table.lookup(name)?;
            (!bound.contains(number)).then(|| {
                Finding::on_field(name.clone(), format!("{}={} {} {}", name, value, wording, bound))
            })
        })
        .collect()
}

pub struct CrossFieldCheck;

impl IntegrityCheck for CrossFieldCheck {
    fn id(&self) -> CheckId {
        CheckId::CrossField
    }

    fn check(&self, game: &ConsolidatedGame, _config: &ValidatedConfig) -> Vec<Finding> {
        let mut findings = Vec::new();
        winner_matches_score(game, &mut findings);
        boxscore_points_match_score(game, &mut findings);
        moneylines_are_consistent(game, &mut findings);
        win_probabilities_sum_to_one(game, &mut findings);
        findings
    }
}

fn winner_matches_score(game: &ConsolidatedGame, findings: &mut Vec<Finding>) {
    let Some(winner) = game.field(names::WINNER) else {
        return;
    };
    let reported = match winner {
        FieldValue::Text(side) if side == names::WINNER_HOME || side == names::WINNER_AWAY => {
            side.as_str()
        }
        other => {
            findings.push(Finding::on_field(
                names::WINNER,
                format!("winner {} is not a team in this game", other),
            ));
            return;
        }
    };
    let (Some(home), Some(away)) = (
        game.number(names::HOME_SCORE),
        game.number(names::AWAY_SCORE),
    ) else {
        return;
    };
    let implied = if home > away {
        names::WINNER_HOME
    } else if away > home {
        names::WINNER_AWAY
    } else {
        findings.push(Finding::on_field(
            names::WINNER,
            format!("winner reported as {} but the score is tied {}-{}", reported, home, away),
        ));
        return;
    };
    if implied != reported {
        findings.push(Finding::on_field(
            names::WINNER,
            format!(
                "winner reported as {} but the score {}-{} implies {}",
                reported, home, away, implied
            ),
        ));
    }
}

fn boxscore_points_match_score(game: &ConsolidatedGame, findings: &mut Vec<Finding>) {
    for side in [Side::Home, Side::Away] {
        let pts_field = side_field(side, "pts");
        let score_field = side_field(side, "score");
        if let (Some(pts), Some(score)) = (game.number(&pts_field), game.number(&score_field)) {
            if pts != score {
                findings.push(Finding::on_field(
                    pts_field.clone(),
                    format!("{}={} disagrees with {}={}", pts_field, pts, score_field, score),
                ));
            }
        }
    }
}

/// Implied probability of an American moneyline.
fn implied_probability(moneyline: f64) -> f64 {
    if moneyline < 0.0 {
        -moneyline / (-moneyline + 100.0)
    } else {
        100.0 / (moneyline + 100.0)
    }
}

fn moneylines_are_consistent(game: &ConsolidatedGame, findings: &mut Vec<Finding>) {
    let mut valid = Vec::with_capacity(2);
    for name in [names::MONEYLINE_HOME, names::MONEYLINE_AWAY] {
        let Some(line) = game.number(name) else {
            continue;
        };
        if line.abs() < 100.0 {
            findings.push(Finding::on_field(
                name,
                format!("{}={} is not a valid American moneyline", name, line),
            ));
        } else {
            valid.push(line);
        }
    }
    if let &[home, away] = valid.as_slice() {
        let total = implied_probability(home) + implied_probability(away);
        if total < 1.0 {
            findings.push(Finding::on_game(format!(
                "moneylines {:+}/{:+} imply probabilities summing to {:.4} < 1",
                home, away, total
            )));
        }
    }
}

fn win_probabilities_sum_to_one(game: &ConsolidatedGame, findings: &mut Vec<Finding>) {
    if let (Some(home), Some(away)) = (
        game.number(names::HOME_WIN_PROB),
        game.number(names::AWAY_WIN_PROB),
    ) {
        let total = home + away;
        if (total - 1.0).abs() > WIN_PROB_TOLERANCE {
            findings.push(Finding::on_game(format!(
                "win probabilities sum to {:.4}, expected 1",
                total
            )));
        }
    }
}

pub struct ReferentialCheck;

impl IntegrityCheck for ReferentialCheck {
    fn id(&self) -> CheckId {
        CheckId::Referential
    }

    fn check(&self, game: &ConsolidatedGame, config: &ValidatedConfig) -> Vec<Finding> {
        let key = game.game_key();
        let mut findings = Vec::new();

        if key.home == key.away {
            findings.push(Finding::on_game(format!("{} plays itself", key.home)));
        }

        for (name, value) in game.fields() {
            let Some(team) = value.as_team() else {
                continue;
            };
            match team {
                TeamRef::Unresolved(raw) => findings.push(Finding::on_field(
                    name.clone(),
                    format!("{} references unknown team '{}'", name, raw),
                )),
                TeamRef::Known(team) => {
                    if let Some(side) = field_side(name) {
                        let expected = key.team(side);
                        if *team != expected {
                            findings.push(Finding::on_field(
                                name.clone(),
                                format!(
                                    "{} is {} but the {} team is {}",
                                    name,
                                    team,
                                    side.prefix(),
                                    expected
                                ),
                            ));
                        }
                    }
                }
            }
        }

        match config.calendar().bounds(key.season) {
            Some((start, end)) if key.date < start || key.date > end => {
                findings.push(Finding::on_game(format!(
                    "date {} is outside season {} ({} to {})",
                    key.date, key.season, start, end
                )));
            }
            Some(_) => {}
            None => findings.push(Finding::on_game(format!(
                "season {} has no calendar bounds",
                key.season
            ))),
        }

        findings
    }
}
