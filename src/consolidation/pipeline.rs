//! Run Orchestration
//!
//! One batch run: normalize every delivered source, consolidate, validate, and partition
//! the games into accepted and flagged. Runs start after the reader barrier and are
//! single-threaded over the in-memory batch. A [`RunCancellation`] raised before
//! consolidation aborts the run and discards everything read so far; once consolidation
//! starts the token is no longer consulted.
//!
//! The [`RunReport`] carries a [`RunFingerprint`], a SHA-256 over the canonical JSON of
//! every outcome and game in `GameKey` order. Re-running the same batch yields the same
//! fingerprint.

use crate::consolidation::config::{Severity, ValidatedConfig};
use crate::consolidation::consolidate::{ConsolidatedGame, ConsolidationStats, Consolidator};
use crate::consolidation::keys::SourceKind;
use crate::consolidation::normalize::{NormalizationStats, Normalizer};
use crate::consolidation::raw::RawEnvelope;
use crate::consolidation::validate::{IntegrityCheck, ValidationOutcome, Validator, Violation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Fingerprint version string - increment when the canonical output changes shape.
pub const FINGERPRINT_VERSION: &str = "GAMELINE_RUN_V1";

// =============================================================================
// CANCELLATION
// =============================================================================

/// Shared cancellation flag for one run.
#[derive(Debug, Clone, Default)]
pub struct RunCancellation {
    flag: Arc<AtomicBool>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    /// While readers were running.
    Gather,
    /// After the barrier, before consolidation.
    BeforeConsolidation,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Gather => f.write_str("gather"),
            RunStage::BeforeConsolidation => f.write_str("before consolidation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAborted {
    Cancelled { stage: RunStage },
}

impl fmt::Display for RunAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled { stage } => write!(f, "Run cancelled ({})", stage),
        }
    }
}

impl std::error::Error for RunAborted {}

// =============================================================================
// INPUT
// =============================================================================

/// What one source produced for this run. Absence is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDelivery {
    Delivered {
        source: SourceKind,
        records: Vec<RawEnvelope>,
    },
    Absent {
        source: SourceKind,
        reason: String,
    },
}

impl SourceDelivery {
    /// A delivery with zero records is an absence.
    pub fn from_records(source: SourceKind, records: Vec<RawEnvelope>) -> Self {
        if records.is_empty() {
            SourceDelivery::Absent {
                source,
                reason: "no records".to_string(),
            }
        } else {
            SourceDelivery::Delivered { source, records }
        }
    }

    pub fn source(&self) -> SourceKind {
        match self {
            SourceDelivery::Delivered { source, .. } | SourceDelivery::Absent { source, .. } => {
                *source
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInput {
    deliveries: Vec<SourceDelivery>,
}

impl RunInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_deliveries(deliveries: Vec<SourceDelivery>) -> Self {
        Self { deliveries }
    }

    pub fn deliver(mut self, source: SourceKind, records: Vec<RawEnvelope>) -> Self {
        self.deliveries
            .push(SourceDelivery::from_records(source, records));
        self
    }

    pub fn absent(mut self, source: SourceKind, reason: impl Into<String>) -> Self {
        self.deliveries.push(SourceDelivery::Absent {
            source,
            reason: reason.into(),
        });
        self
    }

    pub fn deliveries(&self) -> &[SourceDelivery] {
        &self.deliveries
    }
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedGame {
    pub game: ConsolidatedGame,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsentSource {
    pub source: SourceKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunCounters {
    pub normalization: NormalizationStats,
    pub consolidation: ConsolidationStats,
    pub accepted: u64,
    pub flagged: u64,
    pub blocking_violations: u64,
    pub advisory_violations: u64,
    pub absent_sources: u64,
}

impl RunCounters {
    pub fn summary(&self) -> String {
        format!(
            "accepted={} flagged={} blocking={} advisory={} absent_sources={} | {} | {}",
            self.accepted,
            self.flagged,
            self.blocking_violations,
            self.advisory_violations,
            self.absent_sources,
            self.normalization.summary(),
            self.consolidation.summary()
        )
    }
}

/// Hex SHA-256 of a run's canonical output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunFingerprint(String);

impl RunFingerprint {
    /// `games` and `outcomes` must be in the same `GameKey` order.
    pub fn compute(games: &[&ConsolidatedGame], outcomes: &[ValidationOutcome]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        for (game, outcome) in games.iter().zip(outcomes) {
            hasher.update(serde_json::to_vec(game).unwrap_or_default());
            hasher.update(b"\n");
            hasher.update(serde_json::to_vec(outcome).unwrap_or_default());
            hasher.update(b"\n");
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a run produced. Every consolidated game is in exactly one of
/// `accepted` / `flagged`, and `outcomes` has one entry per game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub accepted: Vec<ConsolidatedGame>,
    pub flagged: Vec<FlaggedGame>,
    pub outcomes: Vec<ValidationOutcome>,
    pub absent_sources: Vec<AbsentSource>,
    pub counters: RunCounters,
    pub fingerprint: RunFingerprint,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty()
    }

    pub fn game_count(&self) -> usize {
        self.outcomes.len()
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

pub struct Pipeline {
    config: ValidatedConfig,
    validator: Validator,
}

impl Pipeline {
    pub fn new(config: ValidatedConfig) -> Self {
        Self {
            config,
            validator: Validator::new(),
        }
    }

    /// Append a check to the validator battery.
    pub fn with_check(mut self, check: Box<dyn IntegrityCheck>) -> Self {
        self.validator.push(check);
        self
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn run(&self, input: RunInput, cancel: &RunCancellation) -> Result<RunReport, RunAborted> {
        if cancel.is_cancelled() {
            warn!("Run cancelled before consolidation, discarding reader results");
            return Err(RunAborted::Cancelled {
                stage: RunStage::BeforeConsolidation,
            });
        }

        let mut counters = RunCounters::default();
        let normalizer = Normalizer::new(&self.config);

        let mut absent: BTreeMap<SourceKind, String> = SourceKind::ALL
            .iter()
            .map(|s| (*s, "not delivered".to_string()))
            .collect();
        let mut records = Vec::new();
        for delivery in input.deliveries {
            match delivery {
                SourceDelivery::Delivered { source, records: raw } => {
                    absent.remove(&source);
                    records.extend(normalizer.normalize_delivery(
                        source,
                        &raw,
                        &mut counters.normalization,
                    ));
                }
                SourceDelivery::Absent { source, reason } => {
                    // A source split across deliveries counts as present if any part arrived.
                    if let Some(existing) = absent.get_mut(&source) {
                        *existing = reason;
                    }
                }
            }
        }
        for (source, reason) in &absent {
            info!(source = %source, reason = %reason, "Source absent for this run");
        }

        let games = Consolidator::new(&self.config)
            .consolidate_with_stats(records, &mut counters.consolidation);

        let mut accepted = Vec::new();
        let mut flagged = Vec::new();
        let mut outcomes = Vec::with_capacity(games.len());
        for game in games.into_values() {
            let outcome = self.validator.validate(&game, &self.config);
            for violation in &outcome.violations {
                match violation.severity {
                    Severity::Blocking => counters.blocking_violations += 1,
                    Severity::Advisory => counters.advisory_violations += 1,
                }
            }
            if outcome.is_accepted() {
                counters.accepted += 1;
                accepted.push(game);
            } else {
                counters.flagged += 1;
                warn!(
                    game = %outcome.game_key,
                    violations = outcome.blocking().count(),
                    "Game flagged"
                );
                flagged.push(FlaggedGame {
                    game,
                    violations: outcome.violations.clone(),
                });
            }
            outcomes.push(outcome);
        }

        let absent_sources: Vec<AbsentSource> = absent
            .into_iter()
            .map(|(source, reason)| AbsentSource { source, reason })
            .collect();
        counters.absent_sources = absent_sources.len() as u64;

        let fingerprint = fingerprint_of(&accepted, &flagged, &outcomes);

        info!(
            games = outcomes.len(),
            accepted = counters.accepted,
            flagged = counters.flagged,
            fingerprint = %fingerprint,
            "Run complete: {}",
            counters.summary()
        );

        Ok(RunReport {
            accepted,
            flagged,
            outcomes,
            absent_sources,
            counters,
            fingerprint,
        })
    }
}

/// Re-interleave the partitions into `GameKey` order before hashing.
fn fingerprint_of(
    accepted: &[ConsolidatedGame],
    flagged: &[FlaggedGame],
    outcomes: &[ValidationOutcome],
) -> RunFingerprint {
    let mut games: Vec<&ConsolidatedGame> = accepted
        .iter()
        .chain(flagged.iter().map(|f| &f.game))
        .collect();
    games.sort_by(|a, b| a.game_key().cmp(b.game_key()));
    RunFingerprint::compute(&games, outcomes)
}
