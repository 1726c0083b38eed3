//! Game Consolidation Pipeline
//!
//! Merges per-source sports data (schedule, boxscore, team stats, standings, injuries,
//! odds) into one validated record per game.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐ ┌───────────┐       ┌───────────┐
//! │ Reader    │ │ Reader    │  ...  │ Reader    │   one per source, concurrent
//! │ schedule  │ │ boxscore  │       │ odds      │   (timeout ⇒ absent source)
//! └─────┬─────┘ └─────┬─────┘       └─────┬─────┘
//!       └─────────────┼───────────────────┘
//!                     ▼  join barrier (gather_sources)
//! ┌─────────────────────────────────────────────────┐
//! │ Normalizer   raw tagged union → NormalizedRecord│
//! │              (GameKey, typed fields)            │
//! └───────────────────────┬─────────────────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────┐
//! │ Consolidator group by GameKey, fold in priority │
//! │              order → ConsolidatedGame           │
//! └───────────────────────┬─────────────────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────┐
//! │ Validator    check battery → Accepted | Flagged │
//! └───────────────────────┬─────────────────────────┘
//!                         ▼
//!                  GameSink (SQLite / JSON)
//! ```
//!
//! # Determinism Guarantees
//!
//! - **Ordering**: every map is a `BTreeMap`/`BTreeSet`; games are emitted in `GameKey` order
//! - **Fold order**: `(priority rank, observed_at, content key)`, independent of arrival order
//! - **Configuration**: one immutable `ValidatedConfig` per run, no global state
//! - **Fingerprint**: SHA-256 of the canonical output, equal across re-runs of a batch

pub mod calendar;
pub mod config;
pub mod consolidate;
pub mod derived;
pub mod fields;
pub mod keys;
pub mod normalize;
pub mod pipeline;
pub mod raw;
pub mod readers;
pub mod sink;
pub mod teams;
pub mod validate;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod normalize_tests;
#[cfg(test)]
mod pipeline_tests;

pub use calendar::{MonthDay, SeasonCalendar};
pub use config::{
    CheckId, ConfigError, PipelineConfig, RangeBound, RangeTable, Severity, SourcePriority,
    ValidatedConfig,
};
pub use consolidate::{ConsolidatedGame, ConsolidationStats, Consolidator, FieldConflict};
pub use derived::derive_variables;
pub use fields::{names, FieldName, FieldValue};
pub use keys::{GameKey, Season, Side, SourceKind, TeamKey, TeamRef};
pub use normalize::{
    NormalizationError, NormalizationErrorKind, NormalizationStats, NormalizedRecord, Normalizer,
};
pub use pipeline::{
    AbsentSource, FlaggedGame, Pipeline, RunAborted, RunCancellation, RunCounters,
    RunFingerprint, RunInput, RunReport, RunStage, SourceDelivery,
};
pub use raw::{RawEnvelope, RawNumber, RawRecord};
pub use readers::{gather_sources, DirectorySourceReader, SourceReader};
pub use sink::{GameSink, JsonReportSink, SinkError, SinkSummary, SqliteSink};
pub use teams::TeamDirectory;
pub use validate::{
    Finding, IntegrityCheck, ValidationOutcome, ValidationStatus, Validator, Violation,
};
