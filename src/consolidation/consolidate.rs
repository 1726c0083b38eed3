//! Consolidator
//!
//! Joins normalized records on `GameKey` and folds each group into one
//! [`ConsolidatedGame`] under the configured source priority.
//!
//! # Fold order
//!
//! Records of a group are sorted by `(priority rank, observed_at, content key)` before
//! folding, so the result never depends on arrival order. The content key is the
//! canonical JSON of the record's fields and only matters for two records from the same
//! source with the same timestamp.
//!
//! # Field rules
//!
//! | current provenance        | action                                              |
//! |---------------------------|-----------------------------------------------------|
//! | unset                     | write                                               |
//! | same source               | overwrite (later observation wins)                  |
//! | lower-priority source     | overwrite, conflict if the values differ            |
//! | higher-priority source    | keep, conflict if the values differ                 |
//!
//! Same-source last-write-wins is per field: a later record overwrites the fields it
//! reports and leaves the others alone.

use crate::consolidation::config::{SourcePriority, ValidatedConfig};
use crate::consolidation::derived::derive_variables;
use crate::consolidation::fields::{FieldName, FieldValue};
use crate::consolidation::keys::{GameKey, SourceKind};
use crate::consolidation::normalize::NormalizedRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

// =============================================================================
// OUTPUT
// =============================================================================

/// A lower-priority source disagreed with the value that was kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub field: FieldName,
    pub kept_source: SourceKind,
    pub kept_value: FieldValue,
    pub overridden_source: SourceKind,
    pub overridden_value: FieldValue,
}

/// The merged record for one game.
///
/// Only the consolidator builds these. `completeness` and `provenance` are derived from
/// the fold and cannot be set from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedGame {
    game_key: GameKey,
    fields: BTreeMap<FieldName, FieldValue>,
    provenance: BTreeMap<FieldName, SourceKind>,
    completeness: BTreeSet<SourceKind>,
    conflicts: Vec<FieldConflict>,
    derived: BTreeMap<FieldName, FieldValue>,
}

impl ConsolidatedGame {
    fn empty(game_key: GameKey) -> Self {
        Self {
            game_key,
            fields: BTreeMap::new(),
            provenance: BTreeMap::new(),
            completeness: BTreeSet::new(),
            conflicts: Vec::new(),
            derived: BTreeMap::new(),
        }
    }

    pub fn game_key(&self) -> &GameKey {
        &self.game_key
    }

    pub fn fields(&self) -> &BTreeMap<FieldName, FieldValue> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn provenance(&self) -> &BTreeMap<FieldName, SourceKind> {
        &self.provenance
    }

    pub fn provenance_of(&self, name: &str) -> Option<SourceKind> {
        self.provenance.get(name).copied()
    }

    pub fn completeness(&self) -> &BTreeSet<SourceKind> {
        &self.completeness
    }

    pub fn conflicts(&self) -> &[FieldConflict] {
        &self.conflicts
    }

    pub fn derived(&self) -> &BTreeMap<FieldName, FieldValue> {
        &self.derived
    }

    /// Merged field, falling back to a derived variable.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).or_else(|| self.derived.get(name))
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(FieldValue::as_f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationStats {
    pub groups: u64,
    pub records_folded: u64,
    pub fields_written: u64,
    pub same_source_revisions: u64,
    pub conflicts: u64,
}

impl ConsolidationStats {
    pub fn summary(&self) -> String {
        format!(
            "games={} records={} fields_written={} revisions={} conflicts={}",
            self.groups,
            self.records_folded,
            self.fields_written,
            self.same_source_revisions,
            self.conflicts
        )
    }
}

// =============================================================================
// CONSOLIDATOR
// =============================================================================

pub struct Consolidator<'a> {
    priority: &'a SourcePriority,
}

impl<'a> Consolidator<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Self {
            priority: config.priority(),
        }
    }

    pub fn consolidate(&self, records: Vec<NormalizedRecord>) -> BTreeMap<GameKey, ConsolidatedGame> {
        self.consolidate_with_stats(records, &mut ConsolidationStats::default())
    }

    pub fn consolidate_with_stats(
        &self,
        records: Vec<NormalizedRecord>,
        stats: &mut ConsolidationStats,
    ) -> BTreeMap<GameKey, ConsolidatedGame> {
        let mut groups: BTreeMap<GameKey, Vec<NormalizedRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.game_key).or_default().push(record);
        }

        let mut games = BTreeMap::new();
        for (key, group) in groups {
            stats.groups += 1;
            let game = self.fold_group(key, group, stats);
            debug!(
                game = %key,
                sources = game.completeness.len(),
                fields = game.fields.len(),
                conflicts = game.conflicts.len(),
                "Consolidated game"
            );
            games.insert(key, game);
        }
        games
    }

    fn fold_group(
        &self,
        key: GameKey,
        group: Vec<NormalizedRecord>,
        stats: &mut ConsolidationStats,
    ) -> ConsolidatedGame {
        let mut ordered: Vec<(usize, String, NormalizedRecord)> = group
            .into_iter()
            .map(|record| {
                let content = serde_json::to_string(&record.fields).unwrap_or_default();
                (self.priority.rank(record.source), content, record)
            })
            .collect();
        ordered.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.2.observed_at.cmp(&b.2.observed_at))
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut game = ConsolidatedGame::empty(key);
        for (_, _, record) in ordered {
            stats.records_folded += 1;
            self.fold_record(&mut game, record, stats);
        }
        game.derived = derive_variables(&game.fields);
        game
    }

    fn fold_record(
        &self,
        game: &mut ConsolidatedGame,
        record: NormalizedRecord,
        stats: &mut ConsolidationStats,
    ) {
        let source = record.source;
        game.completeness.insert(source);

        for (name, value) in record.fields {
            let current = game.provenance.get(&name).copied();
            match current {
                None => {
                    write_field(game, name, value, source, stats);
                }
                Some(owner) if owner == source => {
                    if game.fields.get(&name).map_or(true, |v| !same_value(v, &value)) {
                        trace!(
                            game = %game.game_key,
                            field = %name,
                            source = %source,
                            "Later observation revises field"
                        );
                        stats.same_source_revisions += 1;
                        write_field(game, name, value, source, stats);
                    }
                }
                Some(owner) if self.priority.outranks(source, owner) => {
                    if let Some(previous) = game.fields.get(&name) {
                        if !same_value(previous, &value) {
                            let conflict = FieldConflict {
                                field: name.clone(),
                                kept_source: source,
                                kept_value: value.clone(),
                                overridden_source: owner,
                                overridden_value: previous.clone(),
                            };
                            record_conflict(game, conflict, stats);
                        }
                    }
                    write_field(game, name, value, source, stats);
                }
                Some(owner) => {
                    if let Some(kept) = game.fields.get(&name) {
                        if !same_value(kept, &value) {
                            let conflict = FieldConflict {
                                field: name,
                                kept_source: owner,
                                kept_value: kept.clone(),
                                overridden_source: source,
                                overridden_value: value,
                            };
                            record_conflict(game, conflict, stats);
                        }
                    }
                }
            }
        }
    }
}

fn write_field(
    game: &mut ConsolidatedGame,
    name: FieldName,
    value: FieldValue,
    source: SourceKind,
    stats: &mut ConsolidationStats,
) {
    stats.fields_written += 1;
    game.provenance.insert(name.clone(), source);
    game.fields.insert(name, value);
}

fn record_conflict(game: &mut ConsolidatedGame, conflict: FieldConflict, stats: &mut ConsolidationStats) {
    debug!(
        game = %game.game_key,
        field = %conflict.field,
        kept = %conflict.kept_source,
        overridden = %conflict.overridden_source,
        "Sources disagree"
    );
    stats.conflicts += 1;
    game.conflicts.push(conflict);
}

/// Numbers compare by value, so `Int(98)` and `Float(98.0)` agree.
fn same_value(a: &FieldValue, b: &FieldValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
