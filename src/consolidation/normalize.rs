//! Normalizer
//!
//! Maps each source's raw payload onto the common [`NormalizedRecord`] shape and derives
//! its `GameKey`. Key derivation only looks at the shared `GameContext`, so two sources
//! describing the same game produce equal keys. A raw record that cannot be keyed is
//! dropped with a [`NormalizationError`]; bad individual values (unparseable or
//! non-finite numbers) only drop that field.

use crate::consolidation::config::ValidatedConfig;
use crate::consolidation::fields::{names, side_field, FieldName, FieldValue};
use crate::consolidation::keys::{GameKey, Season, Side, SourceKind, TeamKey, TeamRef};
use crate::consolidation::raw::{
    BoxscoreRaw, GameContext, InjuriesRaw, OddsRaw, RawEnvelope, RawNumber, RawRecord,
    ScheduleRaw, StandingsRaw, TeamLine, TeamStatsRaw,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

// =============================================================================
// OUTPUT
// =============================================================================

/// One source's contribution to one game, after key resolution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source: SourceKind,
    pub game_key: GameKey,
    /// Subject team for per-team sources (team stats, standings, injuries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamRef>,
    pub fields: BTreeMap<FieldName, FieldValue>,
    pub observed_at: DateTime<Utc>,
    /// Fields present in the payload whose values could not be used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_fields: Vec<FieldName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationErrorKind {
    UnmappableTeam,
    MissingDate,
    MalformedDate,
    MissingTeams,
    MalformedSeason,
    SourceMismatch,
}

impl NormalizationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnmappableTeam => "unmappable_team",
            Self::MissingDate => "missing_date",
            Self::MalformedDate => "malformed_date",
            Self::MissingTeams => "missing_teams",
            Self::MalformedSeason => "malformed_season",
            Self::SourceMismatch => "source_mismatch",
        }
    }
}

impl fmt::Display for NormalizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record, non-fatal. The record is dropped and counted, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationError {
    pub kind: NormalizationErrorKind,
    pub source: SourceKind,
    pub detail: String,
}

impl NormalizationError {
    fn new(kind: NormalizationErrorKind, source: SourceKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            source,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} record dropped ({}): {}", self.source, self.kind, self.detail)
    }
}

impl std::error::Error for NormalizationError {}

/// Normalization counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub received: BTreeMap<SourceKind, u64>,
    pub normalized: BTreeMap<SourceKind, u64>,
    pub dropped: BTreeMap<SourceKind, u64>,
    pub dropped_by_kind: BTreeMap<NormalizationErrorKind, u64>,
    pub rejected_fields: u64,
}

impl NormalizationStats {
    pub fn total_received(&self) -> u64 {
        self.received.values().sum()
    }

    pub fn total_normalized(&self) -> u64 {
        self.normalized.values().sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn summary(&self) -> String {
        let kinds: Vec<String> = self
            .dropped_by_kind
            .iter()
            .map(|(kind, n)| format!("{}={}", kind, n))
            .collect();
        format!(
            "received={} normalized={} dropped={} [{}] rejected_fields={}",
            self.total_received(),
            self.total_normalized(),
            self.total_dropped(),
            kinds.join(" "),
            self.rejected_fields
        )
    }
}

// =============================================================================
// NORMALIZER
// =============================================================================

/// Pure mapping from raw records to normalized records.
pub struct Normalizer<'a> {
    config: &'a ValidatedConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a ValidatedConfig) -> Self {
        Self { config }
    }

    /// Normalize one raw record delivered by `source`.
    pub fn normalize(
        &self,
        raw: &RawRecord,
        source: SourceKind,
        observed_at: DateTime<Utc>,
    ) -> Result<NormalizedRecord, NormalizationError> {
        if raw.source() != source {
            return Err(NormalizationError::new(
                NormalizationErrorKind::SourceMismatch,
                source,
                format!("payload is a {} record", raw.source()),
            ));
        }

        let game_key = self.derive_key(raw.game(), source)?;
        let mut out = FieldWriter::default();

        let team = match raw {
            RawRecord::Schedule(r) => {
                self.schedule_fields(r, &game_key, &mut out);
                None
            }
            RawRecord::Boxscore(r) => {
                self.boxscore_fields(r, &game_key, &mut out);
                None
            }
            RawRecord::TeamStats(r) => Some(self.team_stats_fields(r, &mut out)),
            RawRecord::Standings(r) => Some(self.standings_fields(r, &mut out)),
            RawRecord::Injuries(r) => Some(self.injuries_fields(r, &mut out)),
            RawRecord::Odds(r) => {
                odds_fields(r, &mut out);
                None
            }
        };

        if !out.rejected.is_empty() {
            debug!(
                source = %source,
                game = %game_key,
                rejected = ?out.rejected,
                "Dropped unusable field values"
            );
        }

        Ok(NormalizedRecord {
            source,
            game_key,
            team,
            fields: out.fields,
            observed_at,
            rejected_fields: out.rejected,
        })
    }

    /// Normalize a source's delivery, logging and counting drops.
    pub fn normalize_delivery(
        &self,
        source: SourceKind,
        envelopes: &[RawEnvelope],
        stats: &mut NormalizationStats,
    ) -> Vec<NormalizedRecord> {
        let mut records = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            *stats.received.entry(source).or_default() += 1;
            match self.normalize(&envelope.record, source, envelope.retrieved_at) {
                Ok(record) => {
                    *stats.normalized.entry(source).or_default() += 1;
                    stats.rejected_fields += record.rejected_fields.len() as u64;
                    records.push(record);
                }
                Err(err) => {
                    warn!(
                        source = %err.source,
                        kind = %err.kind,
                        detail = %err.detail,
                        "Dropping raw record"
                    );
                    *stats.dropped.entry(source).or_default() += 1;
                    *stats.dropped_by_kind.entry(err.kind).or_default() += 1;
                }
            }
        }
        records
    }

    // -------------------------------------------------------------------------
    // Key derivation
    // -------------------------------------------------------------------------

    fn derive_key(
        &self,
        game: &GameContext,
        source: SourceKind,
    ) -> Result<GameKey, NormalizationError> {
        let date = self.parse_date(game.date.as_deref(), source)?;

        let (home_raw, away_raw) = match (non_blank(&game.home_team), non_blank(&game.away_team))
        {
            (Some(home), Some(away)) => (home, away),
            _ => {
                return Err(NormalizationError::new(
                    NormalizationErrorKind::MissingTeams,
                    source,
                    "home and away teams are required",
                ))
            }
        };
        let home = self.resolve_game_team(source, home_raw)?;
        let away = self.resolve_game_team(source, away_raw)?;

        let season = match &game.season {
            Some(raw) => parse_season(raw).ok_or_else(|| {
                NormalizationError::new(
                    NormalizationErrorKind::MalformedSeason,
                    source,
                    format!("season '{}'", raw.to_text()),
                )
            })?,
            None => self.config.calendar().season_for(date),
        };

        Ok(GameKey::derive(season, date, home, away))
    }

    fn resolve_game_team(
        &self,
        source: SourceKind,
        raw: &str,
    ) -> Result<TeamKey, NormalizationError> {
        self.config.teams().resolve(source, raw).ok_or_else(|| {
            NormalizationError::new(
                NormalizationErrorKind::UnmappableTeam,
                source,
                format!("team '{}'", raw),
            )
        })
    }

    fn parse_date(
        &self,
        raw: Option<&str>,
        source: SourceKind,
    ) -> Result<NaiveDate, NormalizationError> {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                return Err(NormalizationError::new(
                    NormalizationErrorKind::MissingDate,
                    source,
                    "no game date",
                ))
            }
        };
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return Ok(date);
            }
        }
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(self.config.calendar().local_date(&instant));
        }
        Err(NormalizationError::new(
            NormalizationErrorKind::MalformedDate,
            source,
            format!("date '{}'", raw),
        ))
    }

    // -------------------------------------------------------------------------
    // Per-source field mapping
    // -------------------------------------------------------------------------

    fn schedule_fields(&self, r: &ScheduleRaw, key: &GameKey, out: &mut FieldWriter) {
        if let Some(id) = &r.source_game_id {
            out.text(names::SOURCE_GAME_ID, Some(id.to_text().as_str()));
        }
        out.text(names::STATUS, r.status.as_deref());
        out.text(names::SEASON_TYPE, r.season_type.as_deref());
        out.text(names::VENUE, r.venue.as_deref());
        out.int(names::HOME_SCORE, r.home_score.as_ref());
        out.int(names::AWAY_SCORE, r.away_score.as_ref());
        self.winner(SourceKind::Schedule, r.winner.as_deref(), key, out);
    }

    fn boxscore_fields(&self, r: &BoxscoreRaw, key: &GameKey, out: &mut FieldWriter) {
        out.int(names::HOME_SCORE, r.home_score.as_ref());
        out.int(names::AWAY_SCORE, r.away_score.as_ref());
        self.winner(SourceKind::Boxscore, r.winner.as_deref(), key, out);
        team_line(Side::Home, &r.home_stats, out);
        team_line(Side::Away, &r.away_stats, out);
    }

    fn team_stats_fields(&self, r: &TeamStatsRaw, out: &mut FieldWriter) -> TeamRef {
        let side = r.side;
        let team = self.config.teams().reference(SourceKind::TeamStats, &r.team);
        out.put(side_field(side, "stats_team"), FieldValue::Team(team.clone()));
        out.float(side_field(side, "avg_fg_pct"), r.fg_pct.as_ref());
        out.float(side_field(side, "avg_3p_pct"), r.three_pct.as_ref());
        out.float(side_field(side, "avg_ft_pct"), r.ft_pct.as_ref());
        out.float(side_field(side, "avg_reb"), r.rpg.as_ref());
        out.float(side_field(side, "avg_ast"), r.apg.as_ref());
        out.float(side_field(side, "avg_stl"), r.spg.as_ref());
        out.float(side_field(side, "avg_blk"), r.bpg.as_ref());
        out.float(side_field(side, "avg_to"), r.tpg.as_ref());
        out.float(side_field(side, "avg_pts"), r.ppg.as_ref());
        out.float(side_field(side, "avg_opp_pts"), r.oppg.as_ref());
        team
    }

    fn standings_fields(&self, r: &StandingsRaw, out: &mut FieldWriter) -> TeamRef {
        let side = r.side;
        let team = self.config.teams().reference(SourceKind::Standings, &r.team);
        out.put(side_field(side, "standings_team"), FieldValue::Team(team.clone()));
        out.int(side_field(side, "wins"), r.wins.as_ref());
        out.int(side_field(side, "losses"), r.losses.as_ref());
        out.float(side_field(side, "win_pct"), r.win_pct.as_ref());
        // Division leaders are listed with "-".
        let leader = matches!(&r.games_behind, Some(RawNumber::Text(t)) if t.trim() == "-");
        if leader {
            out.put(side_field(side, "games_behind"), FieldValue::Float(0.0));
        } else {
            out.float(side_field(side, "games_behind"), r.games_behind.as_ref());
        }
        team
    }

    fn injuries_fields(&self, r: &InjuriesRaw, out: &mut FieldWriter) -> TeamRef {
        let side = r.side;
        let team = self.config.teams().reference(SourceKind::Injuries, &r.team);
        out.put(side_field(side, "injury_team"), FieldValue::Team(team.clone()));

        let (mut injured_out, mut doubtful, mut day_to_day) = (0i64, 0i64, 0i64);
        for entry in &r.entries {
            match injury_status(entry.status.as_deref()) {
                InjuryStatus::Out => injured_out += 1,
                InjuryStatus::Doubtful => doubtful += 1,
                InjuryStatus::DayToDay => day_to_day += 1,
                InjuryStatus::Other => {}
            }
        }
        out.put(side_field(side, "injuries_out"), FieldValue::Int(injured_out));
        out.put(side_field(side, "injuries_doubtful"), FieldValue::Int(doubtful));
        out.put(side_field(side, "injuries_day_to_day"), FieldValue::Int(day_to_day));
        out.put(
            side_field(side, "injuries_reported"),
            FieldValue::Int(r.entries.len() as i64),
        );
        team
    }

    /// `home`/`away` pass through; a team identifier naming one of the game's teams is
    /// turned into its side. Anything else is kept as a team value for the validator.
    fn winner(&self, source: SourceKind, raw: Option<&str>, key: &GameKey, out: &mut FieldWriter) {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return,
        };
        let value = if raw.eq_ignore_ascii_case(names::WINNER_HOME) {
            FieldValue::Text(names::WINNER_HOME.to_string())
        } else if raw.eq_ignore_ascii_case(names::WINNER_AWAY) {
            FieldValue::Text(names::WINNER_AWAY.to_string())
        } else {
            match self.config.teams().reference(source, raw) {
                TeamRef::Known(team) if team == key.home => {
                    FieldValue::Text(names::WINNER_HOME.to_string())
                }
                TeamRef::Known(team) if team == key.away => {
                    FieldValue::Text(names::WINNER_AWAY.to_string())
                }
                other => FieldValue::Team(other),
            }
        };
        out.put(names::WINNER, value);
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_season(raw: &RawNumber) -> Option<Season> {
    match raw {
        RawNumber::Text(text) => Season::parse(text),
        number => Season::parse(&number.to_i64()?.to_string()),
    }
}

fn team_line(side: Side, line: &TeamLine, out: &mut FieldWriter) {
    out.float(side_field(side, "fg_pct"), line.fg_pct.as_ref());
    out.float(side_field(side, "3p_pct"), line.three_pct.as_ref());
    out.float(side_field(side, "ft_pct"), line.ft_pct.as_ref());
    out.int(side_field(side, "reb"), line.reb.as_ref());
    out.int(side_field(side, "ast"), line.ast.as_ref());
    out.int(side_field(side, "stl"), line.stl.as_ref());
    out.int(side_field(side, "blk"), line.blk.as_ref());
    out.int(side_field(side, "to"), line.to.as_ref());
    out.int(side_field(side, "pf"), line.pf.as_ref());
    out.int(side_field(side, "pts"), line.pts.as_ref());
}

fn odds_fields(r: &OddsRaw, out: &mut FieldWriter) {
    out.text(names::BOOKMAKER, r.bookmaker.as_deref());
    out.int(names::MONEYLINE_HOME, r.moneyline_home.as_ref());
    out.int(names::MONEYLINE_AWAY, r.moneyline_away.as_ref());
    out.float(names::SPREAD_HOME, r.spread_home.as_ref());
    out.float(names::OVER_UNDER, r.over_under.as_ref());
    out.float(names::HOME_WIN_PROB, r.home_win_prob.as_ref());
    out.float(names::AWAY_WIN_PROB, r.away_win_prob.as_ref());
}

enum InjuryStatus {
    Out,
    Doubtful,
    DayToDay,
    Other,
}

fn injury_status(raw: Option<&str>) -> InjuryStatus {
    let status = raw.unwrap_or_default().trim().to_ascii_lowercase();
    if status.starts_with("out") {
        InjuryStatus::Out
    } else if status.starts_with("doubtful") {
        InjuryStatus::Doubtful
    } else if status.replace(['-', ' '], "") == "daytoday" || status == "dtd" {
        InjuryStatus::DayToDay
    } else {
        InjuryStatus::Other
    }
}

/// Collects fields, remembering the ones whose values were unusable.
#[derive(Default)]
struct FieldWriter {
    fields: BTreeMap<FieldName, FieldValue>,
    rejected: Vec<FieldName>,
}

impl FieldWriter {
    fn put(&mut self, name: impl Into<FieldName>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    fn int(&mut self, name: impl Into<FieldName>, raw: Option<&RawNumber>) {
        let Some(raw) = raw else { return };
        match raw.to_i64() {
            Some(v) => self.put(name, FieldValue::Int(v)),
            None => self.rejected.push(name.into()),
        }
    }

    fn float(&mut self, name: impl Into<FieldName>, raw: Option<&RawNumber>) {
        let Some(raw) = raw else { return };
        match raw.to_f64() {
            Some(v) => self.put(name, FieldValue::Float(v)),
            None => self.rejected.push(name.into()),
        }
    }

    fn text(&mut self, name: impl Into<FieldName>, raw: Option<&str>) {
        if let Some(text) = raw.map(str::trim).filter(|s| !s.is_empty()) {
            self.put(name, FieldValue::Text(text.to_string()));
        }
    }
}
