//! Raw Source Records
//!
//! One payload struct per source, joined in the [`RawRecord`] tagged union so the
//! normalizer's handling of every source is checked exhaustively at compile time.
//! Field aliases cover the column names the upstream scrapers write (`FG%`, `fecha`,
//! `commence_time`, ...). Numbers may arrive as JSON numbers or as strings.

use crate::consolidation::keys::{Side, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// SHARED PIECES
// =============================================================================

/// A number as a scraper emitted it: integer, float, or text such as `"+130"` / `"47.5%"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawNumber {
    /// Finite float view. Text is trimmed and may carry a leading `+` or trailing `%`.
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            RawNumber::Int(v) => *v as f64,
            RawNumber::Float(v) => *v,
            RawNumber::Text(s) => {
                let s = s.trim();
                let s = s.strip_prefix('+').unwrap_or(s);
                let s = s.strip_suffix('%').unwrap_or(s);
                s.trim().parse::<f64>().ok()?
            }
        };
        value.is_finite().then_some(value)
    }

    /// Integer view. Floats and text are accepted only when integral.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            RawNumber::Int(v) => Some(*v),
            other => {
                let value = other.to_f64()?;
                (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
            }
        }
    }

    /// Identifier view (`401584773` and `"401584773"` are the same id).
    pub fn to_text(&self) -> String {
        match self {
            RawNumber::Int(v) => v.to_string(),
            RawNumber::Float(v) => v.to_string(),
            RawNumber::Text(s) => s.trim().to_string(),
        }
    }
}

/// Fields every source needs to place a record on a game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    #[serde(default, alias = "temporada")]
    pub season: Option<RawNumber>,
    #[serde(default, alias = "fecha", alias = "game_date", alias = "commence_time")]
    pub date: Option<String>,
    #[serde(default, alias = "home", alias = "home_team_abbrev")]
    pub home_team: Option<String>,
    #[serde(default, alias = "away", alias = "away_team_abbrev")]
    pub away_team: Option<String>,
}

// =============================================================================
// PER-SOURCE PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRaw {
    #[serde(flatten)]
    pub game: GameContext,
    #[serde(default, alias = "game_id", alias = "id")]
    pub source_game_id: Option<RawNumber>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub season_type: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub home_score: Option<RawNumber>,
    #[serde(default)]
    pub away_score: Option<RawNumber>,
    #[serde(default)]
    pub winner: Option<String>,
}

/// One side's line in a boxscore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamLine {
    #[serde(alias = "FG%")]
    pub fg_pct: Option<RawNumber>,
    #[serde(alias = "3P%")]
    pub three_pct: Option<RawNumber>,
    #[serde(alias = "FT%")]
    pub ft_pct: Option<RawNumber>,
    #[serde(alias = "REB")]
    pub reb: Option<RawNumber>,
    #[serde(alias = "AST")]
    pub ast: Option<RawNumber>,
    #[serde(alias = "STL")]
    pub stl: Option<RawNumber>,
    #[serde(alias = "BLK")]
    pub blk: Option<RawNumber>,
    #[serde(alias = "TO")]
    pub to: Option<RawNumber>,
    #[serde(alias = "PF")]
    pub pf: Option<RawNumber>,
    #[serde(alias = "PTS")]
    pub pts: Option<RawNumber>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxscoreRaw {
    #[serde(flatten)]
    pub game: GameContext,
    #[serde(default)]
    pub home_score: Option<RawNumber>,
    #[serde(default)]
    pub away_score: Option<RawNumber>,
    /// `home`, `away`, or a team identifier.
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub home_stats: TeamLine,
    #[serde(default)]
    pub away_stats: TeamLine,
}

/// Season averages for one team, attached to a game it plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatsRaw {
    #[serde(flatten)]
    pub game: GameContext,
    pub side: Side,
    #[serde(alias = "team_abbrev", alias = "Team")]
    pub team: String,
    #[serde(default, alias = "FG%")]
    pub fg_pct: Option<RawNumber>,
    #[serde(default, alias = "3P%")]
    pub three_pct: Option<RawNumber>,
    #[serde(default, alias = "FT%")]
    pub ft_pct: Option<RawNumber>,
    #[serde(default, alias = "RPG")]
    pub rpg: Option<RawNumber>,
    #[serde(default, alias = "APG")]
    pub apg: Option<RawNumber>,
    #[serde(default, alias = "SPG")]
    pub spg: Option<RawNumber>,
    #[serde(default, alias = "BPG")]
    pub bpg: Option<RawNumber>,
    #[serde(default, alias = "TPG")]
    pub tpg: Option<RawNumber>,
    #[serde(default, alias = "PPG")]
    pub ppg: Option<RawNumber>,
    #[serde(default, alias = "OPPG")]
    pub oppg: Option<RawNumber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingsRaw {
    #[serde(flatten)]
    pub game: GameContext,
    pub side: Side,
    #[serde(alias = "Team")]
    pub team: String,
    #[serde(default, alias = "W")]
    pub wins: Option<RawNumber>,
    #[serde(default, alias = "L")]
    pub losses: Option<RawNumber>,
    #[serde(default, alias = "PCT")]
    pub win_pct: Option<RawNumber>,
    /// `-` for the division leader.
    #[serde(default, alias = "GB")]
    pub games_behind: Option<RawNumber>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryEntry {
    #[serde(alias = "Player")]
    pub player: String,
    #[serde(default, alias = "Position")]
    pub position: Option<String>,
    #[serde(default, alias = "Status")]
    pub status: Option<String>,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
}

/// A team's injury report for a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuriesRaw {
    #[serde(flatten)]
    pub game: GameContext,
    pub side: Side,
    #[serde(alias = "Team")]
    pub team: String,
    #[serde(default)]
    pub entries: Vec<InjuryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsRaw {
    #[serde(flatten)]
    pub game: GameContext,
    #[serde(default)]
    pub bookmaker: Option<String>,
    /// American odds.
    #[serde(default)]
    pub moneyline_home: Option<RawNumber>,
    #[serde(default)]
    pub moneyline_away: Option<RawNumber>,
    #[serde(default)]
    pub spread_home: Option<RawNumber>,
    #[serde(default, alias = "total")]
    pub over_under: Option<RawNumber>,
    #[serde(default)]
    pub home_win_prob: Option<RawNumber>,
    #[serde(default)]
    pub away_win_prob: Option<RawNumber>,
}

// =============================================================================
// TAGGED UNION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "payload", rename_all = "snake_case")]
pub enum RawRecord {
    Schedule(ScheduleRaw),
    Boxscore(BoxscoreRaw),
    TeamStats(TeamStatsRaw),
    Standings(StandingsRaw),
    Injuries(InjuriesRaw),
    Odds(OddsRaw),
}

impl RawRecord {
    pub fn source(&self) -> SourceKind {
        match self {
            RawRecord::Schedule(_) => SourceKind::Schedule,
            RawRecord::Boxscore(_) => SourceKind::Boxscore,
            RawRecord::TeamStats(_) => SourceKind::TeamStats,
            RawRecord::Standings(_) => SourceKind::Standings,
            RawRecord::Injuries(_) => SourceKind::Injuries,
            RawRecord::Odds(_) => SourceKind::Odds,
        }
    }

    pub fn game(&self) -> &GameContext {
        match self {
            RawRecord::Schedule(r) => &r.game,
            RawRecord::Boxscore(r) => &r.game,
            RawRecord::TeamStats(r) => &r.game,
            RawRecord::Standings(r) => &r.game,
            RawRecord::Injuries(r) => &r.game,
            RawRecord::Odds(r) => &r.game,
        }
    }

    /// Decode an untagged payload whose source is known from where it was read.
    pub fn from_json(source: SourceKind, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match source {
            SourceKind::Schedule => RawRecord::Schedule(serde_json::from_value(value)?),
            SourceKind::Boxscore => RawRecord::Boxscore(serde_json::from_value(value)?),
            SourceKind::TeamStats => RawRecord::TeamStats(serde_json::from_value(value)?),
            SourceKind::Standings => RawRecord::Standings(serde_json::from_value(value)?),
            SourceKind::Injuries => RawRecord::Injuries(serde_json::from_value(value)?),
            SourceKind::Odds => RawRecord::Odds(serde_json::from_value(value)?),
        })
    }
}

/// A raw record plus the time its reader retrieved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub record: RawRecord,
    pub retrieved_at: DateTime<Utc>,
}

impl RawEnvelope {
    pub fn new(record: RawRecord, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            record,
            retrieved_at,
        }
    }
}
