//! Field Model
//!
//! Field names are plain strings so that adding a source or a field never touches merge
//! control flow. The well-known names used by the normalizer, the derived variables and
//! the validator live in [`names`].

use crate::consolidation::keys::{Side, TeamRef};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type FieldName = String;

/// A single field value, as reported by a source or resolved by consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Flag(bool),
    Team(TeamRef),
}

impl FieldValue {
    /// Numeric view (ints widen to floats). `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_team(&self) -> Option<&TeamRef> {
        match self {
            FieldValue::Team(team) => Some(team),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{:?}", v),
            FieldValue::Flag(v) => write!(f, "{}", v),
            FieldValue::Team(team) => write!(f, "{}", team),
        }
    }
}

/// Build a side-prefixed field name, e.g. `home_fg_pct`.
pub fn side_field(side: Side, suffix: &str) -> FieldName {
    format!("{}_{}", side.prefix(), suffix)
}

/// Side encoded in a field name prefix, if any.
pub fn field_side(name: &str) -> Option<Side> {
    if name.starts_with("home_") {
        Some(Side::Home)
    } else if name.starts_with("away_") {
        Some(Side::Away)
    } else {
        None
    }
}

/// Well-known field names.
pub mod names {
    pub const HOME_SCORE: &str = "home_score";
    pub const AWAY_SCORE: &str = "away_score";
    pub const WINNER: &str = "winner";
    pub const STATUS: &str = "status";
    pub const SEASON_TYPE: &str = "season_type";
    pub const VENUE: &str = "venue";
    pub const SOURCE_GAME_ID: &str = "source_game_id";

    pub const BOOKMAKER: &str = "bookmaker";
    pub const MONEYLINE_HOME: &str = "moneyline_home";
    pub const MONEYLINE_AWAY: &str = "moneyline_away";
    pub const SPREAD_HOME: &str = "spread_home";
    pub const OVER_UNDER: &str = "over_under";
    pub const HOME_WIN_PROB: &str = "home_win_prob";
    pub const AWAY_WIN_PROB: &str = "away_win_prob";

    // Derived
    pub const HOME_WIN: &str = "home_win";
    pub const POINT_DIFF: &str = "point_diff";
    pub const TOTAL_POINTS: &str = "total_points";
    pub const REB_DIFF: &str = "reb_diff";
    pub const AST_DIFF: &str = "ast_diff";
    pub const TOV_DIFF: &str = "tov_diff";
    pub const NET_RATING_DIFF: &str = "net_rating_diff";

    /// Values of the `winner` field once normalized.
    pub const WINNER_HOME: &str = "home";
    pub const WINNER_AWAY: &str = "away";
}
