//! Canonical Identifiers
//!
//! The identifier space every source is resolved into before anything is merged:
//!
//! - [`SourceKind`]: the upstream data origins.
//! - [`TeamKey`]: the fixed team enumeration, invariant across seasons.
//! - [`TeamRef`]: a team reference inside a record, which may fail to resolve.
//! - [`Season`]: a league season, identified by its start year.
//! - [`GameKey`]: `(season, date, home, away)`, derivable from any single source.
//!
//! `GameKey` serializes as its display string (`2023-24/2024-01-15/BOS@LAL`, away team
//! first) so it can be used directly as a JSON object key or a SQL primary key.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// SOURCE KIND
// =============================================================================

/// Upstream data origin.
///
/// Declaration order is only used for stable map ordering. Merge precedence is
/// configured separately (see `SourcePriority`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Schedule,
    Boxscore,
    TeamStats,
    Standings,
    Injuries,
    Odds,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Schedule,
        SourceKind::Boxscore,
        SourceKind::TeamStats,
        SourceKind::Standings,
        SourceKind::Injuries,
        SourceKind::Odds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Schedule => "schedule",
            SourceKind::Boxscore => "boxscore",
            SourceKind::TeamStats => "team_stats",
            SourceKind::Standings => "standings",
            SourceKind::Injuries => "injuries",
            SourceKind::Odds => "odds",
        }
    }

    /// Dense index, used by fixed-size per-source tables.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    /// Accepts `team_stats`, `team-stats` and `teamstats`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "schedule" => Ok(SourceKind::Schedule),
            "boxscore" | "boxscores" => Ok(SourceKind::Boxscore),
            "teamstats" => Ok(SourceKind::TeamStats),
            "standings" => Ok(SourceKind::Standings),
            "injuries" => Ok(SourceKind::Injuries),
            "odds" => Ok(SourceKind::Odds),
            _ => Err(format!("unknown source kind '{}'", s)),
        }
    }
}

// =============================================================================
// TEAM KEY
// =============================================================================

/// Canonical team codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TeamKey {
    Atl,
    Bkn,
    Bos,
    Cha,
    Chi,
    Cle,
    Dal,
    Den,
    Det,
    Gsw,
    Hou,
    Ind,
    Lac,
    Lal,
    Mem,
    Mia,
    Mil,
    Min,
    Nop,
    Nyk,
    Okc,
    Orl,
    Phi,
    Phx,
    Por,
    Sac,
    Sas,
    Tor,
    Uta,
    Was,
}

impl TeamKey {
    pub const ALL: [TeamKey; 30] = [
        TeamKey::Atl,
        TeamKey::Bkn,
        TeamKey::Bos,
        TeamKey::Cha,
        TeamKey::Chi,
        TeamKey::Cle,
        TeamKey::Dal,
        TeamKey::Den,
        TeamKey::Det,
        TeamKey::Gsw,
        TeamKey::Hou,
        TeamKey::Ind,
        TeamKey::Lac,
        TeamKey::Lal,
        TeamKey::Mem,
        TeamKey::Mia,
        TeamKey::Mil,
        TeamKey::Min,
        TeamKey::Nop,
        TeamKey::Nyk,
        TeamKey::Okc,
        TeamKey::Orl,
        TeamKey::Phi,
        TeamKey::Phx,
        TeamKey::Por,
        TeamKey::Sac,
        TeamKey::Sas,
        TeamKey::Tor,
        TeamKey::Uta,
        TeamKey::Was,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeamKey::Atl => "ATL",
            TeamKey::Bkn => "BKN",
            TeamKey::Bos => "BOS",
            TeamKey::Cha => "CHA",
            TeamKey::Chi => "CHI",
            TeamKey::Cle => "CLE",
            TeamKey::Dal => "DAL",
            TeamKey::Den => "DEN",
            TeamKey::Det => "DET",
            TeamKey::Gsw => "GSW",
            TeamKey::Hou => "HOU",
            TeamKey::Ind => "IND",
            TeamKey::Lac => "LAC",
            TeamKey::Lal => "LAL",
            TeamKey::Mem => "MEM",
            TeamKey::Mia => "MIA",
            TeamKey::Mil => "MIL",
            TeamKey::Min => "MIN",
            TeamKey::Nop => "NOP",
            TeamKey::Nyk => "NYK",
            TeamKey::Okc => "OKC",
            TeamKey::Orl => "ORL",
            TeamKey::Phi => "PHI",
            TeamKey::Phx => "PHX",
            TeamKey::Por => "POR",
            TeamKey::Sac => "SAC",
            TeamKey::Sas => "SAS",
            TeamKey::Tor => "TOR",
            TeamKey::Uta => "UTA",
            TeamKey::Was => "WAS",
        }
    }

    /// Exact canonical code lookup (case-insensitive). Aliases live in `TeamDirectory`.
    pub fn from_code(code: &str) -> Option<TeamKey> {
        let code = code.trim();
        TeamKey::ALL
            .iter()
            .copied()
            .find(|team| team.as_str().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for TeamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A team reference carried inside a record.
///
/// Only the home/away teams of a game must resolve (they form the `GameKey`). Any other
/// reference keeps its raw text when it cannot be resolved, so the referential check can
/// report it instead of the record silently disappearing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRef {
    Known(TeamKey),
    Unresolved(String),
}

impl TeamRef {
    pub fn known(&self) -> Option<TeamKey> {
        match self {
            TeamRef::Known(team) => Some(*team),
            TeamRef::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for TeamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamRef::Known(team) => write!(f, "{}", team),
            TeamRef::Unresolved(raw) => write!(f, "?{}", raw),
        }
    }
}

/// Which side of a game a per-team record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[serde(alias = "HOME", alias = "Home", alias = "local")]
    Home,
    #[serde(alias = "AWAY", alias = "Away", alias = "visitor", alias = "visitante")]
    Away,
}

impl Side {
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

// =============================================================================
// SEASON
// =============================================================================

/// A league season, identified by the calendar year it starts in.
///
/// Printed as `2023-24`. Parsing accepts `2023-24`, `2023-2024` and a bare year. A bare
/// year is the season's *ending* year, matching the `season=2024` convention of the
/// upstream sites (so `2024` is the 2023-24 season).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.start_year + 1
    }

    pub fn parse(raw: &str) -> Option<Season> {
        let raw = raw.trim();
        match raw.split_once('-') {
            Some((start, end)) => {
                let start: i32 = parse_year(start)?;
                let end_digits = end.trim();
                let end: i32 = end_digits.parse().ok()?;
                let consistent = match end_digits.len() {
                    2 => end == (start + 1) % 100,
                    4 => end == start + 1,
                    _ => false,
                };
                consistent.then(|| Season::new(start))
            }
            None => parse_year(raw).map(|end| Season::new(end - 1)),
        }
    }
}

fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start_year, (self.start_year + 1).rem_euclid(100))
    }
}

impl Serialize for Season {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Season {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Season::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid season '{}'", raw)))
    }
}

// =============================================================================
// GAME KEY
// =============================================================================

/// Canonical identifier of one real-world game.
///
/// Field order defines the ordering used everywhere output is sorted:
/// season, then date, then home team, then away team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameKey {
    pub season: Season,
    pub date: NaiveDate,
    pub home: TeamKey,
    pub away: TeamKey,
}

impl GameKey {
    /// Pure, source-independent key derivation.
    pub fn derive(season: Season, date: NaiveDate, home: TeamKey, away: TeamKey) -> Self {
        Self {
            season,
            date,
            home,
            away,
        }
    }

    pub fn team(&self, side: Side) -> TeamKey {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.season,
            self.date.format("%Y-%m-%d"),
            self.away,
            self.home
        )
    }
}

impl FromStr for GameKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '/');
        let (season, date, matchup) = match (parts.next(), parts.next(), parts.next()) {
            (Some(season), Some(date), Some(matchup)) => (season, date, matchup),
            _ => return Err(format!("malformed game key '{}'", s)),
        };
        let season = Season::parse(season).ok_or_else(|| format!("bad season in '{}'", s))?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| format!("bad date in '{}': {}", s, e))?;
        let (away, home) = matchup
            .split_once('@')
            .ok_or_else(|| format!("bad matchup in '{}'", s))?;
        let away = TeamKey::from_code(away).ok_or_else(|| format!("bad away team in '{}'", s))?;
        let home = TeamKey::from_code(home).ok_or_else(|| format!("bad home team in '{}'", s))?;
        Ok(GameKey::derive(season, date, home, away))
    }
}

impl Serialize for GameKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GameKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_parse_forms() {
        assert_eq!(Season::parse("2023-24"), Some(Season::new(2023)));
        assert_eq!(Season::parse("2023-2024"), Some(Season::new(2023)));
        assert_eq!(Season::parse("2024"), Some(Season::new(2023)));
        assert_eq!(Season::parse("1999-00"), Some(Season::new(1999)));
        assert_eq!(Season::parse("2023-25"), None);
        assert_eq!(Season::parse("23-24"), None);
        assert_eq!(Season::new(1999).to_string(), "1999-00");
    }

    #[test]
    fn test_source_kind_parse_is_lenient_on_separators() {
        assert_eq!("team-stats".parse::<SourceKind>(), Ok(SourceKind::TeamStats));
        assert_eq!("TEAM_STATS".parse::<SourceKind>(), Ok(SourceKind::TeamStats));
        assert_eq!("boxscores".parse::<SourceKind>(), Ok(SourceKind::Boxscore));
        assert!("weather".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_game_key_display_roundtrip() {
        let key = GameKey::derive(
            Season::new(2023),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            TeamKey::Lal,
            TeamKey::Bos,
        );
        assert_eq!(key.to_string(), "2023-24/2024-01-15/BOS@LAL");
        assert_eq!("2023-24/2024-01-15/BOS@LAL".parse::<GameKey>(), Ok(key));

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"2023-24/2024-01-15/BOS@LAL\"");
    }

    #[test]
    fn test_team_key_codes_are_unique() {
        let mut codes: Vec<&str> = TeamKey::ALL.iter().map(|t| t.as_str()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 30);
        assert_eq!(TeamKey::from_code("gsw"), Some(TeamKey::Gsw));
        assert_eq!(TeamKey::from_code("GS"), None);
    }
}
