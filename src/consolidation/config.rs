//! Pipeline Configuration
//!
//! `PipelineConfig` is the TOML surface: source priority, required sources, range and
//! plausibility bounds, check severities, team aliases and the season calendar. It is
//! validated once, before any record is processed, into an immutable [`ValidatedConfig`]
//! that the normalizer, consolidator and validator borrow. Configuration errors are fatal.
//!
//! Range tables are keyed by field name. A key starting with `*` is a suffix pattern
//! (`*_fg_pct` matches `home_fg_pct` and `away_avg_fg_pct`); an exact key wins over any
//! pattern and the longest matching pattern wins over shorter ones. Entries in the file
//! extend and override the built-in tables; an entry with neither bound disables a
//! built-in one.

use crate::consolidation::calendar::{MonthDay, SeasonCalendar};
use crate::consolidation::keys::{Season, SourceKind, TeamKey};
use crate::consolidation::teams::TeamDirectory;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// CHECK IDENTIFIERS & SEVERITY
// =============================================================================

/// Whether a check's violations prevent acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Blocking => f.write_str("blocking"),
            Severity::Advisory => f.write_str("advisory"),
        }
    }
}

/// Identifies an integrity check in configuration and in violation reports.
///
/// Checks added outside this crate use `Custom`, written `custom.<name>` in config files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckId {
    Completeness,
    Range,
    CrossField,
    Referential,
    Plausibility,
    Custom(String),
}

impl CheckId {
    pub const BUILTIN: [CheckId; 5] = [
        CheckId::Completeness,
        CheckId::Range,
        CheckId::CrossField,
        CheckId::Referential,
        CheckId::Plausibility,
    ];

    pub fn default_severity(&self) -> Severity {
        match self {
            CheckId::Plausibility => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckId::Completeness => f.write_str("completeness"),
            CheckId::Range => f.write_str("range"),
            CheckId::CrossField => f.write_str("cross_field"),
            CheckId::Referential => f.write_str("referential"),
            CheckId::Plausibility => f.write_str("plausibility"),
            CheckId::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

impl FromStr for CheckId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "completeness" => Ok(CheckId::Completeness),
            "range" => Ok(CheckId::Range),
            "cross_field" => Ok(CheckId::CrossField),
            "referential" => Ok(CheckId::Referential),
            "plausibility" => Ok(CheckId::Plausibility),
            other => match other.strip_prefix("custom.") {
                Some(name) if !name.is_empty() => Ok(CheckId::Custom(name.to_string())),
                _ => Err(format!("unknown check '{}'", s)),
            },
        }
    }
}

impl Serialize for CheckId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CheckId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, error: std::io::Error },
    Parse(toml::de::Error),
    UnknownSource(String),
    DuplicateSource(SourceKind),
    MissingSource(SourceKind),
    UnknownCheck(String),
    InvalidBound { field: String, reason: String },
    UnknownTeam { source: SourceKind, alias: String, code: String },
    InvalidCalendar(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "Cannot read {}: {}", path.display(), error),
            Self::Parse(e) => write!(f, "Invalid config TOML: {}", e),
            Self::UnknownSource(name) => write!(f, "Unknown source: {}", name),
            Self::DuplicateSource(source) => {
                write!(f, "Source listed twice in priority: {}", source)
            }
            Self::MissingSource(source) => write!(f, "Source missing from priority: {}", source),
            Self::UnknownCheck(name) => write!(f, "Unknown check: {}", name),
            Self::InvalidBound { field, reason } => {
                write!(f, "Invalid bound for '{}': {}", field, reason)
            }
            Self::UnknownTeam {
                source,
                alias,
                code,
            } => write!(
                f,
                "Alias '{}' for {} maps to unknown team code '{}'",
                alias, source, code
            ),
            Self::InvalidCalendar(reason) => write!(f, "Invalid calendar: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

// =============================================================================
// FILE FORMAT
// =============================================================================

/// Inclusive numeric bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl RangeBound {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    pub fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "[{}, {}]", min, max),
            (Some(min), None) => write!(f, ">= {}", min),
            (None, Some(max)) => write!(f, "<= {}", max),
            (None, None) => f.write_str("unbounded"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamsConfig {
    /// `source -> alias -> canonical code`
    #[serde(default)]
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonOverride {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// `MM-DD`
    #[serde(default = "default_season_start")]
    pub season_start: String,
    /// `MM-DD`, in the calendar year after the start.
    #[serde(default = "default_season_end")]
    pub season_end: String,
    /// Offset used to turn timestamps into league-local dates.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Explicit bounds keyed by season (`"2019-20"`).
    #[serde(default)]
    pub overrides: BTreeMap<String, SeasonOverride>,
}

fn default_season_start() -> String {
    "10-01".to_string()
}
fn default_season_end() -> String {
    "06-30".to_string()
}
fn default_utc_offset_minutes() -> i32 {
    -300
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            season_start: default_season_start(),
            season_end: default_season_end(),
            utc_offset_minutes: default_utc_offset_minutes(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Pipeline configuration as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Source precedence, highest first. Must name every source exactly once.
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,

    /// Sources every accepted game must have heard from.
    #[serde(default = "default_required_sources")]
    pub required_sources: Vec<String>,

    /// Hard domain bounds (range check), layered over the built-in table.
    #[serde(default)]
    pub ranges: BTreeMap<String, RangeBound>,

    /// Soft bounds (plausibility check), layered over the built-in table.
    #[serde(default)]
    pub plausibility: BTreeMap<String, RangeBound>,

    /// Severity per check, overriding the defaults.
    #[serde(default)]
    pub checks: BTreeMap<String, Severity>,

    #[serde(default)]
    pub teams: TeamsConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,
}

fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|s| s.as_str().to_string()).collect()
}

fn default_required_sources() -> Vec<String> {
    DEFAULT_REQUIRED
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            required_sources: default_required_sources(),
            ranges: BTreeMap::new(),
            plausibility: BTreeMap::new(),
            checks: BTreeMap::new(),
            teams: TeamsConfig::default(),
            calendar: CalendarConfig::default(),
        }
    }
}

/// Boxscores are the box of record; odds are the least authoritative game facts.
const DEFAULT_PRIORITY: [SourceKind; 6] = [
    SourceKind::Boxscore,
    SourceKind::Schedule,
    SourceKind::TeamStats,
    SourceKind::Standings,
    SourceKind::Injuries,
    SourceKind::Odds,
];

const DEFAULT_REQUIRED: [SourceKind; 2] = [SourceKind::Boxscore, SourceKind::Schedule];

fn builtin_ranges() -> Vec<(&'static str, RangeBound)> {
    vec![
        ("home_score", RangeBound::between(0.0, 300.0)),
        ("away_score", RangeBound::between(0.0, 300.0)),
        ("*_pts", RangeBound::between(0.0, 300.0)),
        ("*_fg_pct", RangeBound::between(0.0, 100.0)),
        ("*_3p_pct", RangeBound::between(0.0, 100.0)),
        ("*_ft_pct", RangeBound::between(0.0, 100.0)),
        ("*_win_pct", RangeBound::between(0.0, 1.0)),
        ("*_win_prob", RangeBound::between(0.0, 1.0)),
        ("*_reb", RangeBound::at_least(0.0)),
        ("*_ast", RangeBound::at_least(0.0)),
        ("*_stl", RangeBound::at_least(0.0)),
        ("*_blk", RangeBound::at_least(0.0)),
        ("*_to", RangeBound::at_least(0.0)),
        ("*_pf", RangeBound::at_least(0.0)),
        ("*_wins", RangeBound::between(0.0, 82.0)),
        ("*_losses", RangeBound::between(0.0, 82.0)),
        ("*_games_behind", RangeBound::between(0.0, 82.0)),
        ("*_injuries_out", RangeBound::at_least(0.0)),
        ("*_injuries_doubtful", RangeBound::at_least(0.0)),
        ("*_injuries_day_to_day", RangeBound::at_least(0.0)),
        ("*_injuries_reported", RangeBound::at_least(0.0)),
        ("over_under", RangeBound::between(0.0, 400.0)),
    ]
}

fn builtin_plausibility() -> Vec<(&'static str, RangeBound)> {
    vec![
        ("home_score", RangeBound::between(50.0, 200.0)),
        ("away_score", RangeBound::between(50.0, 200.0)),
        ("total_points", RangeBound::between(120.0, 350.0)),
    ]
}

impl PipelineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check everything and build the immutable run configuration.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let priority = SourcePriority::new(&parse_sources(&self.priority)?)?;

        let required = parse_sources(&self.required_sources)?.into_iter().collect();

        let ranges = RangeTable::layered(builtin_ranges(), &self.ranges)?;
        let plausibility = RangeTable::layered(builtin_plausibility(), &self.plausibility)?;

        let mut severities: BTreeMap<CheckId, Severity> = CheckId::BUILTIN
            .iter()
            .map(|id| (id.clone(), id.default_severity()))
            .collect();
        for (name, severity) in &self.checks {
            let id: CheckId = name
                .parse()
                .map_err(|_| ConfigError::UnknownCheck(name.clone()))?;
            severities.insert(id, *severity);
        }

        let mut teams = TeamDirectory::new();
        for (source_name, aliases) in &self.teams.aliases {
            let source: SourceKind = source_name
                .parse()
                .map_err(|_| ConfigError::UnknownSource(source_name.clone()))?;
            for (alias, code) in aliases {
                let team = TeamKey::from_code(code).ok_or_else(|| ConfigError::UnknownTeam {
                    source,
                    alias: alias.clone(),
                    code: code.clone(),
                })?;
                teams.add_alias(source, alias, team);
            }
        }

        let calendar = self.calendar.build()?;

        Ok(ValidatedConfig {
            priority,
            required,
            ranges,
            plausibility,
            severities,
            teams,
            calendar,
        })
    }
}

impl CalendarConfig {
    fn build(&self) -> Result<SeasonCalendar, ConfigError> {
        let start = MonthDay::parse(&self.season_start).ok_or_else(|| {
            ConfigError::InvalidCalendar(format!("season_start '{}'", self.season_start))
        })?;
        let end = MonthDay::parse(&self.season_end).ok_or_else(|| {
            ConfigError::InvalidCalendar(format!("season_end '{}'", self.season_end))
        })?;
        let mut calendar =
            SeasonCalendar::new(start, end, self.utc_offset_minutes).ok_or_else(|| {
                ConfigError::InvalidCalendar(format!(
                    "utc_offset_minutes {} out of range",
                    self.utc_offset_minutes
                ))
            })?;
        for (name, bounds) in &self.overrides {
            let season = Season::parse(name)
                .ok_or_else(|| ConfigError::InvalidCalendar(format!("season '{}'", name)))?;
            if bounds.start > bounds.end {
                return Err(ConfigError::InvalidCalendar(format!(
                    "season {} starts after it ends",
                    season
                )));
            }
            calendar = calendar.with_override(season, bounds.start, bounds.end);
        }
        Ok(calendar)
    }
}

fn parse_sources(names: &[String]) -> Result<Vec<SourceKind>, ConfigError> {
    names
        .iter()
        .map(|name| {
            name.parse()
                .map_err(|_| ConfigError::UnknownSource(name.clone()))
        })
        .collect()
}

// =============================================================================
// VALIDATED PIECES
// =============================================================================

/// Total order over sources. Rank 0 is the most authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<SourceKind>,
    ranks: [usize; 6],
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::from_complete(DEFAULT_PRIORITY)
    }
}

impl SourcePriority {
    /// The list must name every source exactly once.
    pub fn new(order: &[SourceKind]) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        for source in order {
            if !seen.insert(*source) {
                return Err(ConfigError::DuplicateSource(*source));
            }
        }
        if let Some(missing) = SourceKind::ALL.iter().find(|s| !seen.contains(s)) {
            return Err(ConfigError::MissingSource(*missing));
        }
        let mut ranks = [0usize; 6];
        for (rank, source) in order.iter().enumerate() {
            ranks[source.index()] = rank;
        }
        Ok(Self {
            order: order.to_vec(),
            ranks,
        })
    }

    fn from_complete(order: [SourceKind; 6]) -> Self {
        let mut ranks = [0usize; 6];
        for (rank, source) in order.iter().enumerate() {
            ranks[source.index()] = rank;
        }
        Self {
            order: order.to_vec(),
            ranks,
        }
    }

    pub fn rank(&self, source: SourceKind) -> usize {
        self.ranks[source.index()]
    }

    /// `a` strictly outranks `b`.
    pub fn outranks(&self, a: SourceKind, b: SourceKind) -> bool {
        self.rank(a) < self.rank(b)
    }

    pub fn order(&self) -> &[SourceKind] {
        &self.order
    }
}

/// Field-name keyed bounds with `*suffix` patterns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeTable {
    exact: BTreeMap<String, RangeBound>,
    /// Sorted longest suffix first.
    suffixes: Vec<(String, RangeBound)>,
}

impl RangeTable {
    fn layered(
        builtin: Vec<(&'static str, RangeBound)>,
        overrides: &BTreeMap<String, RangeBound>,
    ) -> Result<Self, ConfigError> {
        let mut merged: BTreeMap<String, RangeBound> = builtin
            .into_iter()
            .map(|(key, bound)| (key.to_string(), bound))
            .collect();
        for (key, bound) in overrides {
            merged.insert(key.clone(), *bound);
        }
        Self::from_entries(merged)
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, RangeBound)>,
    ) -> Result<Self, ConfigError> {
        let mut table = RangeTable::default();
        for (key, bound) in entries {
            validate_bound(&key, &bound)?;
            table.insert(key, bound);
        }
        table.sort_suffixes();
        Ok(table)
    }

    /// Built-in bounds, inserted without validation.
    fn builtin(entries: Vec<(&'static str, RangeBound)>) -> Self {
        let mut table = RangeTable::default();
        for (key, bound) in entries {
            table.insert(key.to_string(), bound);
        }
        table.sort_suffixes();
        table
    }

    fn insert(&mut self, key: String, bound: RangeBound) {
        if bound.is_open() {
            return;
        }
        match key.strip_prefix('*') {
            Some(suffix) => self.suffixes.push((suffix.to_string(), bound)),
            None => {
                self.exact.insert(key, bound);
            }
        }
    }

    fn sort_suffixes(&mut self) {
        self.suffixes
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    }

    pub fn lookup(&self, field: &str) -> Option<&RangeBound> {
        self.exact.get(field).or_else(|| {
            self.suffixes
                .iter()
                .find(|(suffix, _)| field.ends_with(suffix.as_str()))
                .map(|(_, bound)| bound)
        })
    }
}

fn validate_bound(key: &str, bound: &RangeBound) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBound {
        field: key.to_string(),
        reason: reason.to_string(),
    };
    let pattern = key.strip_prefix('*').unwrap_or(key);
    if pattern.is_empty() || pattern.contains('*') {
        return Err(invalid("'*' is only allowed as a leading wildcard"));
    }
    if bound.min.map_or(false, |v| !v.is_finite()) || bound.max.map_or(false, |v| !v.is_finite())
    {
        return Err(invalid("bounds must be finite"));
    }
    if let (Some(min), Some(max)) = (bound.min, bound.max) {
        if min > max {
            return Err(invalid("min is greater than max"));
        }
    }
    Ok(())
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    priority: SourcePriority,
    required: BTreeSet<SourceKind>,
    ranges: RangeTable,
    plausibility: RangeTable,
    severities: BTreeMap<CheckId, Severity>,
    teams: TeamDirectory,
    calendar: SeasonCalendar,
}

impl Default for ValidatedConfig {
    fn default() -> Self {
        Self {
            priority: SourcePriority::default(),
            required: DEFAULT_REQUIRED.iter().copied().collect(),
            ranges: RangeTable::builtin(builtin_ranges()),
            plausibility: RangeTable::builtin(builtin_plausibility()),
            severities: CheckId::BUILTIN
                .iter()
                .map(|id| (id.clone(), id.default_severity()))
                .collect(),
            teams: TeamDirectory::new(),
            calendar: SeasonCalendar::default(),
        }
    }
}

impl ValidatedConfig {
    pub fn priority(&self) -> &SourcePriority {
        &self.priority
    }

    pub fn required_sources(&self) -> &BTreeSet<SourceKind> {
        &self.required
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    pub fn plausibility(&self) -> &RangeTable {
        &self.plausibility
    }

    pub fn teams(&self) -> &TeamDirectory {
        &self.teams
    }

    pub fn calendar(&self) -> &SeasonCalendar {
        &self.calendar
    }

    /// Configured severity, falling back to the check's default.
    pub fn severity(&self, check: &CheckId) -> Severity {
        self.severities
            .get(check)
            .copied()
            .unwrap_or_else(|| check.default_severity())
    }

    pub fn with_priority(mut self, priority: SourcePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_required_sources(mut self, required: impl IntoIterator<Item = SourceKind>) -> Self {
        self.required = required.into_iter().collect();
        self
    }

    pub fn with_severity(mut self, check: CheckId, severity: Severity) -> Self {
        self.severities.insert(check, severity);
        self
    }
}
