//! Season Calendar
//!
//! Season membership of a date, season bounds for the referential check, and conversion
//! of timestamps to the league-local game date.

use crate::consolidation::keys::Season;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use std::collections::BTreeMap;

/// Month/day pair, validated against a non-leap year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(2001, month, day).map(|_| Self { month, day })
    }

    /// Parse `MM-DD`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (month, day) = raw.trim().split_once('-')?;
        Self::new(month.parse().ok()?, day.parse().ok()?)
    }

    fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonCalendar {
    season_start: MonthDay,
    season_end: MonthDay,
    utc_offset: FixedOffset,
    overrides: BTreeMap<Season, (NaiveDate, NaiveDate)>,
}

impl Default for SeasonCalendar {
    /// October 1 through June 30, dates at UTC-05:00.
    fn default() -> Self {
        Self {
            season_start: MonthDay { month: 10, day: 1 },
            season_end: MonthDay { month: 6, day: 30 },
            utc_offset: FixedOffset::west_opt(5 * 3600).unwrap_or(Utc.fix()),
            overrides: BTreeMap::new(),
        }
    }
}

impl SeasonCalendar {
    /// `None` if the offset is out of range (more than a day either way).
    pub fn new(season_start: MonthDay, season_end: MonthDay, utc_offset_minutes: i32) -> Option<Self> {
        let utc_offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        Some(Self {
            season_start,
            season_end,
            utc_offset,
            overrides: BTreeMap::new(),
        })
    }

    /// Explicit bounds for one season (lockouts, bubble seasons).
    pub fn with_override(mut self, season: Season, start: NaiveDate, end: NaiveDate) -> Self {
        self.overrides.insert(season, (start, end));
        self
    }

    /// Season a date belongs to when the record does not declare one.
    pub fn season_for(&self, date: NaiveDate) -> Season {
        if let Some((season, _)) = self
            .overrides
            .iter()
            .find(|(_, (start, end))| *start <= date && date <= *end)
        {
            return *season;
        }
        if MonthDay::of(date) >= self.season_start {
            Season::new(date.year())
        } else {
            Season::new(date.year() - 1)
        }
    }

    /// Inclusive calendar bounds of a season.
    pub fn bounds(&self, season: Season) -> Option<(NaiveDate, NaiveDate)> {
        if let Some(bounds) = self.overrides.get(&season) {
            return Some(*bounds);
        }
        let start = self.season_start.in_year(season.start_year())?;
        let end = self.season_end.in_year(season.end_year())?;
        Some((start, end))
    }

    pub fn contains(&self, season: Season, date: NaiveDate) -> bool {
        self.bounds(season)
            .map(|(start, end)| start <= date && date <= end)
            .unwrap_or(false)
    }

    /// League-local calendar date of an instant.
    pub fn local_date<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> NaiveDate {
        instant.with_timezone(&self.utc_offset).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_season_for_wraps_at_season_start() {
        let cal = SeasonCalendar::default();
        assert_eq!(cal.season_for(date(2023, 10, 24)), Season::new(2023));
        assert_eq!(cal.season_for(date(2024, 4, 14)), Season::new(2023));
        assert_eq!(cal.season_for(date(2024, 9, 30)), Season::new(2023));
        assert_eq!(cal.season_for(date(2024, 10, 1)), Season::new(2024));
    }

    #[test]
    fn test_bounds_and_overrides() {
        let cal = SeasonCalendar::default();
        assert!(cal.contains(Season::new(2023), date(2024, 6, 30)));
        assert!(!cal.contains(Season::new(2023), date(2024, 7, 1)));

        let bubble = cal.with_override(Season::new(2019), date(2019, 10, 22), date(2020, 10, 11));
        assert!(bubble.contains(Season::new(2019), date(2020, 8, 15)));
        assert_eq!(bubble.season_for(date(2020, 8, 15)), Season::new(2019));
    }

    #[test]
    fn test_local_date_shifts_late_tipoffs() {
        let cal = SeasonCalendar::default();
        let tipoff = DateTime::parse_from_rfc3339("2024-01-16T00:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(cal.local_date(&tipoff), date(2024, 1, 15));
    }

    #[test]
    fn test_month_day_validation() {
        assert!(MonthDay::parse("10-01").is_some());
        assert!(MonthDay::parse("02-29").is_none());
        assert!(MonthDay::parse("13-01").is_none());
        let (start, end) = (MonthDay::new(10, 1).unwrap(), MonthDay::new(6, 30).unwrap());
        assert!(SeasonCalendar::new(start, end, 24 * 60 + 1).is_none());
    }
}
