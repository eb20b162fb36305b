use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::model::Value;
use crate::config::Config;

/// Where a record's canonical date came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    /// Explicit `DATE` column (`YYDDD`, `YYYYDDD`, `YYYYMMDD` or `YYYY-MM-DD`).
    CalendarDate,
    /// `YEAR` + `DOY` columns.
    YearDoy,
    /// `DAS` column relative to the simulation start date.
    DaysAfterStart,
}

/// Two date sources of the same record disagreeing. The higher-priority
/// source won; the record is still usable but the file is ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateConflict {
    pub line: usize,
    pub chosen: DateSource,
    pub chosen_date: NaiveDate,
    pub other: DateSource,
    pub other_date: NaiveDate,
}

/// The raw date material of one row.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateFields<'a> {
    pub calendar: Option<&'a str>,
    pub year: Option<f64>,
    pub doy: Option<f64>,
    pub das: Option<f64>,
}

impl<'a> DateFields<'a> {
    /// Pick `YEAR`, `DOY` and `DAS` out of a normalized row.
    pub fn from_values(calendar: Option<&'a str>, values: &BTreeMap<String, Value>) -> Self {
        let lookup = |key: &str| {
            values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.as_f64())
        };
        DateFields {
            calendar: calendar.map(str::trim).filter(|c| !c.is_empty()),
            year: lookup("YEAR"),
            doy: lookup("DOY"),
            das: lookup("DAS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub date: NaiveDate,
    pub days_after_start: Option<i64>,
    pub source: DateSource,
    pub conflicts: Vec<DateConflict>,
}

/// Derives the canonical date of a record from whichever date fields are
/// present, in a configurable priority order. Stateless: each record is
/// resolved on its own.
#[derive(Debug, Clone)]
pub struct TemporalResolver {
    priority: Vec<DateSource>,
    start: Option<NaiveDate>,
    year_pivot: u32,
}

impl TemporalResolver {
    pub fn new(priority: Vec<DateSource>, start: Option<NaiveDate>, year_pivot: u32) -> Self {
        Self {
            priority,
            start,
            year_pivot,
        }
    }

    /// Resolver from config; an explicit `start` overrides
    /// `config.simulation_start`.
    pub fn from_config(config: &Config, start: Option<NaiveDate>) -> Self {
        Self::new(
            config.date_priority.clone(),
            start.or(config.simulation_start),
            config.two_digit_year_pivot,
        )
    }

    fn resolve_source(&self, source: DateSource, fields: &DateFields<'_>) -> Option<NaiveDate> {
        match source {
            DateSource::CalendarDate => fields
                .calendar
                .and_then(|token| parse_calendar_date(token, self.year_pivot)),
            DateSource::YearDoy => {
                let year = whole(fields.year?)?;
                let doy = whole(fields.doy?)?;
                date_from_year_doy(i32::try_from(year).ok()?, u32::try_from(doy).ok()?)
            }
            DateSource::DaysAfterStart => {
                let start = self.start?;
                let das = whole(fields.das?)?;
                start.checked_add_signed(Duration::try_days(das)?)
            }
        }
    }

    /// Resolve one record. `None` means no source produced a valid date;
    /// the caller turns that into `UnresolvedDate` with its own context.
    pub fn resolve(&self, line: usize, fields: &DateFields<'_>) -> Option<Resolution> {
        let mut resolved = self
            .priority
            .iter()
            .filter_map(|&source| self.resolve_source(source, fields).map(|d| (source, d)));

        let (source, date) = resolved.next()?;
        let conflicts: Vec<DateConflict> = resolved
            .filter(|(_, other_date)| *other_date != date)
            .map(|(other, other_date)| DateConflict {
                line,
                chosen: source,
                chosen_date: date,
                other,
                other_date,
            })
            .collect();

        let days_after_start = match self.start {
            Some(start) => Some((date - start).num_days()),
            None => fields.das.and_then(whole),
        };

        Some(Resolution {
            date,
            days_after_start,
            source,
            conflicts,
        })
    }
}

/// Calendar date from year + day-of-year. Day 366 only exists in leap years.
pub fn date_from_year_doy(year: i32, doy: u32) -> Option<NaiveDate> {
    NaiveDate::from_yo_opt(year, doy)
}

/// Parse the date encodings found in DSSAT observed files.
pub fn parse_calendar_date(token: &str, year_pivot: u32) -> Option<NaiveDate> {
    let token = token.trim();
    if token.contains('-') {
        return NaiveDate::parse_from_str(token, "%Y-%m-%d").ok();
    }
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match token.len() {
        5 => {
            let yy: u32 = token[..2].parse().ok()?;
            let doy: u32 = token[2..].parse().ok()?;
            let century = if yy < year_pivot { 2000 } else { 1900 };
            date_from_year_doy((century + yy) as i32, doy)
        }
        7 => {
            let year: i32 = token[..4].parse().ok()?;
            let doy: u32 = token[4..].parse().ok()?;
            date_from_year_doy(year, doy)
        }
        8 => NaiveDate::parse_from_str(token, "%Y%m%d").ok(),
        _ => None,
    }
}

fn whole(v: f64) -> Option<i64> {
    (v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
}
