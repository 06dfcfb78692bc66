//! Decoding of CF-convention time axes (`<unit> since <reference>`) into calendar dates.
//!
//! CMIP6 models use a handful of model calendars besides the Gregorian one, so dates are
//! represented by [`CfDate`] rather than `chrono::NaiveDate` (a 360-day year has a 30 February).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, TimeDelta};

use crate::error::ClimprojError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CfDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CfDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// `YYYYMMDD`, the representation used in point tables.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for CfDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Standard,
    NoLeap,
    AllLeap,
    Day360,
}

impl Calendar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Calendar::Standard => "standard",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
        }
    }
}

impl FromStr for Calendar {
    type Err = ClimprojError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "standard" | "gregorian" | "proleptic_gregorian" | "julian" => {
                Ok(Calendar::Standard)
            }
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(ClimprojError::TimeEncoding(format!(
                "unsupported calendar '{other}'"
            ))),
        }
    }
}

/// Offsets beyond roughly 27,000 years are treated as fill values, not dates.
const MAX_OFFSET_DAYS: f64 = 10_000_000.0;

const NOLEAP_MONTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const ALL_LEAP_MONTHS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Parsed `units` attribute of a time coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    days_per_unit: f64,
    reference: CfDate,
    reference_day_fraction: f64,
}

impl FromStr for TimeUnits {
    type Err = ClimprojError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ClimprojError::TimeEncoding(format!("invalid time units '{value}'"));
        let (unit, reference) = value.trim().split_once(" since ").ok_or_else(invalid)?;
        let days_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => 1.0,
            "hours" | "hour" | "h" => 1.0 / 24.0,
            "minutes" | "minute" | "min" => 1.0 / 1440.0,
            "seconds" | "second" | "s" => 1.0 / 86400.0,
            _ => return Err(invalid()),
        };

        let reference = reference.trim().replace('T', " ");
        let mut parts = reference.split_whitespace();
        let date = parts.next().ok_or_else(invalid)?;
        let mut fields = date.split('-');
        let year = fields
            .next()
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(invalid)?;
        let month = fields
            .next()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| invalid())?
            .unwrap_or(1);
        let day = fields
            .next()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| invalid())?
            .unwrap_or(1);
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(invalid());
        }

        let reference_day_fraction = match parts.next() {
            Some(clock) => {
                let mut hms = clock.split(':').map(|v| v.parse::<f64>());
                let hours = hms.next().transpose().map_err(|_| invalid())?.unwrap_or(0.0);
                let minutes = hms.next().transpose().map_err(|_| invalid())?.unwrap_or(0.0);
                let seconds = hms.next().transpose().map_err(|_| invalid())?.unwrap_or(0.0);
                (hours * 3600.0 + minutes * 60.0 + seconds) / 86400.0
            }
            None => 0.0,
        };

        Ok(Self {
            days_per_unit,
            reference: CfDate::new(year, month, day),
            reference_day_fraction,
        })
    }
}

impl TimeUnits {
    pub fn decode(&self, value: f64, calendar: Calendar) -> Result<CfDate, ClimprojError> {
        if !value.is_finite() {
            return Err(ClimprojError::TimeEncoding(format!(
                "non-finite time value {value}"
            )));
        }
        let days = (value * self.days_per_unit + self.reference_day_fraction).floor();
        if days.abs() > MAX_OFFSET_DAYS {
            return Err(ClimprojError::TimeEncoding(format!(
                "time value {value} is out of range"
            )));
        }
        let offset = days as i64;
        match calendar {
            Calendar::Standard => decode_gregorian(self.reference, offset),
            Calendar::NoLeap => decode_fixed(self.reference, offset, &NOLEAP_MONTHS),
            Calendar::AllLeap => decode_fixed(self.reference, offset, &ALL_LEAP_MONTHS),
            Calendar::Day360 => decode_360(self.reference, offset),
        }
    }
}

/// Decode every value of a time coordinate.
pub fn decode_axis(
    values: &[f64],
    units: &str,
    calendar: &str,
) -> Result<Vec<CfDate>, ClimprojError> {
    let units: TimeUnits = units.parse()?;
    let calendar: Calendar = calendar.parse()?;
    values
        .iter()
        .map(|value| units.decode(*value, calendar))
        .collect()
}

fn decode_gregorian(reference: CfDate, offset: i64) -> Result<CfDate, ClimprojError> {
    let base = NaiveDate::from_ymd_opt(reference.year, reference.month, reference.day)
        .ok_or_else(|| ClimprojError::TimeEncoding(format!("invalid reference date {reference}")))?;
    let date = TimeDelta::try_days(offset)
        .and_then(|delta| base.checked_add_signed(delta))
        .ok_or_else(|| out_of_range(offset))?;
    Ok(CfDate::new(date.year(), date.month(), date.day()))
}

fn out_of_range(offset: i64) -> ClimprojError {
    ClimprojError::TimeEncoding(format!("time offset {offset} days out of range"))
}

fn calendar_year(year: i64, offset: i64) -> Result<i32, ClimprojError> {
    i32::try_from(year).map_err(|_| out_of_range(offset))
}

fn decode_fixed(
    reference: CfDate,
    offset: i64,
    months: &[u32; 12],
) -> Result<CfDate, ClimprojError> {
    let year_len: i64 = months.iter().map(|days| i64::from(*days)).sum();
    let month_index = (reference.month - 1) as usize;
    let day_of_year: i64 = months[..month_index]
        .iter()
        .map(|days| i64::from(*days))
        .sum::<i64>()
        + i64::from(reference.day.min(months[month_index]))
        - 1;
    let absolute = i64::from(reference.year)
        .checked_mul(year_len)
        .and_then(|days| days.checked_add(day_of_year + offset))
        .ok_or_else(|| out_of_range(offset))?;

    let year = absolute.div_euclid(year_len);
    let mut remaining = absolute.rem_euclid(year_len);
    let mut month = 1u32;
    for days in months {
        let days = i64::from(*days);
        if remaining < days {
            break;
        }
        remaining -= days;
        month += 1;
    }
    Ok(CfDate::new(
        calendar_year(year, offset)?,
        month,
        remaining as u32 + 1,
    ))
}

fn decode_360(reference: CfDate, offset: i64) -> Result<CfDate, ClimprojError> {
    let day_of_year =
        i64::from(reference.month - 1) * 30 + i64::from(reference.day.min(30)) - 1;
    let absolute = i64::from(reference.year)
        .checked_mul(360)
        .and_then(|days| days.checked_add(day_of_year + offset))
        .ok_or_else(|| out_of_range(offset))?;
    let year = absolute.div_euclid(360);
    let day_of_year = absolute.rem_euclid(360);
    Ok(CfDate::new(
        calendar_year(year, offset)?,
        (day_of_year / 30) as u32 + 1,
        (day_of_year % 30) as u32 + 1,
    ))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn standard_calendar_days_since() {
        let dates = decode_axis(&[0.5, 59.5, 60.5], "days since 2000-01-01", "standard").unwrap();
        assert_eq!(dates[0], CfDate::new(2000, 1, 1));
        assert_eq!(dates[1], CfDate::new(2000, 2, 29));
        assert_eq!(dates[2], CfDate::new(2000, 3, 1));
    }

    #[test]
    fn noleap_calendar_skips_february_29() {
        let units: TimeUnits = "days since 1850-01-01 00:00:00".parse().unwrap();
        // 2000-02-28 in a 365-day calendar is (2000 - 1850) * 365 + 58 days after the origin.
        let offset = (150 * 365 + 58) as f64;
        assert_eq!(
            units.decode(offset + 0.5, Calendar::NoLeap).unwrap(),
            CfDate::new(2000, 2, 28)
        );
        assert_eq!(
            units.decode(offset + 1.5, Calendar::NoLeap).unwrap(),
            CfDate::new(2000, 3, 1)
        );
    }

    #[test]
    fn day360_calendar_has_thirty_day_months() {
        let units: TimeUnits = "days since 2015-01-01".parse().unwrap();
        assert_eq!(
            units.decode(59.0, Calendar::Day360).unwrap(),
            CfDate::new(2015, 2, 30)
        );
        assert_eq!(
            units.decode(360.0, Calendar::Day360).unwrap(),
            CfDate::new(2016, 1, 1)
        );
    }

    #[test]
    fn hours_since_with_clock_reference() {
        let dates = decode_axis(&[36.0], "hours since 2020-12-31 12:00:00", "gregorian").unwrap();
        assert_eq!(dates[0], CfDate::new(2021, 1, 2));
        assert_eq!(dates[0].compact(), "20210102");
    }

    #[test]
    fn fill_sized_time_values_are_errors() {
        let units: TimeUnits = "days since 2015-01-01".parse().unwrap();
        for calendar in [
            Calendar::Standard,
            Calendar::NoLeap,
            Calendar::AllLeap,
            Calendar::Day360,
        ] {
            assert_matches!(
                units.decode(9.96921e36, calendar),
                Err(ClimprojError::TimeEncoding(_))
            );
            assert_matches!(
                units.decode(-1.0e12, calendar),
                Err(ClimprojError::TimeEncoding(_))
            );
        }
        let far: TimeUnits = "days since 2147483647-01-01".parse().unwrap();
        assert_matches!(
            far.decode(400.0, Calendar::NoLeap),
            Err(ClimprojError::TimeEncoding(_))
        );
    }

    #[test]
    fn rejects_unknown_encodings() {
        assert_matches!(
            "fortnights since 2000-01-01".parse::<TimeUnits>(),
            Err(ClimprojError::TimeEncoding(_))
        );
        assert_matches!("julian_day".parse::<Calendar>(), Err(ClimprojError::TimeEncoding(_)));
    }
}
