//! Date, time and duration values
//!
//! The seven-property date/time model of XSD 1.0 flattened to a timeline:
//! every value maps to a number of seconds since 0001-01-01T00:00:00Z, with
//! the fields a kind lacks filled from a fixed reference. Values of different
//! kinds never compare.

use crate::error::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const TZ: &str = r"(Z|[+-]\d{2}:\d{2})?";
const YEAR: &str = r"(-?(?:[1-9]\d{4,}|\d{4}))";
const SECONDS_PER_DAY: i64 = 86_400;
/// Fourteen hours, the widest timezone offset
const TZ_SPAN: i64 = 14 * 3600;

static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^{}-(\d{{2}})-(\d{{2}})T(\d{{2}}):(\d{{2}}):(\d{{2}}(?:\.\d+)?){}$",
        YEAR, TZ
    ))
    .unwrap()
});
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(\d{{2}}):(\d{{2}}):(\d{{2}}(?:\.\d+)?){}$", TZ)).unwrap()
});
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^{}-(\d{{2}})-(\d{{2}}){}$", YEAR, TZ)).unwrap());
static YEAR_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^{}-(\d{{2}}){}$", YEAR, TZ)).unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^{}{}$", YEAR, TZ)).unwrap());
static MONTH_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^--(\d{{2}})-(\d{{2}}){}$", TZ)).unwrap());
static DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^---(\d{{2}}){}$", TZ)).unwrap());
static MONTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^--(\d{{2}}){}$", TZ)).unwrap());
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(-)?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
    )
    .unwrap()
});

/// Which date/time primitive a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DateTimeKind {
    DateTime,
    Time,
    Date,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
}

/// A date/time value of any of the eight date/time primitives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeValue {
    /// Primitive kind
    pub kind: DateTimeKind,
    /// Year (no year zero; -1 is 1 BCE)
    pub year: i64,
    /// Month, 1-12
    pub month: u32,
    /// Day, 1-31
    pub day: u32,
    /// Hour, 0-24
    pub hour: u32,
    /// Minute
    pub minute: u32,
    /// Seconds with fraction
    pub second: Decimal,
    /// Timezone offset in minutes
    pub timezone: Option<i32>,
}

fn field<T: FromStr>(caps: &Captures<'_>, i: usize) -> Option<T> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

fn parse_timezone(tz: Option<&str>) -> Result<Option<i32>> {
    let Some(tz) = tz else {
        return Ok(None);
    };
    if tz == "Z" {
        return Ok(Some(0));
    }
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let hours: i32 = tz[1..3].parse().map_err(|_| Error::value("invalid timezone"))?;
    let minutes: i32 = tz[4..6].parse().map_err(|_| Error::value("invalid timezone"))?;
    if minutes > 59 || hours > 14 || (hours == 14 && minutes != 0) {
        return Err(Error::value(format!("timezone '{}' out of range", tz)));
    }
    Ok(Some(sign * (hours * 60 + minutes)))
}

fn chrono_year(year: i64) -> Option<i32> {
    let y = if year < 0 { year + 1 } else { year };
    i32::try_from(y).ok()
}

fn calendar_date(year: i64, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(chrono_year(year)?, month, day)
}

impl DateTimeValue {
    /// Parse the lexical form of `kind`
    pub fn parse(kind: DateTimeKind, s: &str) -> Result<Self> {
        let bad = || Error::value(format!("'{}' is not a valid {}", s, kind.type_name()));
        let re: &Regex = match kind {
            DateTimeKind::DateTime => &DATE_TIME_RE,
            DateTimeKind::Time => &TIME_RE,
            DateTimeKind::Date => &DATE_RE,
            DateTimeKind::GYearMonth => &YEAR_MONTH_RE,
            DateTimeKind::GYear => &YEAR_RE,
            DateTimeKind::GMonthDay => &MONTH_DAY_RE,
            DateTimeKind::GDay => &DAY_RE,
            DateTimeKind::GMonth => &MONTH_RE,
        };
        let caps = re.captures(s).ok_or_else(bad)?;
        let count = caps.len();
        let timezone = parse_timezone(caps.get(count - 1).map(|m| m.as_str()))?;

        // Reference fields for the parts a kind lacks; 2000 is a leap year
        let mut value = DateTimeValue {
            kind,
            year: 2000,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: Decimal::ZERO,
            timezone,
        };
        let mut i = 1;
        if matches!(
            kind,
            DateTimeKind::DateTime | DateTimeKind::Date | DateTimeKind::GYearMonth | DateTimeKind::GYear
        ) {
            value.year = field(&caps, i).ok_or_else(bad)?;
            if value.year == 0 {
                return Err(Error::value(format!("'{}': year 0000 is not allowed", s)));
            }
            i += 1;
        }
        if !matches!(kind, DateTimeKind::Time | DateTimeKind::GYear | DateTimeKind::GDay) {
            value.month = field(&caps, i).ok_or_else(bad)?;
            i += 1;
        }
        if matches!(
            kind,
            DateTimeKind::DateTime | DateTimeKind::Date | DateTimeKind::GMonthDay | DateTimeKind::GDay
        ) {
            value.day = field(&caps, i).ok_or_else(bad)?;
            i += 1;
        }
        if matches!(kind, DateTimeKind::DateTime | DateTimeKind::Time) {
            value.hour = field(&caps, i).ok_or_else(bad)?;
            value.minute = field(&caps, i + 1).ok_or_else(bad)?;
            value.second = caps
                .get(i + 2)
                .and_then(|m| Decimal::from_str(m.as_str()).ok())
                .ok_or_else(bad)?;
        }

        if !(1..=12).contains(&value.month) {
            return Err(Error::value(format!("'{}': month out of range", s)));
        }
        if calendar_date(value.year, value.month, value.day).is_none() {
            if chrono_year(value.year).is_none() {
                return Err(Error::value(format!("'{}': year out of supported range", s)));
            }
            return Err(Error::value(format!("'{}': day out of range for month", s)));
        }
        let end_of_day = value.hour == 24 && value.minute == 0 && value.second.is_zero();
        if (value.hour > 23 && !end_of_day) || value.minute > 59 || value.second >= Decimal::from(60) {
            return Err(Error::value(format!("'{}': time out of range", s)));
        }
        Ok(value)
    }

    /// Seconds on the timeline, adjusted to UTC when a timezone is present
    fn timeline(&self) -> Decimal {
        let days = calendar_date(self.year, self.month, self.day)
            .map(|d| d.num_days_from_ce() as i64)
            .unwrap_or(0);
        let seconds = days * SECONDS_PER_DAY
            + self.hour as i64 * 3600
            + self.minute as i64 * 60
            - self.timezone.unwrap_or(0) as i64 * 60;
        Decimal::from(seconds) + self.second
    }

    /// The XSD partial order; `None` when incomparable
    pub fn partial_cmp_value(&self, other: &Self) -> Option<Ordering> {
        if self.kind != other.kind {
            return None;
        }
        let (a, b) = (self.timeline(), other.timeline());
        match (self.timezone.is_some(), other.timezone.is_some()) {
            (true, true) | (false, false) => Some(a.cmp(&b)),
            (true, false) => zoned_vs_local(a, b),
            (false, true) => zoned_vs_local(b, a).map(Ordering::reverse),
        }
    }

    /// Value equality
    pub fn value_eq(&self, other: &Self) -> bool {
        self.partial_cmp_value(other) == Some(Ordering::Equal)
            && self.timezone.is_some() == other.timezone.is_some()
    }

    /// Canonical timeline key for hashing (kind, seconds, has timezone)
    pub fn key(&self) -> (DateTimeKind, String, bool) {
        (self.kind, self.timeline().normalize().to_string(), self.timezone.is_some())
    }

    /// Fields normalized to UTC, with 24:00:00 rolled into the next day
    fn normalized(&self) -> DateTimeValue {
        let needs_shift = matches!(self.kind, DateTimeKind::DateTime | DateTimeKind::Time)
            && (self.timezone.is_some_and(|tz| tz != 0) || self.hour == 24);
        if !needs_shift {
            return self.clone();
        }
        let total = self.timeline();
        let day_secs = Decimal::from(SECONDS_PER_DAY);
        let days = (total / day_secs).floor();
        let rest = total - days * day_secs;
        let whole = rest.trunc().to_i64().unwrap_or(0);
        let date = days
            .to_i64()
            .and_then(|d| i32::try_from(d).ok())
            .and_then(NaiveDate::from_num_days_from_ce_opt);
        let Some(date) = date else {
            return self.clone();
        };
        let year = date.year() as i64;
        DateTimeValue {
            kind: self.kind,
            year: if year <= 0 { year - 1 } else { year },
            month: if self.kind == DateTimeKind::Time { self.month } else { date.month() },
            day: if self.kind == DateTimeKind::Time { self.day } else { date.day() },
            hour: (whole / 3600) as u32,
            minute: ((whole % 3600) / 60) as u32,
            second: rest - Decimal::from(whole - whole % 60),
            timezone: self.timezone.map(|_| 0),
        }
    }
}

fn zoned_vs_local(zoned: Decimal, local: Decimal) -> Option<Ordering> {
    let span = Decimal::from(TZ_SPAN);
    if zoned < local - span {
        Some(Ordering::Less)
    } else if zoned > local + span {
        Some(Ordering::Greater)
    } else {
        None
    }
}

impl DateTimeKind {
    /// Schema name of the primitive
    pub fn type_name(&self) -> &'static str {
        match self {
            DateTimeKind::DateTime => "dateTime",
            DateTimeKind::Time => "time",
            DateTimeKind::Date => "date",
            DateTimeKind::GYearMonth => "gYearMonth",
            DateTimeKind::GYear => "gYear",
            DateTimeKind::GMonthDay => "gMonthDay",
            DateTimeKind::GDay => "gDay",
            DateTimeKind::GMonth => "gMonth",
        }
    }
}

fn write_year(f: &mut fmt::Formatter<'_>, year: i64) -> fmt::Result {
    if year < 0 {
        write!(f, "-{:04}", -year)
    } else {
        write!(f, "{:04}", year)
    }
}

fn write_seconds(f: &mut fmt::Formatter<'_>, second: Decimal) -> fmt::Result {
    let second = second.normalize();
    let whole = second.trunc().to_u32().unwrap_or(0);
    let frac = second - second.trunc();
    write!(f, "{:02}", whole)?;
    if !frac.is_zero() {
        let text = frac.to_string();
        f.write_str(text.trim_start_matches('0'))?;
    }
    Ok(())
}

impl fmt::Display for DateTimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.normalized();
        match v.kind {
            DateTimeKind::DateTime => {
                write_year(f, v.year)?;
                write!(f, "-{:02}-{:02}T{:02}:{:02}:", v.month, v.day, v.hour, v.minute)?;
                write_seconds(f, v.second)?;
            }
            DateTimeKind::Time => {
                write!(f, "{:02}:{:02}:", v.hour, v.minute)?;
                write_seconds(f, v.second)?;
            }
            DateTimeKind::Date => {
                write_year(f, v.year)?;
                write!(f, "-{:02}-{:02}", v.month, v.day)?;
            }
            DateTimeKind::GYearMonth => {
                write_year(f, v.year)?;
                write!(f, "-{:02}", v.month)?;
            }
            DateTimeKind::GYear => write_year(f, v.year)?,
            DateTimeKind::GMonthDay => write!(f, "--{:02}-{:02}", v.month, v.day)?,
            DateTimeKind::GDay => write!(f, "---{:02}", v.day)?,
            DateTimeKind::GMonth => write!(f, "--{:02}", v.month)?,
        }
        match v.timezone {
            None => Ok(()),
            Some(0) => f.write_str("Z"),
            Some(tz) => {
                let sign = if tz < 0 { '-' } else { '+' };
                write!(f, "{}{:02}:{:02}", sign, tz.abs() / 60, tz.abs() % 60)
            }
        }
    }
}

// =============================================================================
// Durations
// =============================================================================

/// A duration as a (months, seconds) pair sharing one sign
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DurationValue {
    /// Total months
    pub months: i64,
    /// Total seconds (days, hours and minutes folded in)
    pub seconds: Decimal,
}

/// Reference starting points for comparing durations
const DURATION_REFERENCES: [(i32, u32); 4] = [(1696, 9), (1697, 2), (1903, 3), (1903, 7)];

impl DurationValue {
    /// Parse an `xs:duration` lexical form
    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Error::value(format!("'{}' is not a valid duration", s));
        let caps = DURATION_RE.captures(s).ok_or_else(bad)?;
        if (2..=7).all(|i| caps.get(i).is_none()) || s.ends_with('T') {
            return Err(bad());
        }
        let int = |i: usize| -> Result<i64> {
            match caps.get(i) {
                None => Ok(0),
                Some(m) => m.as_str().parse::<i64>().map_err(|_| bad()),
            }
        };
        let months = int(2)?
            .checked_mul(12)
            .and_then(|y| y.checked_add(int(3).ok()?))
            .ok_or_else(bad)?;
        let whole = int(4)?
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|d| d.checked_add(int(5).ok()?.checked_mul(3600)?))
            .and_then(|d| d.checked_add(int(6).ok()?.checked_mul(60)?))
            .ok_or_else(bad)?;
        let secs = match caps.get(7) {
            None => Decimal::ZERO,
            Some(m) => Decimal::from_str(m.as_str()).map_err(|_| bad())?,
        };
        let negative = caps.get(1).is_some();
        let seconds = Decimal::from(whole) + secs;
        Ok(if negative {
            DurationValue { months: -months, seconds: -seconds }
        } else {
            DurationValue { months, seconds }
        })
    }

    fn after(&self, year: i32, month: u32) -> Option<Decimal> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let shifted = if self.months >= 0 {
            start.checked_add_months(Months::new(u32::try_from(self.months).ok()?))?
        } else {
            start.checked_sub_months(Months::new(u32::try_from(-self.months).ok()?))?
        };
        Some(Decimal::from(shifted.num_days_from_ce() as i64 * SECONDS_PER_DAY) + self.seconds)
    }

    /// The XSD partial order on durations
    pub fn partial_cmp_value(&self, other: &Self) -> Option<Ordering> {
        let mut result = None;
        for (year, month) in DURATION_REFERENCES {
            let ord = self.after(year, month)?.cmp(&other.after(year, month)?);
            match result {
                None => result = Some(ord),
                Some(prev) if prev != ord => return None,
                _ => {}
            }
        }
        result
    }

    /// Value equality
    pub fn value_eq(&self, other: &Self) -> bool {
        self.months == other.months && self.seconds == other.seconds
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.months < 0 || (self.seconds.is_sign_negative() && !self.seconds.is_zero());
        if negative {
            f.write_str("-")?;
        }
        f.write_str("P")?;
        let months = self.months.abs();
        let seconds = self.seconds.abs().normalize();
        if months == 0 && seconds.is_zero() {
            return f.write_str("T0S");
        }
        if months / 12 > 0 {
            write!(f, "{}Y", months / 12)?;
        }
        if months % 12 > 0 {
            write!(f, "{}M", months % 12)?;
        }
        let whole = seconds.trunc().to_i64().unwrap_or(0);
        let frac = seconds - seconds.trunc();
        let days = whole / SECONDS_PER_DAY;
        let hours = (whole % SECONDS_PER_DAY) / 3600;
        let minutes = (whole % 3600) / 60;
        let secs = Decimal::from(whole % 60) + frac;
        if days > 0 {
            write!(f, "{}D", days)?;
        }
        if hours > 0 || minutes > 0 || !secs.is_zero() {
            f.write_str("T")?;
            if hours > 0 {
                write!(f, "{}H", hours)?;
            }
            if minutes > 0 {
                write!(f, "{}M", minutes)?;
            }
            if !secs.is_zero() {
                write!(f, "{}S", secs.normalize())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(kind: DateTimeKind, s: &str) -> DateTimeValue {
        DateTimeValue::parse(kind, s).unwrap()
    }

    #[test]
    fn test_parse_date_family() {
        assert!(DateTimeValue::parse(DateTimeKind::Date, "2024-02-29").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::Date, "2023-02-29").is_err());
        assert!(DateTimeValue::parse(DateTimeKind::Date, "0000-01-01").is_err());
        assert!(DateTimeValue::parse(DateTimeKind::GMonthDay, "--02-29").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::GDay, "---31").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::GMonth, "--13").is_err());
        assert!(DateTimeValue::parse(DateTimeKind::GYear, "-0044").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::Date, "2024-1-01").is_err());
    }

    #[test]
    fn test_parse_time_and_timezones() {
        assert!(DateTimeValue::parse(DateTimeKind::Time, "13:20:00.5Z").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::Time, "24:00:00").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::Time, "24:00:01").is_err());
        assert!(DateTimeValue::parse(DateTimeKind::Time, "12:60:00").is_err());
        assert!(DateTimeValue::parse(DateTimeKind::DateTime, "2024-01-01T00:00:00+14:00").is_ok());
        assert!(DateTimeValue::parse(DateTimeKind::DateTime, "2024-01-01T00:00:00+14:30").is_err());
    }

    #[test]
    fn test_ordering_with_timezones() {
        let a = dt(DateTimeKind::DateTime, "2024-01-01T12:00:00Z");
        let b = dt(DateTimeKind::DateTime, "2024-01-01T13:00:00+01:00");
        assert!(a.value_eq(&b));

        let local = dt(DateTimeKind::DateTime, "2024-01-01T12:00:00");
        assert_eq!(a.partial_cmp_value(&local), None);
        let far = dt(DateTimeKind::DateTime, "2024-01-03T12:00:00");
        assert_eq!(a.partial_cmp_value(&far), Some(Ordering::Less));
        assert_eq!(far.partial_cmp_value(&a), Some(Ordering::Greater));
    }

    #[test]
    fn test_kinds_do_not_compare() {
        let d = dt(DateTimeKind::Date, "2024-01-01");
        let y = dt(DateTimeKind::GYear, "2024");
        assert_eq!(d.partial_cmp_value(&y), None);
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(
            dt(DateTimeKind::DateTime, "2024-01-01T23:30:00-01:00").to_string(),
            "2024-01-02T00:30:00Z"
        );
        assert_eq!(
            dt(DateTimeKind::DateTime, "2024-12-31T24:00:00").to_string(),
            "2025-01-01T00:00:00"
        );
        assert_eq!(dt(DateTimeKind::Time, "10:00:00.500").to_string(), "10:00:00.5");
        assert_eq!(dt(DateTimeKind::Date, "2024-03-01+05:00").to_string(), "2024-03-01+05:00");
        assert_eq!(dt(DateTimeKind::GMonthDay, "--12-25").to_string(), "--12-25");
    }

    #[test]
    fn test_duration_parse() {
        let d = DurationValue::parse("P1Y2M3DT4H5M6.5S").unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.seconds, Decimal::from_str("273906.5").unwrap());
        assert!(DurationValue::parse("P").is_err());
        assert!(DurationValue::parse("P1DT").is_err());
        assert!(DurationValue::parse("PT1.S").is_err());
        assert_eq!(DurationValue::parse("-P1D").unwrap().seconds, Decimal::from(-86_400));
    }

    #[test]
    fn test_duration_order() {
        let p = |s| DurationValue::parse(s).unwrap();
        assert_eq!(p("P1Y").partial_cmp_value(&p("P364D")), Some(Ordering::Greater));
        assert_eq!(p("P1M").partial_cmp_value(&p("P30D")), None);
        assert!(p("P1D").value_eq(&p("PT24H")));
        assert!(!p("P1M").value_eq(&p("P30D")));
    }

    #[test]
    fn test_duration_canonical() {
        let p = |s| DurationValue::parse(s).unwrap().to_string();
        assert_eq!(p("P14M"), "P1Y2M");
        assert_eq!(p("PT36H"), "P1DT12H");
        assert_eq!(p("PT0S"), "PT0S");
        assert_eq!(p("-PT1.50S"), "-PT1.5S");
    }
}
