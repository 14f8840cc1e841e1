//! The scene clock.
//!
//! In-story time is tracked as an ISO-8601 duration measured from the start of
//! the scene. Years and months are kept as calendar months; everything below a
//! month is exact and stored as a [`TimeDelta`].

use crate::error::DurationError;
use chrono::TimeDelta;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(-)?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:[.,]\d+)?)S)?)?$",
    )
    .expect("valid duration regex")
});

const SECONDS_PER_DAY: i64 = 86_400;
/// Used only where months must be folded into exact time (human rendering,
/// mixed-sign normalization).
const DAYS_PER_MONTH: i64 = 30;

/// An ISO-8601 duration such as `P1DT2H`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IsoDuration {
    months: i64,
    time: TimeDelta,
}

impl Default for IsoDuration {
    fn default() -> Self {
        Self::zero()
    }
}

fn scaled_seconds(n: i64, unit: i64) -> Result<TimeDelta, DurationError> {
    n.checked_mul(unit)
        .and_then(TimeDelta::try_seconds)
        .ok_or(DurationError::Overflow)
}

fn saturating_seconds(n: i64, unit: i64) -> TimeDelta {
    scaled_seconds(n, unit).unwrap_or(if n < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}

impl IsoDuration {
    /// `PT0S`.
    pub fn zero() -> Self {
        Self {
            months: 0,
            time: TimeDelta::zero(),
        }
    }

    pub fn from_months(months: i64) -> Self {
        Self {
            months,
            time: TimeDelta::zero(),
        }
    }

    pub fn from_time(time: TimeDelta) -> Self {
        Self { months: 0, time }
    }

    /// Saturates at the largest representable span. See [`Self::try_days`].
    pub fn days(days: i64) -> Self {
        Self::from_time(saturating_seconds(days, SECONDS_PER_DAY))
    }

    pub fn hours(hours: i64) -> Self {
        Self::from_time(saturating_seconds(hours, 3_600))
    }

    pub fn minutes(minutes: i64) -> Self {
        Self::from_time(saturating_seconds(minutes, 60))
    }

    pub fn try_days(days: i64) -> Result<Self, DurationError> {
        scaled_seconds(days, SECONDS_PER_DAY).map(Self::from_time)
    }

    pub fn try_hours(hours: i64) -> Result<Self, DurationError> {
        scaled_seconds(hours, 3_600).map(Self::from_time)
    }

    pub fn try_minutes(minutes: i64) -> Result<Self, DurationError> {
        scaled_seconds(minutes, 60).map(Self::from_time)
    }

    /// Parse an ISO-8601 duration string.
    pub fn parse(s: &str) -> Result<Self, DurationError> {
        let s = s.trim();
        let invalid = || DurationError::Invalid(s.to_string());

        // "P" and "PT" match the pattern but carry no component
        if s.ends_with('P') || s.ends_with('T') {
            return Err(invalid());
        }

        let caps = ISO_DURATION.captures(s).ok_or_else(invalid)?;
        let int = |i: usize| -> Result<i64, DurationError> {
            match caps.get(i) {
                Some(m) => m.as_str().parse::<i64>().map_err(|_| invalid()),
                None => Ok(0),
            }
        };

        let years = int(2)?;
        let months = int(3)?;
        let weeks = int(4)?;
        let days = int(5)?;
        let hours = int(6)?;
        let minutes = int(7)?;
        let seconds: f64 = match caps.get(8) {
            Some(m) => m.as_str().replace(',', ".").parse().map_err(|_| invalid())?,
            None => 0.0,
        };

        let total_months = years
            .checked_mul(12)
            .and_then(|y| y.checked_add(months))
            .ok_or(DurationError::Overflow)?;

        let whole_seconds = weeks
            .checked_mul(7)
            .and_then(|w| w.checked_add(days))
            .and_then(|d| d.checked_mul(SECONDS_PER_DAY))
            .and_then(|s| s.checked_add(hours.checked_mul(3_600)?))
            .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
            .ok_or(DurationError::Overflow)?;
        let millis = whole_seconds
            .checked_mul(1_000)
            .and_then(|ms| ms.checked_add((seconds * 1_000.0).round() as i64))
            .ok_or(DurationError::Overflow)?;
        let time = TimeDelta::try_milliseconds(millis).ok_or(DurationError::Overflow)?;

        let parsed = Self {
            months: total_months,
            time,
        };

        if caps.get(1).is_some() {
            Ok(parsed.negated())
        } else {
            Ok(parsed)
        }
    }

    /// Calendar months (years folded in at twelve months each).
    pub fn months(&self) -> i64 {
        self.months
    }

    /// The exact part below one month.
    pub fn time(&self) -> TimeDelta {
        self.time
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.time.is_zero()
    }

    pub fn negated(self) -> Self {
        Self {
            months: -self.months,
            time: -self.time,
        }
    }

    pub fn checked_add(self, other: Self) -> Result<Self, DurationError> {
        Ok(Self {
            months: self
                .months
                .checked_add(other.months)
                .ok_or(DurationError::Overflow)?,
            time: self
                .time
                .checked_add(&other.time)
                .ok_or(DurationError::Overflow)?,
        })
    }

    pub fn checked_sub(self, other: Self) -> Result<Self, DurationError> {
        self.checked_add(other.negated())
    }

    /// Total length in milliseconds with months counted as thirty days.
    pub fn approx_millis(&self) -> i64 {
        self.months
            .saturating_mul(DAYS_PER_MONTH * SECONDS_PER_DAY * 1_000)
            .saturating_add(self.time.num_milliseconds())
    }

    /// Sign and absolute components, folding mixed-sign values into exact time.
    fn normalized(&self) -> (bool, i64, TimeDelta) {
        let months = self.months;
        let time = self.time;
        if months >= 0 && time >= TimeDelta::zero() {
            (false, months, time)
        } else if months <= 0 && time <= TimeDelta::zero() {
            (true, -months, -time)
        } else {
            let total = self.approx_millis();
            (total < 0, 0, TimeDelta::milliseconds(total.abs()))
        }
    }

    /// Render as prose, e.g. `"1 year, 2 months and 3 days"` plus `suffix`.
    ///
    /// Zero durations render as `zero` with no suffix.
    pub fn to_human(&self, suffix: &str, zero: &str) -> String {
        if self.is_zero() {
            return zero.to_string();
        }

        let (_, months, time) = self.normalized();
        let secs = time.num_seconds();
        let units = [
            (months / 12, "year"),
            (months % 12, "month"),
            (secs / SECONDS_PER_DAY, "day"),
            ((secs % SECONDS_PER_DAY) / 3_600, "hour"),
            ((secs % 3_600) / 60, "minute"),
            (secs % 60, "second"),
        ];

        let parts: Vec<String> = units
            .iter()
            .filter(|(n, _)| *n != 0)
            .map(|(n, unit)| {
                if *n == 1 {
                    format!("1 {unit}")
                } else {
                    format!("{n} {unit}s")
                }
            })
            .collect();

        if parts.is_empty() {
            // sub-second durations
            return zero.to_string();
        }

        let joined = match parts.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
            Some((last, _)) => last.clone(),
            None => String::new(),
        };

        format!("{joined}{suffix}")
    }
}

/// Describe how long ago `ts` was relative to the scene time `now`.
///
/// Returns `"Recently"` when no time separates them.
pub fn diff_to_human(ts: IsoDuration, now: IsoDuration) -> String {
    match now.checked_sub(ts) {
        Ok(diff) => diff.to_human(" ago", "Recently"),
        Err(_) => "Recently".to_string(),
    }
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("PT0S");
        }

        let (negative, months, time) = self.normalized();
        if negative {
            f.write_str("-")?;
        }
        f.write_str("P")?;

        let (years, months) = (months / 12, months % 12);
        let total_ms = time.num_milliseconds();
        let secs = total_ms / 1_000;
        let ms = total_ms % 1_000;
        let days = secs / SECONDS_PER_DAY;
        let hours = (secs % SECONDS_PER_DAY) / 3_600;
        let minutes = (secs % 3_600) / 60;
        let seconds = secs % 60;

        if years != 0 {
            write!(f, "{years}Y")?;
        }
        if months != 0 {
            write!(f, "{months}M")?;
        }
        if days != 0 {
            write!(f, "{days}D")?;
        }
        if hours != 0 || minutes != 0 || seconds != 0 || ms != 0 {
            f.write_str("T")?;
            if hours != 0 {
                write!(f, "{hours}H")?;
            }
            if minutes != 0 {
                write!(f, "{minutes}M")?;
            }
            if ms != 0 {
                let frac = format!("{ms:03}");
                write!(f, "{seconds}.{}S", frac.trim_end_matches('0'))?;
            } else if seconds != 0 {
                write!(f, "{seconds}S")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IsoDuration({self})")
    }
}

impl FromStr for IsoDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IsoDuration {
    type Error = DurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<IsoDuration> for String {
    fn from(d: IsoDuration) -> Self {
        d.to_string()
    }
}
