//! Cron expression parsing and evaluation
//!
//! Standard five-field expressions (`minute hour day-of-month month
//! day-of-week`) with `*`, lists, ranges and steps, evaluated in UTC.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Upper bound on search steps; each step advances at least one minute and
/// usually a whole hour, day or month.
const MAX_SEARCH_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CronError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(text: &str, name: &str, min: u32, max: u32) -> Result<Self, CronError> {
        let mut bits = 0u64;
        for part in text.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| CronError(format!("invalid step in {} field: {:?}", name, part)))?;
                    if step == 0 {
                        return Err(CronError(format!("zero step in {} field", name)));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (parse_value(a, name)?, parse_value(b, name)?)
            } else {
                let value = parse_value(range, name)?;
                // "5/15" means every 15 starting at 5
                (value, if part.contains('/') { max } else { value })
            };

            if start < min || end > max || start > end {
                return Err(CronError(format!(
                    "{} field out of range {}-{}: {:?}",
                    name, min, max, part
                )));
            }

            for value in (start..=end).step_by(step as usize) {
                bits |= 1u64 << value;
            }
        }

        Ok(Self {
            bits,
            restricted: text != "*",
        })
    }
}

fn parse_value(text: &str, name: &str) -> Result<u32, CronError> {
    text.parse()
        .map_err(|_| CronError(format!("invalid value in {} field: {:?}", name, text)))
}

/// A parsed recurring-trigger expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError(format!(
                "expected 5 fields, found {}",
                fields.len()
            )));
        }

        let mut day_of_week = Field::parse(fields[4], "day-of-week", 0, 7)?;
        // 7 and 0 both mean Sunday
        if day_of_week.contains(7) {
            day_of_week.bits |= 1;
        }

        Ok(Self {
            expression: fields.join(" "),
            minute: Field::parse(fields[0], "minute", 0, 59)?,
            hour: Field::parse(fields[1], "hour", 0, 23)?,
            day_of_month: Field::parse(fields[2], "day-of-month", 1, 31)?,
            month: Field::parse(fields[3], "month", 1, 12)?,
            day_of_week,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.day_of_month.contains(t.day());
        let dow = self.day_of_week.contains(t.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted either may match
        if self.day_of_month.restricted && self.day_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// The first matching minute strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let whole_minute = after.timestamp() - after.timestamp().rem_euclid(60);
        let mut t = DateTime::from_timestamp(whole_minute, 0)? + Duration::minutes(1);

        for _ in 0..MAX_SEARCH_STEPS {
            if !self.month.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = (t.date_naive() + Duration::days(1))
                    .and_hms_opt(0, 0, 0)?
                    .and_utc();
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
