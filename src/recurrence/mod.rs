//! Recurrence rules: the supported RRULE subset and its expansion engine.
//!
//! Pure and deterministic; no I/O. The subset is
//! `FREQ=(DAILY|WEEKLY|MONTHLY|YEARLY);INTERVAL=n;(COUNT=n|UNTIL=<UTC>);
//! BYDAY=<list>;BYMONTHDAY=<list>;BYMONTH=<list>` — anything else is a hard
//! error. Exactly one of COUNT/UNTIL must be present.

mod expand;

pub use expand::{
    DEFAULT_MAX_OCCURRENCES, ExceptionSpec, Occurrence, SeriesNode, apply_exceptions, expand,
    expand_series,
};

use chrono::{NaiveDateTime, Weekday};
use thiserror::Error;

use crate::models::recurrence_rule::Model as RecurrenceRuleModel;

/// Errors raised while parsing or expanding recurrence rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("recurrence rule must set exactly one of COUNT and UNTIL")]
    CountAndUntil,

    #[error("recurrence rule is missing FREQ")]
    MissingFrequency,

    #[error("unknown recurrence frequency: {0}")]
    UnknownFrequency(String),

    #[error("unsupported RRULE component: {0}")]
    UnsupportedComponent(String),

    #[error("invalid RRULE value for {component}: {value}")]
    InvalidValue { component: String, value: String },

    #[error("invalid IANA timezone: {0}")]
    InvalidTimezone(String),

    #[error("recurrence expansion too broad: {got} occurrences exceeds limit {limit}")]
    TooBroad { got: usize, limit: usize },
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    pub fn parse(value: &str) -> Result<Self, RecurrenceError> {
        match value {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(RecurrenceError::UnknownFrequency(other.to_string())),
        }
    }
}

/// How a rule terminates. Exactly one of the two (I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEnd {
    /// Total number of occurrences, counted from the anchor.
    Count(u32),
    /// Last instant (UTC naive) an occurrence may start.
    Until(NaiveDateTime),
}

/// A validated recurrence rule in the supported subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: RuleEnd,
    /// Sorted Monday-first, deduplicated.
    pub by_weekday: Vec<Weekday>,
    /// Sorted, deduplicated, each in 1..=31.
    pub by_month_day: Vec<u8>,
    /// Sorted, deduplicated, each in 1..=12.
    pub by_month: Vec<u8>,
}

const UNTIL_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_weekday_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

impl RuleSpec {
    /// Validates invariant bounds shared by the parser and the entity mapper.
    fn validate(mut self) -> Result<Self, RecurrenceError> {
        if self.interval < 1 {
            return Err(RecurrenceError::InvalidValue {
                component: "INTERVAL".to_string(),
                value: self.interval.to_string(),
            });
        }
        if let RuleEnd::Count(0) = self.end {
            return Err(RecurrenceError::InvalidValue {
                component: "COUNT".to_string(),
                value: "0".to_string(),
            });
        }
        for day in &self.by_month_day {
            if *day < 1 || *day > 31 {
                return Err(RecurrenceError::InvalidValue {
                    component: "BYMONTHDAY".to_string(),
                    value: day.to_string(),
                });
            }
        }
        for month in &self.by_month {
            if *month < 1 || *month > 12 {
                return Err(RecurrenceError::InvalidValue {
                    component: "BYMONTH".to_string(),
                    value: month.to_string(),
                });
            }
        }

        self.by_weekday
            .sort_by_key(|d| d.num_days_from_monday());
        self.by_weekday.dedup();
        self.by_month_day.sort_unstable();
        self.by_month_day.dedup();
        self.by_month.sort_unstable();
        self.by_month.dedup();
        Ok(self)
    }

    /// Parses an RFC-5545 RRULE string restricted to the supported subset.
    pub fn from_rrule_str(input: &str) -> Result<Self, RecurrenceError> {
        let mut frequency = None;
        let mut interval: u32 = 1;
        let mut count = None;
        let mut until = None;
        let mut by_weekday = Vec::new();
        let mut by_month_day = Vec::new();
        let mut by_month = Vec::new();

        for part in input.trim().trim_end_matches(';').split(';') {
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(RecurrenceError::InvalidValue {
                    component: "RRULE".to_string(),
                    value: part.to_string(),
                });
            };
            let invalid = |value: &str| RecurrenceError::InvalidValue {
                component: key.to_string(),
                value: value.to_string(),
            };

            match key {
                "FREQ" => frequency = Some(Frequency::parse(value)?),
                "INTERVAL" => {
                    interval = value.parse().map_err(|_| invalid(value))?;
                }
                "COUNT" => {
                    count = Some(value.parse().map_err(|_| invalid(value))?);
                }
                "UNTIL" => {
                    until = Some(
                        NaiveDateTime::parse_from_str(value, UNTIL_FORMAT)
                            .map_err(|_| invalid(value))?,
                    );
                }
                "BYDAY" => {
                    for code in value.split(',') {
                        by_weekday.push(parse_weekday_code(code).ok_or_else(|| invalid(code))?);
                    }
                }
                "BYMONTHDAY" => {
                    for day in value.split(',') {
                        by_month_day.push(day.parse().map_err(|_| invalid(day))?);
                    }
                }
                "BYMONTH" => {
                    for month in value.split(',') {
                        by_month.push(month.parse().map_err(|_| invalid(month))?);
                    }
                }
                other => return Err(RecurrenceError::UnsupportedComponent(other.to_string())),
            }
        }

        let frequency = frequency.ok_or(RecurrenceError::MissingFrequency)?;
        let end = match (count, until) {
            (Some(count), None) => RuleEnd::Count(count),
            (None, Some(until)) => RuleEnd::Until(until),
            _ => return Err(RecurrenceError::CountAndUntil),
        };

        RuleSpec {
            frequency,
            interval,
            end,
            by_weekday,
            by_month_day,
            by_month,
        }
        .validate()
    }

    /// Serializes back to an RRULE string.
    pub fn to_rrule_string(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.frequency.as_str())];
        if self.interval != 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }
        match self.end {
            RuleEnd::Count(count) => parts.push(format!("COUNT={count}")),
            RuleEnd::Until(until) => {
                parts.push(format!("UNTIL={}", until.format(UNTIL_FORMAT)));
            }
        }
        if !self.by_weekday.is_empty() {
            let days: Vec<&str> = self.by_weekday.iter().copied().map(weekday_code).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        if !self.by_month_day.is_empty() {
            let days: Vec<String> = self.by_month_day.iter().map(|d| d.to_string()).collect();
            parts.push(format!("BYMONTHDAY={}", days.join(",")));
        }
        if !self.by_month.is_empty() {
            let months: Vec<String> = self.by_month.iter().map(|m| m.to_string()).collect();
            parts.push(format!("BYMONTH={}", months.join(",")));
        }
        parts.join(";")
    }

    /// Maps a persisted rule row into a validated spec.
    pub fn from_model(model: &RecurrenceRuleModel) -> Result<Self, RecurrenceError> {
        let frequency = Frequency::parse(&model.frequency)?;
        let end = match (model.count, model.until) {
            (Some(count), None) if count > 0 => RuleEnd::Count(count as u32),
            (None, Some(until)) => RuleEnd::Until(until),
            (Some(count), None) => {
                return Err(RecurrenceError::InvalidValue {
                    component: "COUNT".to_string(),
                    value: count.to_string(),
                });
            }
            _ => return Err(RecurrenceError::CountAndUntil),
        };

        let parse_list = |raw: &Option<String>, component: &str| -> Result<Vec<u8>, RecurrenceError> {
            raw.as_deref()
                .map(|s| {
                    s.split(',')
                        .filter(|p| !p.is_empty())
                        .map(|p| {
                            p.trim().parse().map_err(|_| RecurrenceError::InvalidValue {
                                component: component.to_string(),
                                value: p.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_else(|| Ok(Vec::new()))
        };

        let by_weekday = model
            .by_weekday
            .as_deref()
            .map(|s| {
                s.split(',')
                    .filter(|p| !p.is_empty())
                    .map(|code| {
                        parse_weekday_code(code.trim()).ok_or_else(|| {
                            RecurrenceError::InvalidValue {
                                component: "BYDAY".to_string(),
                                value: code.to_string(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .unwrap_or_else(|| Ok(Vec::new()))?;

        RuleSpec {
            frequency,
            interval: model.interval.max(1) as u32,
            end,
            by_weekday,
            by_month_day: parse_list(&model.by_month_day, "BYMONTHDAY")?,
            by_month: parse_list(&model.by_month, "BYMONTH")?,
        }
        .validate()
    }

    /// Column values for persisting this rule: (frequency, interval, count,
    /// until, by_weekday, by_month_day, by_month).
    pub fn column_values(
        &self,
    ) -> (
        String,
        i32,
        Option<i32>,
        Option<NaiveDateTime>,
        Option<String>,
        Option<String>,
        Option<String>,
    ) {
        let (count, until) = match self.end {
            RuleEnd::Count(count) => (Some(count as i32), None),
            RuleEnd::Until(until) => (None, Some(until)),
        };
        let join_u8 = |items: &[u8]| {
            if items.is_empty() {
                None
            } else {
                Some(
                    items
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                )
            }
        };
        let by_weekday = if self.by_weekday.is_empty() {
            None
        } else {
            Some(
                self.by_weekday
                    .iter()
                    .copied()
                    .map(weekday_code)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        };
        (
            self.frequency.as_str().to_string(),
            self.interval as i32,
            count,
            until,
            by_weekday,
            join_u8(&self.by_month_day),
            join_u8(&self.by_month),
        )
    }
}
