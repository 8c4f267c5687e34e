//! Occurrence expansion.
//!
//! Expansion walks wall-clock time in the anchor's timezone so DST
//! transitions keep the local hour stable, then resolves every occurrence
//! back to a UTC instant. Exceptions match occurrences by exact
//! `recurrence_id` equality; bulk-modification continuations replace a series
//! from their own start onward.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use uuid::Uuid;

use super::{Frequency, RecurrenceError, RuleEnd, RuleSpec};

/// Default cap on in-window occurrences per expansion.
pub const DEFAULT_MAX_OCCURRENCES: usize = 1000;

/// Periods walked before giving up on by-filters that can never match.
const MAX_PERIODS: usize = 5000;

/// One concrete occurrence, UTC naive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Entity the interval belongs to: the series master, or the exception
    /// that replaced the original occurrence.
    pub entity_id: Uuid,
}

/// A per-occurrence override, linked by the replaced occurrence's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionSpec {
    /// Start of the occurrence this exception replaces, UTC naive.
    pub recurrence_id: NaiveDateTime,
    /// True removes the occurrence; false substitutes `replacement`.
    pub cancelled: bool,
    pub replacement: Option<(NaiveDateTime, NaiveDateTime)>,
    pub entity_id: Uuid,
}

/// A recurring series with its exceptions and optional continuation chain.
#[derive(Debug, Clone)]
pub struct SeriesNode {
    pub entity_id: Uuid,
    /// Anchor start, UTC naive.
    pub anchor_start: NaiveDateTime,
    pub duration: Duration,
    pub timezone: Tz,
    /// None on a continuation means bulk cancel from `anchor_start` onward.
    pub rule: Option<RuleSpec>,
    pub exceptions: Vec<ExceptionSpec>,
    pub continuation: Option<Box<SeriesNode>>,
}

fn resolve_local(tz: Tz, local: NaiveDateTime) -> NaiveDateTime {
    use chrono::offset::LocalResult;
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.naive_utc(),
        // Fall-back overlap: take the earlier instant.
        LocalResult::Ambiguous(first, _) => first.naive_utc(),
        // Spring-forward gap: the wall time does not exist; shift an hour.
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.naive_utc())
                .unwrap_or(local)
        }
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn passes_filters(rule: &RuleSpec, date: NaiveDate) -> bool {
    if !rule.by_weekday.is_empty() && !rule.by_weekday.contains(&date.weekday()) {
        return false;
    }
    if !rule.by_month_day.is_empty() && !rule.by_month_day.contains(&(date.day() as u8)) {
        return false;
    }
    if !rule.by_month.is_empty() && !rule.by_month.contains(&(date.month() as u8)) {
        return false;
    }
    true
}

/// Local candidate dates for one period, ascending. The period index is
/// period-sized steps from the anchor (days, weeks, months, or years).
fn period_candidates(rule: &RuleSpec, anchor: NaiveDate, period: usize) -> Vec<NaiveDate> {
    match rule.frequency {
        Frequency::Daily => {
            let date = anchor + Duration::days((period as i64) * rule.interval as i64);
            vec![date]
        }
        Frequency::Weekly => {
            let base = week_start(anchor) + Duration::weeks((period as i64) * rule.interval as i64);
            if rule.by_weekday.is_empty() {
                vec![base + Duration::days(anchor.weekday().num_days_from_monday() as i64)]
            } else {
                rule.by_weekday
                    .iter()
                    .map(|day| base + Duration::days(day.num_days_from_monday() as i64))
                    .collect()
            }
        }
        Frequency::Monthly => {
            let months = anchor.year() * 12 + anchor.month0() as i32
                + (period as i32) * rule.interval as i32;
            let (year, month0) = (months.div_euclid(12), months.rem_euclid(12) as u32);
            let days: Vec<u32> = if rule.by_month_day.is_empty() {
                vec![anchor.day()]
            } else {
                rule.by_month_day.iter().map(|d| *d as u32).collect()
            };
            days.into_iter()
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month0 + 1, day))
                .collect()
        }
        Frequency::Yearly => {
            let year = anchor.year() + (period as i32) * rule.interval as i32;
            let months: Vec<u32> = if rule.by_month.is_empty() {
                vec![anchor.month()]
            } else {
                rule.by_month.iter().map(|m| *m as u32).collect()
            };
            let days: Vec<u32> = if rule.by_month_day.is_empty() {
                vec![anchor.day()]
            } else {
                rule.by_month_day.iter().map(|d| *d as u32).collect()
            };
            let mut dates = Vec::new();
            for month in months {
                for day in &days {
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, *day) {
                        dates.push(date);
                    }
                }
            }
            dates.sort_unstable();
            dates
        }
    }
}

/// First local date of a period, used to detect that iteration has moved past
/// every bound even when no candidate matched the by-filters.
fn period_floor(rule: &RuleSpec, anchor: NaiveDate, period: usize) -> NaiveDate {
    match rule.frequency {
        Frequency::Daily => anchor + Duration::days((period as i64) * rule.interval as i64),
        Frequency::Weekly => {
            week_start(anchor) + Duration::weeks((period as i64) * rule.interval as i64)
        }
        Frequency::Monthly => {
            let months = anchor.year() * 12 + anchor.month0() as i32
                + (period as i32) * rule.interval as i32;
            let (year, month0) = (months.div_euclid(12), months.rem_euclid(12) as u32);
            NaiveDate::from_ymd_opt(year, month0 + 1, 1)
                .unwrap_or(NaiveDate::MAX)
        }
        Frequency::Yearly => {
            NaiveDate::from_ymd_opt(anchor.year() + (period as i32) * rule.interval as i32, 1, 1)
                .unwrap_or(NaiveDate::MAX)
        }
    }
}

/// Expands `rule` anchored at `anchor_start` (UTC naive) into occurrence
/// intervals intersecting `[window_start, window_end)`.
///
/// The sequence is ordered ascending and deterministic for fixed inputs.
/// COUNT is counted from the anchor, including occurrences before the window.
pub fn expand(
    rule: &RuleSpec,
    anchor_start: NaiveDateTime,
    duration: Duration,
    timezone: Tz,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    max_occurrences: usize,
) -> Result<Vec<(NaiveDateTime, NaiveDateTime)>, RecurrenceError> {
    let local_anchor = timezone.from_utc_datetime(&anchor_start).naive_local();
    let anchor_date = local_anchor.date();
    let anchor_time = local_anchor.time();

    // Everything past this local date can be skipped outright; slack covers
    // timezone offset drift between local and UTC comparisons.
    let window_end_local = timezone.from_utc_datetime(&window_end).naive_local();
    let hard_stop_date = match rule.end {
        RuleEnd::Until(until) => {
            let until_local = timezone.from_utc_datetime(&until).naive_local();
            until_local.date().min(window_end_local.date()) + Duration::days(2)
        }
        RuleEnd::Count(_) => window_end_local.date() + Duration::days(2),
    };

    let mut produced: u64 = 0;
    let mut results = Vec::new();

    'periods: for period in 0..MAX_PERIODS {
        if period_floor(rule, anchor_date, period) > hard_stop_date {
            break;
        }

        for date in period_candidates(rule, anchor_date, period) {
            // The anchor is the first occurrence; never emit before it.
            if date < anchor_date {
                continue;
            }
            if !passes_filters(rule, date) {
                continue;
            }

            let start = resolve_local(timezone, date.and_time(anchor_time));
            if start < anchor_start {
                continue;
            }

            if let RuleEnd::Until(until) = rule.end {
                if start > until {
                    break 'periods;
                }
            }

            produced += 1;
            if let RuleEnd::Count(count) = rule.end {
                if produced > count as u64 {
                    break 'periods;
                }
            }

            if start >= window_end {
                // Count rules are exhausted by the count check above; nothing
                // later can re-enter the window.
                break 'periods;
            }

            let end = start + duration;
            if end > window_start {
                results.push((start, end));
                if results.len() > max_occurrences {
                    return Err(RecurrenceError::TooBroad {
                        got: results.len(),
                        limit: max_occurrences,
                    });
                }
            }
        }
    }

    Ok(results)
}

/// Replaces or removes occurrences matched by `recurrence_id`.
pub fn apply_exceptions(
    occurrences: Vec<Occurrence>,
    exceptions: &[ExceptionSpec],
) -> Vec<Occurrence> {
    let mut result: Vec<Occurrence> = occurrences
        .into_iter()
        .filter_map(|occ| {
            match exceptions
                .iter()
                .find(|exc| exc.recurrence_id == occ.start)
            {
                None => Some(occ),
                Some(exc) if exc.cancelled => None,
                Some(exc) => {
                    let (start, end) = exc.replacement.unwrap_or((occ.start, occ.end));
                    Some(Occurrence {
                        start,
                        end,
                        entity_id: exc.entity_id,
                    })
                }
            }
        })
        .collect();
    result.sort_by_key(|occ| occ.start);
    result
}

/// Expands a series including its exceptions and continuation chain.
///
/// A continuation supersedes its parent's occurrences from its own
/// `anchor_start` onward; a continuation without a rule is a bulk cancel.
pub fn expand_series(
    node: &SeriesNode,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    max_occurrences: usize,
) -> Result<Vec<Occurrence>, RecurrenceError> {
    let raw = match &node.rule {
        Some(rule) => expand(
            rule,
            node.anchor_start,
            node.duration,
            node.timezone,
            window_start,
            window_end,
            max_occurrences,
        )?,
        None => Vec::new(),
    };

    let mut occurrences: Vec<Occurrence> = raw
        .into_iter()
        .map(|(start, end)| Occurrence {
            start,
            end,
            entity_id: node.entity_id,
        })
        .collect();
    occurrences = apply_exceptions(occurrences, &node.exceptions);

    if let Some(continuation) = &node.continuation {
        occurrences.retain(|occ| occ.start < continuation.anchor_start);
        let mut rest = expand_series(continuation, window_start, window_end, max_occurrences)?;
        rest.retain(|occ| occ.start >= continuation.anchor_start);
        occurrences.append(&mut rest);
        occurrences.sort_by_key(|occ| occ.start);
        if occurrences.len() > max_occurrences {
            return Err(RecurrenceError::TooBroad {
                got: occurrences.len(),
                limit: max_occurrences,
            });
        }
    }

    Ok(occurrences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn rule(input: &str) -> RuleSpec {
        RuleSpec::from_rrule_str(input).expect("rule parses")
    }

    #[test]
    fn daily_count_expansion() {
        let occurrences = expand(
            &rule("FREQ=DAILY;COUNT=3"),
            dt(2025, 6, 1, 9, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 7, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        assert_eq!(
            occurrences,
            vec![
                (dt(2025, 6, 1, 9, 0), dt(2025, 6, 1, 10, 0)),
                (dt(2025, 6, 2, 9, 0), dt(2025, 6, 2, 10, 0)),
                (dt(2025, 6, 3, 9, 0), dt(2025, 6, 3, 10, 0)),
            ]
        );
    }

    #[test]
    fn count_includes_occurrences_before_window() {
        // 5 daily occurrences from June 1; window starts June 4 so only the
        // last two land inside it.
        let occurrences = expand(
            &rule("FREQ=DAILY;COUNT=5"),
            dt(2025, 6, 1, 9, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 6, 4, 0, 0),
            dt(2025, 7, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].0, dt(2025, 6, 4, 9, 0));
        assert_eq!(occurrences[1].0, dt(2025, 6, 5, 9, 0));
    }

    #[test]
    fn weekly_byday_with_interval() {
        // Every other week on Mon/Wed, anchored on a Monday.
        let occurrences = expand(
            &rule("FREQ=WEEKLY;INTERVAL=2;COUNT=5;BYDAY=MO,WE"),
            dt(2025, 6, 2, 10, 0), // Monday
            Duration::minutes(30),
            chrono_tz::UTC,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 8, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        let starts: Vec<NaiveDateTime> = occurrences.iter().map(|o| o.0).collect();
        assert_eq!(
            starts,
            vec![
                dt(2025, 6, 2, 10, 0),  // Mon wk 0
                dt(2025, 6, 4, 10, 0),  // Wed wk 0
                dt(2025, 6, 16, 10, 0), // Mon wk 2
                dt(2025, 6, 18, 10, 0), // Wed wk 2
                dt(2025, 6, 30, 10, 0), // Mon wk 4
            ]
        );
    }

    #[test]
    fn monthly_skips_short_months() {
        // Anchored Jan 31; February has no 31st so it is skipped.
        let occurrences = expand(
            &rule("FREQ=MONTHLY;COUNT=3"),
            dt(2025, 1, 31, 12, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 1, 1, 0, 0),
            dt(2026, 1, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        let starts: Vec<NaiveDateTime> = occurrences.iter().map(|o| o.0).collect();
        assert_eq!(
            starts,
            vec![
                dt(2025, 1, 31, 12, 0),
                dt(2025, 3, 31, 12, 0),
                dt(2025, 5, 31, 12, 0),
            ]
        );
    }

    #[test]
    fn until_is_inclusive() {
        let occurrences = expand(
            &rule("FREQ=DAILY;UNTIL=20250603T090000Z"),
            dt(2025, 6, 1, 9, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 7, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        assert_eq!(occurrences.len(), 3);
        assert_eq!(occurrences.last().unwrap().0, dt(2025, 6, 3, 9, 0));
    }

    #[test]
    fn dst_transition_keeps_wall_clock_hour() {
        // 09:00 America/New_York daily across the 2025-03-09 spring forward.
        // EST (UTC-5) before, EDT (UTC-4) after.
        let occurrences = expand(
            &rule("FREQ=DAILY;COUNT=3"),
            dt(2025, 3, 8, 14, 0), // 09:00 EST as UTC
            Duration::hours(1),
            chrono_tz::America::New_York,
            dt(2025, 3, 1, 0, 0),
            dt(2025, 4, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        let starts: Vec<NaiveDateTime> = occurrences.iter().map(|o| o.0).collect();
        assert_eq!(
            starts,
            vec![
                dt(2025, 3, 8, 14, 0),
                dt(2025, 3, 9, 13, 0),
                dt(2025, 3, 10, 13, 0),
            ]
        );
    }

    #[test]
    fn too_broad_expansion_is_rejected() {
        let err = expand(
            &rule("FREQ=DAILY;COUNT=50"),
            dt(2025, 1, 1, 0, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 1, 1, 0, 0),
            dt(2026, 1, 1, 0, 0),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, RecurrenceError::TooBroad { limit: 10, .. }));
    }

    #[test]
    fn impossible_filters_terminate() {
        // BYMONTHDAY=31 never matches inside BYMONTH=2.
        let occurrences = expand(
            &rule("FREQ=MONTHLY;COUNT=5;BYMONTHDAY=31;BYMONTH=2"),
            dt(2025, 1, 31, 9, 0),
            Duration::hours(1),
            chrono_tz::UTC,
            dt(2025, 1, 1, 0, 0),
            dt(2027, 1, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();
        assert!(occurrences.is_empty());
    }

    #[test]
    fn exceptions_cancel_and_replace() {
        let master = Uuid::new_v4();
        let replacement = Uuid::new_v4();
        let occurrences = vec![
            Occurrence {
                start: dt(2025, 6, 1, 9, 0),
                end: dt(2025, 6, 1, 10, 0),
                entity_id: master,
            },
            Occurrence {
                start: dt(2025, 6, 2, 9, 0),
                end: dt(2025, 6, 2, 10, 0),
                entity_id: master,
            },
            Occurrence {
                start: dt(2025, 6, 3, 9, 0),
                end: dt(2025, 6, 3, 10, 0),
                entity_id: master,
            },
        ];
        let exceptions = vec![
            ExceptionSpec {
                recurrence_id: dt(2025, 6, 2, 9, 0),
                cancelled: true,
                replacement: None,
                entity_id: Uuid::new_v4(),
            },
            ExceptionSpec {
                recurrence_id: dt(2025, 6, 3, 9, 0),
                cancelled: false,
                replacement: Some((dt(2025, 6, 3, 14, 0), dt(2025, 6, 3, 15, 0))),
                entity_id: replacement,
            },
        ];

        let result = apply_exceptions(occurrences, &exceptions);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].start, dt(2025, 6, 1, 9, 0));
        assert_eq!(result[1].start, dt(2025, 6, 3, 14, 0));
        assert_eq!(result[1].entity_id, replacement);
    }

    #[test]
    fn bulk_continuation_forks_series() {
        // Master daily for 10 days from D; continuation from D+5 with COUNT=3.
        let master_id = Uuid::new_v4();
        let continuation_id = Uuid::new_v4();
        let node = SeriesNode {
            entity_id: master_id,
            anchor_start: dt(2025, 6, 1, 9, 0),
            duration: Duration::hours(1),
            timezone: chrono_tz::UTC,
            rule: Some(rule("FREQ=DAILY;COUNT=10")),
            exceptions: vec![],
            continuation: Some(Box::new(SeriesNode {
                entity_id: continuation_id,
                anchor_start: dt(2025, 6, 6, 9, 0),
                duration: Duration::hours(1),
                timezone: chrono_tz::UTC,
                rule: Some(rule("FREQ=DAILY;COUNT=3")),
                exceptions: vec![],
                continuation: None,
            })),
        };

        let occurrences = expand_series(
            &node,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 6, 16, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        assert_eq!(occurrences.len(), 8);
        let from_master = occurrences
            .iter()
            .filter(|o| o.entity_id == master_id)
            .count();
        let from_continuation = occurrences
            .iter()
            .filter(|o| o.entity_id == continuation_id)
            .count();
        assert_eq!(from_master, 5);
        assert_eq!(from_continuation, 3);
        assert_eq!(occurrences[5].start, dt(2025, 6, 6, 9, 0));

        let mut starts: Vec<NaiveDateTime> = occurrences.iter().map(|o| o.start).collect();
        starts.dedup();
        assert_eq!(starts.len(), 8, "no duplicate occurrences");
    }

    #[test]
    fn null_rule_continuation_is_bulk_cancel() {
        let node = SeriesNode {
            entity_id: Uuid::new_v4(),
            anchor_start: dt(2025, 6, 1, 9, 0),
            duration: Duration::hours(1),
            timezone: chrono_tz::UTC,
            rule: Some(rule("FREQ=DAILY;COUNT=10")),
            exceptions: vec![],
            continuation: Some(Box::new(SeriesNode {
                entity_id: Uuid::new_v4(),
                anchor_start: dt(2025, 6, 4, 9, 0),
                duration: Duration::hours(1),
                timezone: chrono_tz::UTC,
                rule: None,
                exceptions: vec![],
                continuation: None,
            })),
        };

        let occurrences = expand_series(
            &node,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 7, 1, 0, 0),
            DEFAULT_MAX_OCCURRENCES,
        )
        .unwrap();

        assert_eq!(occurrences.len(), 3);
        assert!(occurrences.iter().all(|o| o.start < dt(2025, 6, 4, 9, 0)));
    }

    #[test]
    fn expansion_is_deterministic() {
        let spec = rule("FREQ=WEEKLY;INTERVAL=2;COUNT=20;BYDAY=TU,TH");
        let run = || {
            expand(
                &spec,
                dt(2025, 6, 3, 8, 30),
                Duration::minutes(45),
                chrono_tz::Europe::Berlin,
                dt(2025, 6, 1, 0, 0),
                dt(2025, 12, 1, 0, 0),
                DEFAULT_MAX_OCCURRENCES,
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
