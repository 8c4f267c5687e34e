//! Availability engine.
//!
//! Answers "when is this calendar busy" and "when can something be booked"
//! over a window. Busy time is the union of expanded event occurrences
//! (masters, instances, exceptions, continuations) and blocked times; free
//! time is either the stored AvailableTime windows (managed calendars) or the
//! complement of busy time. Bundles aggregate over their children: a time is
//! available on the bundle iff it is available on at least one child.

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use uuid::Uuid;

use crate::error::{CalendarError, CalendarResult};
use crate::models::calendar::Model as CalendarModel;
use crate::models::calendar_event::Model as EventModel;
use crate::models::enums::EventStatus;
use crate::recurrence::{
    DEFAULT_MAX_OCCURRENCES, ExceptionSpec, Occurrence, RecurrenceError, RuleSpec, SeriesNode,
    expand_series,
};
use crate::repositories::{
    AvailableTimeRepository, BlockedTimeRepository, CalendarRepository, EventRepository,
    RecurrenceRuleRepository, TenantContext,
};

/// Why an interval is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    CalendarEvent,
    BlockedTime,
}

/// A busy interval, UTC naive, tagged with its source entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub reason: UnavailableReason,
    pub entity_id: Uuid,
    pub calendar_id: Uuid,
}

/// A bookable interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Stored AvailableTime id when the calendar manages windows explicitly.
    pub id: Option<Uuid>,
    /// Derived gaps may be partially booked; explicit windows may not.
    pub can_book_partially: bool,
}

pub struct AvailabilityEngine {
    db: DatabaseConnection,
    max_occurrences: usize,
}

impl AvailabilityEngine {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }

    pub fn with_max_occurrences(mut self, max_occurrences: usize) -> Self {
        self.max_occurrences = max_occurrences;
        self
    }

    /// Busy windows over `[start, end)`, ascending by start.
    pub async fn unavailable_windows(
        &self,
        ctx: TenantContext,
        calendar: &CalendarModel,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<UnavailableWindow>> {
        ctx.ensure_owns(calendar.tenant_id, "calendar")?;
        let calendar_ids = self.calendar_scope(ctx, calendar).await?;
        self.unavailable_for_calendars(ctx, &calendar_ids, start, end)
            .await
    }

    async fn unavailable_for_calendars(
        &self,
        ctx: TenantContext,
        calendar_ids: &[Uuid],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<UnavailableWindow>> {
        let events = EventRepository::new(&self.db, ctx);
        let blocks = BlockedTimeRepository::new(&self.db, ctx);

        let mut windows: Vec<UnavailableWindow> = Vec::new();

        for event in events
            .find_overlapping_non_recurring(calendar_ids, start, end)
            .await?
        {
            windows.push(UnavailableWindow {
                start: event.start_at,
                end: event.end_at,
                reason: UnavailableReason::CalendarEvent,
                entity_id: event.id,
                calendar_id: event.calendar_id,
            });
        }

        for master in events.find_recurring_masters(calendar_ids, end).await? {
            let calendar_id = master.calendar_id;
            let occurrences = self.expand_master(ctx, &master, start, end).await?;
            windows.extend(occurrences.into_iter().map(|occurrence| UnavailableWindow {
                start: occurrence.start,
                end: occurrence.end,
                reason: UnavailableReason::CalendarEvent,
                entity_id: occurrence.entity_id,
                calendar_id,
            }));
        }

        for block in blocks.find_overlapping(calendar_ids, start, end).await? {
            windows.push(UnavailableWindow {
                start: block.start_at,
                end: block.end_at,
                reason: UnavailableReason::BlockedTime,
                entity_id: block.id,
                calendar_id: block.calendar_id,
            });
        }

        windows.sort_by_key(|window| (window.start, window.end));
        Ok(windows)
    }

    /// Bookable windows over `[start, end)`.
    ///
    /// Managed calendars return their stored windows
    /// (`can_book_partially = false`); everything else returns the complement
    /// of busy time (`can_book_partially = true`). Bundles return the merged
    /// union over children.
    pub async fn available_windows(
        &self,
        ctx: TenantContext,
        calendar: &CalendarModel,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<AvailableWindow>> {
        ctx.ensure_owns(calendar.tenant_id, "calendar")?;

        if calendar.is_bundle() {
            let calendars = CalendarRepository::new(&self.db, ctx);
            let children = calendars.children(calendar.id).await?;
            if children.is_empty() {
                return Err(CalendarError::EmptyBundleCalendar);
            }

            let mut union: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
            for child in &children {
                let child_windows =
                    Box::pin(self.available_windows(ctx, child, start, end)).await?;
                union.extend(child_windows.into_iter().map(|w| (w.start, w.end)));
            }
            let merged = merge_intervals(union);
            return Ok(merged
                .into_iter()
                .map(|(window_start, window_end)| AvailableWindow {
                    start: window_start,
                    end: window_end,
                    id: None,
                    can_book_partially: true,
                })
                .collect());
        }

        if calendar.manages_available_windows {
            return self.managed_windows(ctx, calendar.id, start, end).await;
        }

        let busy = self
            .unavailable_for_calendars(ctx, &[calendar.id], start, end)
            .await?;
        let gaps = complement(
            start,
            end,
            busy.iter().map(|window| (window.start, window.end)),
        );
        Ok(gaps
            .into_iter()
            .map(|(gap_start, gap_end)| AvailableWindow {
                start: gap_start,
                end: gap_end,
                id: None,
                can_book_partially: true,
            })
            .collect())
    }

    /// Explicit windows for a managed calendar, recurrence-expanded: plain
    /// rows overlapping the range, plus occurrences of recurring window
    /// masters (with their exception rows and continuation chains applied).
    async fn managed_windows(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<AvailableWindow>> {
        let available = AvailableTimeRepository::new(&self.db, ctx);
        let rules = RecurrenceRuleRepository::new(&self.db, ctx);

        let mut windows: Vec<AvailableWindow> = available
            .find_plain_overlapping(calendar_id, start, end)
            .await?
            .into_iter()
            .map(|window| AvailableWindow {
                start: window.start_at,
                end: window.end_at,
                id: Some(window.id),
                can_book_partially: false,
            })
            .collect();

        let exception_rows = available.exceptions_for(calendar_id).await?;
        let exceptions: Vec<ExceptionSpec> = exception_rows
            .iter()
            .map(|row| ExceptionSpec {
                recurrence_id: row.recurrence_id.unwrap_or(row.start_at),
                cancelled: false,
                replacement: Some((row.start_at, row.end_at)),
                entity_id: row.id,
            })
            .collect();

        for master in available.find_recurring_masters(calendar_id, end).await? {
            let mut node = SeriesNode {
                entity_id: master.id,
                anchor_start: master.start_at,
                duration: master.end_at - master.start_at,
                timezone: master
                    .timezone
                    .parse()
                    .map_err(|_| RecurrenceError::InvalidTimezone(master.timezone.clone()))?,
                rule: match master.recurrence_rule_id {
                    Some(rule_id) => Some(RuleSpec::from_model(&rules.require(rule_id).await?)?),
                    None => None,
                },
                exceptions: exceptions.clone(),
                continuation: None,
            };
            if let Some(next) = available.continuation_of(master.id).await? {
                node.continuation = Some(Box::new(SeriesNode {
                    entity_id: next.id,
                    anchor_start: next.start_at,
                    duration: next.end_at - next.start_at,
                    timezone: next
                        .timezone
                        .parse()
                        .map_err(|_| RecurrenceError::InvalidTimezone(next.timezone.clone()))?,
                    rule: match next.recurrence_rule_id {
                        Some(rule_id) => {
                            Some(RuleSpec::from_model(&rules.require(rule_id).await?)?)
                        }
                        None => None,
                    },
                    exceptions: exceptions.clone(),
                    continuation: None,
                }));
            }
            let occurrences = expand_series(&node, start, end, self.max_occurrences)?;
            windows.extend(occurrences.into_iter().map(|occurrence| AvailableWindow {
                start: occurrence.start,
                end: occurrence.end,
                id: Some(occurrence.entity_id),
                can_book_partially: false,
            }));
        }

        windows.sort_by_key(|window| (window.start, window.end));
        Ok(windows)
    }

    /// Verifies `[start, end]` fits entirely inside one bookable window.
    ///
    /// Managed calendars require a single explicit window containing the
    /// interval (no partial booking); other calendars require the interval to
    /// be clear of busy time; bundles require at least one bookable child.
    pub async fn ensure_bookable(
        &self,
        ctx: TenantContext,
        calendar: &CalendarModel,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<()> {
        ctx.ensure_owns(calendar.tenant_id, "calendar")?;

        if calendar.is_bundle() {
            return Box::pin(self.pick_bundle_child(ctx, calendar, start, end))
                .await
                .map(|_| ());
        }

        if calendar.manages_available_windows {
            let windows = self.managed_windows(ctx, calendar.id, start, end).await?;
            let fits = windows
                .iter()
                .any(|window| window.start <= start && end <= window.end);
            return if fits {
                Ok(())
            } else {
                Err(CalendarError::NoAvailableTimeWindow)
            };
        }

        let busy = self
            .unavailable_for_calendars(ctx, &[calendar.id], start, end)
            .await?;
        if busy.is_empty() {
            Ok(())
        } else {
            Err(CalendarError::NoAvailableTimeWindow)
        }
    }

    /// Picks the child calendar a bundle booking lands on: the primary when
    /// it is set and free, else the first free child in stable order.
    pub async fn pick_bundle_child(
        &self,
        ctx: TenantContext,
        bundle: &CalendarModel,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<CalendarModel> {
        if !bundle.is_bundle() {
            return Err(CalendarError::NotABundleCalendar);
        }
        let calendars = CalendarRepository::new(&self.db, ctx);
        let children = calendars.children(bundle.id).await?;
        if children.is_empty() {
            return Err(CalendarError::EmptyBundleCalendar);
        }

        let mut available: Vec<&CalendarModel> = Vec::new();
        for child in &children {
            if self.ensure_bookable(ctx, child, start, end).await.is_ok() {
                available.push(child);
            }
        }

        if let Some(primary_id) = bundle.primary_child_id {
            if let Some(primary) = available.iter().find(|child| child.id == primary_id) {
                return Ok((*primary).clone());
            }
        }
        available
            .first()
            .map(|child| (*child).clone())
            .ok_or(CalendarError::NoAvailableChildCalendar)
    }

    async fn calendar_scope(
        &self,
        ctx: TenantContext,
        calendar: &CalendarModel,
    ) -> CalendarResult<Vec<Uuid>> {
        if calendar.is_bundle() {
            let calendars = CalendarRepository::new(&self.db, ctx);
            let children = calendars.children(calendar.id).await?;
            if children.is_empty() {
                return Err(CalendarError::EmptyBundleCalendar);
            }
            Ok(children.into_iter().map(|child| child.id).collect())
        } else {
            Ok(vec![calendar.id])
        }
    }

    /// Expands one recurring master with its exceptions and continuation
    /// chain into concrete occurrences.
    async fn expand_master(
        &self,
        ctx: TenantContext,
        master: &EventModel,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<Occurrence>> {
        let node = self.build_series_node(ctx, &self.db, master, 0).await?;
        Ok(expand_series(&node, start, end, self.max_occurrences)?)
    }

    async fn build_series_node<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        db: &C,
        event: &EventModel,
        depth: usize,
    ) -> CalendarResult<SeriesNode> {
        // Continuation chains are user-authored and short; the bound only
        // guards against reference cycles in corrupted data.
        if depth > 32 {
            return Err(CalendarError::Malformed(
                "bulk modification chain too deep".into(),
            ));
        }

        let events = EventRepository::new(db, ctx);
        let rules = RecurrenceRuleRepository::new(db, ctx);

        let rule = match event.recurrence_rule_id {
            Some(rule_id) => {
                let model = rules.require(rule_id).await?;
                Some(RuleSpec::from_model(&model)?)
            }
            None => None,
        };

        let timezone: Tz = event
            .timezone
            .parse()
            .map_err(|_| RecurrenceError::InvalidTimezone(event.timezone.clone()))?;

        let exceptions = events
            .exceptions_of(event.id)
            .await?
            .into_iter()
            .map(|exception| ExceptionSpec {
                recurrence_id: exception.recurrence_id.unwrap_or(exception.start_at),
                cancelled: exception.status == EventStatus::Cancelled,
                replacement: Some((exception.start_at, exception.end_at)),
                entity_id: exception.id,
            })
            .collect();

        let continuation = match events.continuation_of(event.id).await? {
            Some(next) => Some(Box::new(
                Box::pin(self.build_series_node(ctx, db, &next, depth + 1)).await?,
            )),
            None => None,
        };

        Ok(SeriesNode {
            entity_id: event.id,
            anchor_start: event.start_at,
            duration: event.end_at - event.start_at,
            timezone,
            rule,
            exceptions,
            continuation,
        })
    }
}

/// Coalesces possibly-overlapping intervals into a sorted disjoint set.
pub fn merge_intervals(
    mut intervals: Vec<(NaiveDateTime, NaiveDateTime)>,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    intervals.retain(|(start, end)| end > start);
    intervals.sort_by_key(|(start, end)| (*start, *end));

    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// The gaps of `[window_start, window_end)` not covered by `busy`.
pub fn complement(
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    busy: impl IntoIterator<Item = (NaiveDateTime, NaiveDateTime)>,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let clamped: Vec<(NaiveDateTime, NaiveDateTime)> = busy
        .into_iter()
        .map(|(start, end)| (start.max(window_start), end.min(window_end)))
        .filter(|(start, end)| end > start)
        .collect();
    let merged = merge_intervals(clamped);

    if merged.is_empty() {
        if window_end > window_start {
            return vec![(window_start, window_end)];
        }
        return Vec::new();
    }

    let mut gaps = Vec::new();
    let mut cursor = window_start;
    for (busy_start, busy_end) in merged {
        if busy_start > cursor {
            gaps.push((cursor, busy_start));
        }
        cursor = cursor.max(busy_end);
    }
    if cursor < window_end {
        gaps.push((cursor, window_end));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn merge_coalesces_overlaps_and_touching() {
        let merged = merge_intervals(vec![
            (dt(1, 10, 0), dt(1, 11, 0)),
            (dt(1, 10, 30), dt(1, 11, 30)),
            (dt(1, 11, 30), dt(1, 12, 0)),
            (dt(1, 14, 0), dt(1, 15, 0)),
        ]);
        assert_eq!(
            merged,
            vec![(dt(1, 10, 0), dt(1, 12, 0)), (dt(1, 14, 0), dt(1, 15, 0))]
        );
    }

    #[test]
    fn complement_emits_gaps_and_drops_empties() {
        let gaps = complement(
            dt(1, 9, 0),
            dt(1, 17, 0),
            vec![
                (dt(1, 10, 0), dt(1, 11, 0)),
                (dt(1, 11, 0), dt(1, 12, 0)),
                (dt(1, 16, 0), dt(1, 18, 0)),
            ],
        );
        assert_eq!(
            gaps,
            vec![(dt(1, 9, 0), dt(1, 10, 0)), (dt(1, 12, 0), dt(1, 16, 0))]
        );
    }

    #[test]
    fn complement_of_empty_busy_is_whole_window() {
        let gaps = complement(dt(1, 9, 0), dt(1, 17, 0), Vec::new());
        assert_eq!(gaps, vec![(dt(1, 9, 0), dt(1, 17, 0))]);
    }

    #[test]
    fn bundle_union_is_available_on_at_least_one_child() {
        // Child 1 busy 10:00-11:00, child 2 busy 10:30-11:30 over a
        // 10:00-12:00 window. A time is available on the bundle iff at least
        // one child is free, so only 10:30-11:00 (busy on both) drops out.
        let child1 = complement(
            dt(1, 10, 0),
            dt(1, 12, 0),
            vec![(dt(1, 10, 0), dt(1, 11, 0))],
        );
        let child2 = complement(
            dt(1, 10, 0),
            dt(1, 12, 0),
            vec![(dt(1, 10, 30), dt(1, 11, 30))],
        );
        let union = merge_intervals(child1.into_iter().chain(child2).collect());
        assert_eq!(
            union,
            vec![(dt(1, 10, 0), dt(1, 10, 30)), (dt(1, 11, 0), dt(1, 12, 0))]
        );
    }
}
