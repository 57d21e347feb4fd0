use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

pub const DAY_MS: Ms = 24 * 3_600_000;

// ── Effective-rule resolution ─────────────────────────────────────

/// Rules in effect for one calendar day. One-off rules for the exact
/// date fully override the weekly schedule: if any exist, only they are
/// returned. Output is sorted by start time. Empty means closed.
pub fn effective_rules<'a>(rules: &'a [AvailabilityRule], day: NaiveDate) -> Vec<&'a AvailabilityRule> {
    let mut matching: Vec<&AvailabilityRule> = rules
        .iter()
        .filter(|r| r.schedule.matches_day(day))
        .collect();
    if matching.iter().any(|r| r.schedule.is_one_off()) {
        matching.retain(|r| r.schedule.is_one_off());
    }
    matching.sort_by_key(|r| r.start_time);
    matching
}

/// Epoch milliseconds of a wall-clock time on a given date, UTC.
pub fn wall_clock_ms(day: NaiveDate, time: NaiveTime) -> Ms {
    day.and_time(time).and_utc().timestamp_millis()
}

/// [midnight, next midnight) of a calendar day.
pub(crate) fn day_bounds(day: NaiveDate) -> Span {
    let start = wall_clock_ms(day, NaiveTime::MIN);
    Span { start, end: start + DAY_MS }
}

/// A rule's concrete window on a date.
pub fn materialize(rule: &AvailabilityRule, day: NaiveDate) -> Span {
    Span {
        start: wall_clock_ms(day, rule.start_time),
        end: wall_clock_ms(day, rule.end_time),
    }
}

/// Merged open windows for a day, from already-resolved effective rules.
pub fn open_spans(effective: &[&AvailabilityRule], day: NaiveDate) -> Vec<Span> {
    let mut spans: Vec<Span> = effective.iter().map(|r| materialize(r, day)).collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Bookable slots for a day. A rule with a slot size yields consecutive
/// fixed-width slots that fit entirely inside its window (partial tail
/// dropped); a free-form rule yields its whole window.
pub fn day_slots(effective: &[&AvailabilityRule], day: NaiveDate) -> Vec<Span> {
    let mut slots = Vec::new();
    for rule in effective {
        let window = materialize(rule, day);
        match rule.effective_slot_size() {
            Some(minutes) => {
                let step = minutes as Ms * 60_000;
                let mut cur = window.start;
                while cur + step <= window.end {
                    slots.push(Span { start: cur, end: cur + step });
                    cur += step;
                }
            }
            None => slots.push(window),
        }
    }
    slots.sort_by_key(|s| s.start);
    slots
}

// ── Interval set helpers ──────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    const H: Ms = 3_600_000;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn weekly(day: Weekday, start: NaiveTime, end: NaiveTime) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            schedule: RuleSchedule::Weekly(day),
            start_time: start,
            end_time: end,
            slot_size: None,
        }
    }

    fn one_off(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            schedule: RuleSchedule::OneOff(date),
            start_time: start,
            end_time: end,
            slot_size: None,
        }
    }

    // 2025-07-19 is a Saturday.
    fn saturday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 19).unwrap()
    }

    // ── effective_rules ───────────────────────────────────

    #[test]
    fn one_off_overrides_weekday() {
        let rules = vec![
            one_off(saturday(), t(9, 0), t(17, 0)),
            weekly(Weekday::Sat, t(10, 0), t(18, 0)),
        ];
        let eff = effective_rules(&rules, saturday());
        assert_eq!(eff.len(), 1);
        assert!(eff[0].schedule.is_one_off());
        assert_eq!(eff[0].start_time, t(9, 0));
    }

    #[test]
    fn weekday_rules_when_no_one_off() {
        let rules = vec![
            weekly(Weekday::Sat, t(14, 0), t(18, 0)),
            weekly(Weekday::Sat, t(9, 0), t(12, 0)),
            weekly(Weekday::Sun, t(9, 0), t(12, 0)),
        ];
        let eff = effective_rules(&rules, saturday());
        assert_eq!(eff.len(), 2);
        // Sorted by start time, the Sunday rule filtered out.
        assert_eq!(eff[0].start_time, t(9, 0));
        assert_eq!(eff[1].start_time, t(14, 0));
    }

    #[test]
    fn multiple_one_offs_all_returned_sorted() {
        let rules = vec![
            one_off(saturday(), t(15, 0), t(18, 0)),
            one_off(saturday(), t(8, 0), t(11, 0)),
            weekly(Weekday::Sat, t(0, 0), t(23, 0)),
        ];
        let eff = effective_rules(&rules, saturday());
        assert_eq!(eff.len(), 2);
        assert_eq!(eff[0].start_time, t(8, 0));
        assert_eq!(eff[1].start_time, t(15, 0));
    }

    #[test]
    fn one_off_other_date_ignored() {
        let other = NaiveDate::from_ymd_opt(2025, 7, 12).unwrap();
        let rules = vec![
            one_off(other, t(9, 0), t(17, 0)),
            weekly(Weekday::Sat, t(10, 0), t(18, 0)),
        ];
        let eff = effective_rules(&rules, saturday());
        assert_eq!(eff.len(), 1);
        assert!(!eff[0].schedule.is_one_off());
    }

    #[test]
    fn closed_day_is_empty() {
        let rules = vec![weekly(Weekday::Mon, t(9, 0), t(17, 0))];
        let eff = effective_rules(&rules, saturday());
        assert!(eff.is_empty());
    }

    // ── materialization and slots ─────────────────────────

    #[test]
    fn materialize_epoch_math() {
        // 2025-07-19T09:00:00Z = 1752915600s
        let rule = weekly(Weekday::Sat, t(9, 0), t(17, 0));
        let span = materialize(&rule, saturday());
        assert_eq!(span.start, 1_752_915_600_000);
        assert_eq!(span.duration_ms(), 8 * H);
    }

    #[test]
    fn day_bounds_cover_one_day() {
        let bounds = day_bounds(saturday());
        assert_eq!(bounds.duration_ms(), DAY_MS);
        let rule = weekly(Weekday::Sat, t(0, 0), t(23, 59));
        assert!(bounds.contains_instant(materialize(&rule, saturday()).start));
    }

    #[test]
    fn slots_fixed_width_partial_tail_dropped() {
        let mut rule = weekly(Weekday::Sat, t(9, 0), t(10, 45));
        rule.slot_size = Some(30);
        let eff = vec![&rule];
        let slots = day_slots(&eff, saturday());
        // 09:00-10:45 fits three 30-minute slots; the last 15 minutes drop.
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].duration_ms(), 30 * 60_000);
        assert_eq!(slots[2].end, wall_clock_ms(saturday(), t(10, 30)));
    }

    #[test]
    fn slots_free_form_whole_window() {
        let rule = weekly(Weekday::Sat, t(9, 0), t(12, 0));
        let eff = vec![&rule];
        let slots = day_slots(&eff, saturday());
        assert_eq!(slots, vec![materialize(&rule, saturday())]);
    }

    #[test]
    fn open_spans_merge_overlapping_rules() {
        let a = weekly(Weekday::Sat, t(9, 0), t(13, 0));
        let b = weekly(Weekday::Sat, t(12, 0), t(17, 0));
        let eff = vec![&a, &b];
        let open = open_spans(&eff, saturday());
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].duration_ms(), 8 * H);
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        let result = subtract_intervals(&base, &remove);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 300)]);
    }
}
