use ulid::Ulid;

use crate::model::*;

use super::availability::{merge_overlapping, subtract_intervals};

// ── Window resolution ─────────────────────────────────────────────

/// Capacity ceiling at one instant: the containing window's capacity,
/// else the resource default. Windows are disjoint, so at most one
/// contains the instant.
pub fn capacity_at(windows: &[CapacityWindow], max_capacity: u32, at: Ms) -> u32 {
    windows
        .iter()
        .find(|w| w.span.contains_instant(at))
        .map(|w| w.capacity)
        .unwrap_or(max_capacity)
}

/// Tightest ceiling across a whole span: the minimum over every window
/// the span touches, and the resource default wherever the span leaves
/// window coverage. This is the floor a booking must fit under.
pub fn min_capacity_over(windows: &[CapacityWindow], max_capacity: u32, span: &Span) -> u32 {
    let mut floor = u32::MAX;
    let mut covered: Vec<Span> = Vec::new();
    for w in windows {
        if let Some(part) = w.span.intersect(span) {
            floor = floor.min(w.capacity);
            covered.push(part);
        }
    }
    covered.sort_by_key(|s| s.start);
    let gaps = subtract_intervals(&[*span], &merge_overlapping(&covered));
    if !gaps.is_empty() {
        floor = floor.min(max_capacity);
    }
    if floor == u32::MAX { max_capacity } else { floor }
}

/// First existing window whose span overlaps the candidate, skipping
/// `skip` (the window being updated). `None` means the candidate keeps
/// the per-resource disjointness invariant.
pub fn window_conflict(windows: &[CapacityWindow], candidate: &Span, skip: Option<Ulid>) -> Option<Ulid> {
    windows
        .iter()
        .filter(|w| skip != Some(w.id))
        .find(|w| w.span.overlaps(candidate))
        .map(|w| w.id)
}

// ── Quantity-weighted load sweeps ─────────────────────────────────

/// Highest concurrent quantity inside `within`, from (span, quantity)
/// allocations. Allocation parts outside `within` do not count. Events
/// sort ends before starts at equal instants, so adjacency never stacks.
pub fn peak_load(allocs: &[(Span, u32)], within: &Span) -> u32 {
    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(allocs.len() * 2);
    for (span, quantity) in allocs {
        if let Some(part) = span.intersect(within) {
            events.push((part.start, *quantity as i64));
            events.push((part.end, -(*quantity as i64)));
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut load: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in events {
        load += delta;
        peak = peak.max(load);
    }
    peak as u32
}

/// Sweep-line over weighted allocations: the merged time ranges where
/// summed quantity reaches `capacity`. Assumes one uniform capacity;
/// see `saturated_with_windows` for varying ceilings.
pub fn saturated_spans(allocs: &[(Span, u32)], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() {
        return Vec::new();
    }

    let mut events: Vec<(Ms, i64)> = Vec::with_capacity(allocs.len() * 2);
    for (span, quantity) in allocs {
        events.push((span.start, *quantity as i64));
        events.push((span.end, -(*quantity as i64)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let cap = capacity as i64;
    let mut result = Vec::new();
    let mut load: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        load += delta;
        if load >= cap && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if load < cap
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    result
}

/// Saturation with per-window ceilings: cut the query at window
/// boundaries, sweep each segment against its own capacity, and merge
/// the pieces back together.
pub fn saturated_with_windows(
    allocs: &[(Span, u32)],
    windows: &[CapacityWindow],
    max_capacity: u32,
    query: &Span,
) -> Vec<Span> {
    let mut segments: Vec<(Span, u32)> = Vec::new();
    let mut covered: Vec<Span> = Vec::new();
    for w in windows {
        if let Some(part) = w.span.intersect(query) {
            segments.push((part, w.capacity));
            covered.push(part);
        }
    }
    covered.sort_by_key(|s| s.start);
    for gap in subtract_intervals(&[*query], &merge_overlapping(&covered)) {
        segments.push((gap, max_capacity));
    }
    segments.sort_by_key(|(s, _)| s.start);

    let mut result = Vec::new();
    for (segment, cap) in &segments {
        let clamped: Vec<(Span, u32)> = allocs
            .iter()
            .filter_map(|(span, q)| span.intersect(segment).map(|part| (part, *q)))
            .collect();
        result.extend(saturated_spans(&clamped, *cap));
    }
    result.sort_by_key(|s| s.start);
    merge_overlapping(&result)
}
