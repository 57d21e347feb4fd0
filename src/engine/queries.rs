use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{day_bounds, day_slots, effective_rules, open_spans, subtract_intervals};
use super::capacity;
use super::{Engine, EngineError};

impl Engine {
    // ── Catalog reads ────────────────────────────────────────
    // Listing queries return empty collections for unknown owners;
    // the semantic resolvers below insist on the resource row.

    pub async fn get_resource(&self, id: &Ulid) -> Option<Resource> {
        let entry = self.catalog.get(id)?;
        let guard = entry.read().await;
        Some(guard.resource.clone())
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut out = Vec::with_capacity(self.catalog.resource_count());
        for id in self.catalog.resource_ids() {
            if let Some(entry) = self.catalog.get(&id) {
                let guard = entry.read().await;
                out.push(guard.resource.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_rules(&self, resource_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        let entry = match self.catalog.get(&resource_id) {
            Some(e) => e,
            None => return Ok(vec![]),
        };
        let guard = entry.read().await;
        let mut rules = guard.rules.clone();
        rules.sort_by_key(|r| (r.start_time, r.id));
        Ok(rules)
    }

    pub async fn get_windows(&self, resource_id: Ulid) -> Result<Vec<CapacityWindow>, EngineError> {
        let entry = match self.catalog.get(&resource_id) {
            Some(e) => e,
            None => return Ok(vec![]),
        };
        let guard = entry.read().await;
        let mut windows = guard.windows.clone();
        windows.sort_by_key(|w| w.span.start);
        Ok(windows)
    }

    pub async fn staff_for_resource(&self, resource_id: Ulid) -> Result<Vec<Staff>, EngineError> {
        let entry = match self.catalog.get(&resource_id) {
            Some(e) => e,
            None => return Ok(vec![]),
        };
        let guard = entry.read().await;
        let mut staff: Vec<Staff> = guard
            .assigned
            .iter()
            .filter_map(|id| self.catalog.get_staff(id))
            .collect();
        staff.sort_by_key(|s| s.id);
        Ok(staff)
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<Staff> {
        self.catalog.get_staff(id)
    }

    pub fn list_staff(&self) -> Vec<Staff> {
        let mut out: Vec<Staff> = self
            .catalog
            .staff_ids()
            .iter()
            .filter_map(|id| self.catalog.get_staff(id))
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    // ── Booking reads ────────────────────────────────────────

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.index.get_record(id)
    }

    /// Every booking record on the resource, cancelled ones included.
    pub fn resource_bookings(&self, resource_id: &Ulid) -> Vec<Booking> {
        let mut out = self.index.records_for_resource(resource_id);
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    pub fn user_bookings(&self, user_id: &Ulid) -> Vec<Booking> {
        let mut out = self.index.records_for_user(user_id);
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    pub fn staff_bookings(&self, staff_id: &Ulid) -> Vec<Booking> {
        let mut out = self.index.records_for_staff(staff_id);
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }

    /// Active bookings on the resource whose span intersects the query
    /// window. Adjacent bookings do not count as intersecting.
    pub async fn overlapping_bookings(
        &self,
        resource_id: Ulid,
        query: Span,
    ) -> Result<Vec<Booking>, EngineError> {
        if query.start >= query.end {
            return Err(EngineError::InvalidTimeRange);
        }
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut out = self.index.overlapping_on_resource(resource_id, &query).await;
        out.sort_by_key(|b| (b.span.start, b.id));
        Ok(out)
    }

    /// Active bookings for a staff member intersecting the query
    /// window, across every resource they work.
    pub async fn staff_overlapping_bookings(
        &self,
        staff_id: Ulid,
        query: Span,
    ) -> Result<Vec<Booking>, EngineError> {
        if query.start >= query.end {
            return Err(EngineError::InvalidTimeRange);
        }
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut out = self.index.overlapping_for_staff(staff_id, &query).await;
        out.sort_by_key(|b| (b.span.start, b.id));
        Ok(out)
    }

    // ── Availability resolution ──────────────────────────────

    /// The rules in force on a calendar day, sorted by start time.
    /// One-off rules for the exact date fully displace the weekday
    /// rules; an empty result means the resource is closed that day.
    pub async fn effective_rules_for_day(
        &self,
        resource_id: Ulid,
        day: NaiveDate,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        let entry = self.require_resource(&resource_id)?;
        let guard = entry.read().await;
        Ok(effective_rules(&guard.rules, day).into_iter().cloned().collect())
    }

    /// Bookable slots on a day: fixed-width partitions for rules with a
    /// slot size, the whole window for free-form rules.
    pub async fn day_slots(&self, resource_id: Ulid, day: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let entry = self.require_resource(&resource_id)?;
        let guard = entry.read().await;
        let effective = effective_rules(&guard.rules, day);
        Ok(day_slots(&effective, day))
    }

    /// Open spans of a day with fully saturated stretches removed.
    /// A stretch is saturated when its peak booked quantity has reached
    /// the capacity in force there.
    pub async fn free_spans_for_day(
        &self,
        resource_id: Ulid,
        day: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let entry = self.require_resource(&resource_id)?;
        let (open, windows, max_capacity) = {
            let guard = entry.read().await;
            let effective = effective_rules(&guard.rules, day);
            (
                open_spans(&effective, day),
                guard.windows.clone(),
                guard.resource.max_capacity,
            )
        };
        if open.is_empty() {
            return Ok(vec![]);
        }

        let bounds = day_bounds(day);
        let allocs: Vec<(Span, u32)> = self
            .index
            .overlapping_on_resource(resource_id, &bounds)
            .await
            .iter()
            .map(|b| (b.span, b.quantity))
            .collect();
        let saturated = capacity::saturated_with_windows(&allocs, &windows, max_capacity, &bounds);
        Ok(subtract_intervals(&open, &saturated))
    }

    // ── Capacity resolution ──────────────────────────────────

    /// Capacity in force at an instant: the containing window's, or the
    /// resource's own maximum when no window covers it.
    pub async fn capacity_at(&self, resource_id: Ulid, at: Ms) -> Result<u32, EngineError> {
        let entry = self.require_resource(&resource_id)?;
        let guard = entry.read().await;
        Ok(capacity::capacity_at(
            &guard.windows,
            guard.resource.max_capacity,
            at,
        ))
    }

    /// The minimum capacity in force anywhere inside the span. This is
    /// the floor a booking crossing window boundaries is held to.
    pub async fn min_capacity_over(&self, resource_id: Ulid, span: Span) -> Result<u32, EngineError> {
        if span.start >= span.end {
            return Err(EngineError::InvalidTimeRange);
        }
        let entry = self.require_resource(&resource_id)?;
        let guard = entry.read().await;
        Ok(capacity::min_capacity_over(
            &guard.windows,
            guard.resource.max_capacity,
            &span,
        ))
    }
}
