use chrono::{NaiveDate, NaiveTime};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::capacity::{min_capacity_over, window_conflict};
use super::staffing::validate_assignment;
use super::{Engine, EngineError, ExclusionScope, WalCommand};

impl Engine {
    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        id: Ulid,
        tenant_id: Ulid,
        name: Option<String>,
        max_capacity: u32,
        requires_staff: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.catalog.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if max_capacity == 0 {
            return Err(EngineError::LimitExceeded("zero capacity"));
        }
        if self.catalog.contains_resource(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            tenant_id,
            name: name.clone(),
            max_capacity,
            requires_staff,
        };
        self.wal_append(&event).await?;
        self.catalog.insert(Resource {
            id,
            tenant_id,
            name,
            max_capacity,
            requires_staff,
        });
        metrics::gauge!(observability::RESOURCES_ACTIVE).increment(1.0);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_resource(
        &self,
        id: Ulid,
        name: Option<String>,
        max_capacity: u32,
        requires_staff: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if max_capacity == 0 {
            return Err(EngineError::LimitExceeded("zero capacity"));
        }
        let entry = self.require_resource(&id)?;
        let mut guard = entry.write().await;

        let event = Event::ResourceUpdated {
            id,
            name: name.clone(),
            max_capacity,
            requires_staff,
        };
        self.wal_append(&event).await?;
        guard.resource.name = name;
        guard.resource.max_capacity = max_capacity;
        guard.resource.requires_staff = requires_staff;
        drop(guard);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Delete a resource and everything it owns. Rules, windows, roster
    /// entries, and bookings (cancelled ones included) go with it, and
    /// its bookings' staff time is released.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if !self.catalog.contains_resource(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        // Catalog first: an in-flight booking re-checks the catalog
        // under its exclusion scope and aborts once the row is gone.
        self.catalog.remove(&id);
        let purged = self.index.purge_resource(id).await;
        if !purged.is_empty() {
            tracing::info!(resource = %id, bookings = purged.len(), "cascade removed bookings");
        }
        metrics::gauge!(observability::RESOURCES_ACTIVE).decrement(1.0);
        // Final event, then close the channel; subscribers drain it and
        // observe closure.
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Availability rules ───────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn add_rule(
        &self,
        id: Ulid,
        resource_id: Ulid,
        weekday: Option<u8>,
        date: Option<NaiveDate>,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_size: Option<u32>,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let schedule = RuleSchedule::from_parts(weekday, date)?;
        if start_time >= end_time {
            return Err(EngineError::InvalidTimeRange);
        }
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if guard.rules.len() >= MAX_RULES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many rules on resource"));
        }
        if guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RuleAdded {
            id,
            resource_id,
            schedule,
            start_time,
            end_time,
            slot_size,
        };
        self.wal_append(&event).await?;
        guard.rules.push(AvailabilityRule {
            id,
            resource_id,
            schedule,
            start_time,
            end_time,
            slot_size,
        });
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_rule(
        &self,
        id: Ulid,
        resource_id: Ulid,
        weekday: Option<u8>,
        date: Option<NaiveDate>,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_size: Option<u32>,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let schedule = RuleSchedule::from_parts(weekday, date)?;
        if start_time >= end_time {
            return Err(EngineError::InvalidTimeRange);
        }
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::RuleUpdated {
            id,
            resource_id,
            schedule,
            start_time,
            end_time,
            slot_size,
        };
        self.wal_append(&event).await?;
        if let Some(rule) = guard.rules.iter_mut().find(|r| r.id == id) {
            rule.schedule = schedule;
            rule.start_time = start_time;
            rule.end_time = end_time;
            rule.slot_size = slot_size;
        }
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    pub async fn remove_rule(&self, id: Ulid, resource_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if !guard.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::RuleRemoved { id, resource_id };
        self.wal_append(&event).await?;
        guard.rules.retain(|r| r.id != id);
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    // ── Capacity windows ─────────────────────────────────────

    /// Add a capacity window. Windows on one resource must be pairwise
    /// disjoint; a zero capacity is allowed and closes its span.
    pub async fn add_window(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: u32,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_span(&span)?;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many windows on resource"));
        }
        if guard.windows.iter().any(|w| w.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(clashing) = window_conflict(&guard.windows, &span, None) {
            return Err(EngineError::WindowOverlap(clashing));
        }

        let event = Event::WindowAdded {
            id,
            resource_id,
            span,
            capacity,
        };
        self.wal_append(&event).await?;
        guard.windows.push(CapacityWindow {
            id,
            resource_id,
            span,
            capacity,
        });
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    pub async fn update_window(
        &self,
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: u32,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_span(&span)?;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if !guard.windows.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(id));
        }
        if let Some(clashing) = window_conflict(&guard.windows, &span, Some(id)) {
            return Err(EngineError::WindowOverlap(clashing));
        }

        let event = Event::WindowUpdated {
            id,
            resource_id,
            span,
            capacity,
        };
        self.wal_append(&event).await?;
        if let Some(window) = guard.windows.iter_mut().find(|w| w.id == id) {
            window.span = span;
            window.capacity = capacity;
        }
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    pub async fn remove_window(&self, id: Ulid, resource_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if !guard.windows.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::WindowRemoved { id, resource_id };
        self.wal_append(&event).await?;
        guard.windows.retain(|w| w.id != id);
        drop(guard);
        self.notify.send(resource_id, &event);
        Ok(())
    }

    // ── Staff ────────────────────────────────────────────────

    pub async fn create_staff(
        &self,
        id: Ulid,
        tenant_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if self.catalog.staff_count() >= MAX_STAFF {
            return Err(EngineError::LimitExceeded("too many staff"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("staff name too long"));
        }
        if self.catalog.contains_staff(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffCreated {
            id,
            tenant_id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.catalog.insert_staff(Staff { id, tenant_id, name });
        self.notify.send(id, &event);
        Ok(())
    }

    /// Delete a staff member. Roster entries go with them; existing
    /// bookings keep their staff reference, so booked time stays held.
    pub async fn delete_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        if !self.catalog.contains_staff(&id) {
            return Err(EngineError::NotFound(id));
        }

        // Sweep the rosters first so replay sees the same unassignments.
        for resource_id in self.catalog.resource_ids() {
            let Some(entry) = self.catalog.get(&resource_id) else {
                continue;
            };
            let mut guard = entry.write().await;
            if guard.assigned.contains(&id) {
                let event = Event::StaffUnassigned {
                    resource_id,
                    staff_id: id,
                };
                self.wal_append(&event).await?;
                guard.assigned.remove(&id);
                drop(guard);
                self.notify.send(resource_id, &event);
            }
        }

        let event = Event::StaffDeleted { id };
        self.wal_append(&event).await?;
        self.catalog.remove_staff(&id);
        self.index.drop_staff_partition_if_empty(id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    /// Put a staff member on a resource's roster. Idempotent: assigning
    /// twice is a no-op.
    pub async fn assign_staff(&self, resource_id: Ulid, staff_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let staff = self
            .catalog
            .get_staff(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if staff.tenant_id != guard.resource.tenant_id {
            return Err(EngineError::StaffCompanyMismatch);
        }
        if guard.assigned.contains(&staff_id) {
            return Ok(());
        }
        if guard.assigned.len() >= MAX_ASSIGNMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many staff on resource"));
        }

        let event = Event::StaffAssigned {
            resource_id,
            staff_id,
        };
        self.wal_append(&event).await?;
        guard.assigned.insert(staff_id);
        drop(guard);
        self.notify.send(resource_id, &event);
        self.notify.send(staff_id, &event);
        Ok(())
    }

    /// Take a staff member off a roster. Idempotent, and existing
    /// bookings with this staff member stay as they are.
    pub async fn unassign_staff(&self, resource_id: Ulid, staff_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let entry = self.require_resource(&resource_id)?;
        let mut guard = entry.write().await;
        if !guard.assigned.contains(&staff_id) {
            return Ok(());
        }

        let event = Event::StaffUnassigned {
            resource_id,
            staff_id,
        };
        self.wal_append(&event).await?;
        guard.assigned.remove(&staff_id);
        drop(guard);
        self.notify.send(resource_id, &event);
        self.notify.send(staff_id, &event);
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a booking. Staffing and the capacity floor resolve before
    /// any ledger lock, so requests rejected there never touch the
    /// exclusion scope. The three exclusion checks and the insert then
    /// happen under one scope over the (resource, staff) pair, with the
    /// WAL acknowledgement in between, so a success is both
    /// conflict-free and durable before anyone can read it.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let _gate = self.compact_gate.read().await;
        validate_span(&req.span)?;
        if let Some(ref l) = req.label
            && l.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("label too long"));
        }
        if req.quantity == 0 {
            return Err(EngineError::LimitExceeded("zero quantity"));
        }

        // Owner data is read outside the scope; an owner edit racing
        // this window lands as if it happened after the commit.
        let capacity_floor = {
            let entry = self.require_resource(&req.resource_id)?;
            let guard = entry.read().await;
            let staff = match req.staff_id {
                Some(sid) => Some(
                    self.catalog
                        .get_staff(&sid)
                        .ok_or(EngineError::NotFound(sid))?,
                ),
                None => None,
            };
            validate_assignment(&guard.resource, &guard.assigned, staff.as_ref())?;
            min_capacity_over(&guard.windows, guard.resource.max_capacity, &req.span)
        };

        let mut scope = self.index.scope(req.resource_id, req.staff_id).await;
        match self.admit_under_scope(&mut scope, &req, capacity_floor).await {
            Ok((booking, event)) => {
                drop(scope);
                metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
                self.notify.send(booking.resource_id, &event);
                if let Some(sid) = booking.staff_id {
                    self.notify.send(sid, &event);
                }
                Ok(booking)
            }
            Err(e) => {
                // The scope may have created its partitions just for
                // this attempt; shed them once the guards are gone.
                drop(scope);
                self.index.shed_empty_partitions(req.resource_id, req.staff_id);
                Err(e)
            }
        }
    }

    /// The in-scope half of [`create_booking`]: existence re-check,
    /// exclusion checks, WAL append, insert.
    async fn admit_under_scope(
        &self,
        scope: &mut ExclusionScope<'_>,
        req: &BookingRequest,
        capacity_floor: u32,
    ) -> Result<(Booking, Event), EngineError> {
        // Re-check under the scope: a concurrent delete may have won.
        self.require_resource(&req.resource_id)?;
        if scope.bookings_on_resource() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        let booking = Booking {
            id: req.id,
            resource_id: req.resource_id,
            user_id: req.user_id,
            staff_id: req.staff_id,
            span: req.span,
            quantity: req.quantity,
            label: req.label.clone(),
            status: BookingStatus::Pending,
        };
        if let Err(kind) = scope.check(&booking, capacity_floor) {
            metrics::counter!(
                observability::BOOKING_CONFLICTS_TOTAL,
                "kind" => observability::conflict_label(kind)
            )
            .increment(1);
            return Err(kind.into());
        }

        let event = Event::BookingCreated {
            id: booking.id,
            resource_id: booking.resource_id,
            user_id: booking.user_id,
            staff_id: booking.staff_id,
            span: booking.span,
            quantity: booking.quantity,
            label: booking.label.clone(),
        };
        self.wal_append(&event).await?;
        scope.insert(&booking);
        Ok((booking, event))
    }

    /// Move a pending booking to confirmed. A no-op on bookings already
    /// confirmed or cancelled.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let record = self.index.get_record(&id).ok_or(EngineError::NotFound(id))?;
        if record.status != BookingStatus::Pending {
            return Ok(());
        }

        let event = Event::BookingConfirmed {
            id,
            resource_id: record.resource_id,
        };
        self.wal_append(&event).await?;
        self.index.set_status(&id, BookingStatus::Confirmed);
        metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        self.notify.send(record.resource_id, &event);
        if let Some(sid) = record.staff_id {
            self.notify.send(sid, &event);
        }
        Ok(())
    }

    /// Cancel a booking, releasing its resource and staff time at once.
    /// Cancelling an already-cancelled booking succeeds without effect.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compact_gate.read().await;
        let record = self.index.get_record(&id).ok_or(EngineError::NotFound(id))?;
        if record.status == BookingStatus::Cancelled {
            return Ok(());
        }

        let mut scope = self.index.scope(record.resource_id, record.staff_id).await;
        // A concurrent cancel or resource delete may have won the race.
        match self.index.get_record(&id) {
            Some(r) if r.status != BookingStatus::Cancelled => {}
            _ => {
                drop(scope);
                self.index.shed_empty_partitions(record.resource_id, record.staff_id);
                return Ok(());
            }
        }

        let event = Event::BookingCancelled {
            id,
            resource_id: record.resource_id,
        };
        self.wal_append(&event).await?;
        scope.remove(id);
        drop(scope);
        // Cancelling the last booking empties the partitions.
        self.index.shed_empty_partitions(record.resource_id, record.staff_id);

        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        self.notify.send(record.resource_id, &event);
        if let Some(sid) = record.staff_id {
            self.notify.send(sid, &event);
        }
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no mutation is mid-flight while the snapshot
        // is assembled, so it covers every acknowledged event, and the
        // rewrite command is queued before the gate reopens, so later
        // appends land in the rewritten file. Queries keep running.
        let gate = self.compact_gate.write().await;
        let mut events = Vec::new();

        for id in self.catalog.staff_ids() {
            if let Some(staff) = self.catalog.get_staff(&id) {
                events.push(Event::StaffCreated {
                    id: staff.id,
                    tenant_id: staff.tenant_id,
                    name: staff.name,
                });
            }
        }

        for id in self.catalog.resource_ids() {
            let Some(entry) = self.catalog.get(&id) else {
                continue;
            };
            let guard = entry.read().await;
            events.push(Event::ResourceCreated {
                id: guard.resource.id,
                tenant_id: guard.resource.tenant_id,
                name: guard.resource.name.clone(),
                max_capacity: guard.resource.max_capacity,
                requires_staff: guard.resource.requires_staff,
            });
            for rule in &guard.rules {
                events.push(Event::RuleAdded {
                    id: rule.id,
                    resource_id: id,
                    schedule: rule.schedule,
                    start_time: rule.start_time,
                    end_time: rule.end_time,
                    slot_size: rule.slot_size,
                });
            }
            for window in &guard.windows {
                events.push(Event::WindowAdded {
                    id: window.id,
                    resource_id: id,
                    span: window.span,
                    capacity: window.capacity,
                });
            }
            for staff_id in &guard.assigned {
                events.push(Event::StaffAssigned {
                    resource_id: id,
                    staff_id: *staff_id,
                });
            }
        }

        // Bookings replay as create plus status transition, so a
        // restart lands on the same records either side of a compact.
        for booking in self.index.all_records() {
            events.push(Event::BookingCreated {
                id: booking.id,
                resource_id: booking.resource_id,
                user_id: booking.user_id,
                staff_id: booking.staff_id,
                span: booking.span,
                quantity: booking.quantity,
                label: booking.label.clone(),
            });
            match booking.status {
                BookingStatus::Pending => {}
                BookingStatus::Confirmed => events.push(Event::BookingConfirmed {
                    id: booking.id,
                    resource_id: booking.resource_id,
                }),
                BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                    id: booking.id,
                    resource_id: booking.resource_id,
                }),
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        // The rewrite itself runs off-gate; mutations queued behind the
        // command resume while it proceeds.
        drop(gate);
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
