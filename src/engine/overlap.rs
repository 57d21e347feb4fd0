use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::capacity::peak_load;
use super::error::ConflictKind;

/// Ledger payload on the resource partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResourceSlot {
    pub user_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub quantity: u32,
}

/// Ledger payload on the staff partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StaffSlot {
    pub resource_id: Ulid,
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerEntry<T> {
    pub id: Ulid,
    pub span: Span,
    pub data: T,
}

/// Start-sorted interval list. One primitive backs every exclusion
/// class; only the partition key differs.
#[derive(Debug)]
pub(crate) struct IntervalLedger<T> {
    entries: Vec<LedgerEntry<T>>,
}

impl<T> IntervalLedger<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, id: Ulid, span: Span, data: T) {
        let pos = self
            .entries
            .binary_search_by_key(&span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, LedgerEntry { id, span, data });
    }

    pub fn remove(&mut self, id: Ulid) -> Option<LedgerEntry<T>> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &LedgerEntry<T>> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    pub fn drain_all(&mut self) -> Vec<LedgerEntry<T>> {
        std::mem::take(&mut self.entries)
    }
}

impl<T> Default for IntervalLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

type SharedLedger<T> = Arc<RwLock<IntervalLedger<T>>>;

/// Lock a partition, creating it on demand. A partition observed empty
/// can be shed from the map concurrently, so after the grant the guard
/// must still be the mapped ledger; a held guard pins the entry, a
/// stale one means the entry was shed mid-acquisition and we retry.
async fn lock_partition<T>(
    map: &DashMap<Ulid, SharedLedger<T>>,
    id: Ulid,
) -> OwnedRwLockWriteGuard<IntervalLedger<T>> {
    loop {
        let ledger = map
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(IntervalLedger::new())))
            .clone();
        let guard = ledger.clone().write_owned().await;
        let live = map.get(&id).is_some_and(|e| Arc::ptr_eq(e.value(), &ledger));
        if live {
            return guard;
        }
    }
}

/// Per-resource and per-staff interval store with atomic
/// check-then-insert. The sole shared-mutation point for booking state:
/// every commit and removal happens under an [`ExclusionScope`], so two
/// racing requests on the same resource or staff member can never both
/// observe "no conflict". Unrelated resources and staff never contend.
pub struct OverlapIndex {
    resources: DashMap<Ulid, SharedLedger<ResourceSlot>>,
    staff: DashMap<Ulid, SharedLedger<StaffSlot>>,
    /// Full booking records, cancelled ones included.
    records: DashMap<Ulid, Booking>,
}

/// Write guards over one resource ledger and (optionally) one staff
/// ledger. Lock order is always resource first, then staff; holding the
/// scope makes check-then-insert indivisible.
pub struct ExclusionScope<'a> {
    index: &'a OverlapIndex,
    resource: OwnedRwLockWriteGuard<IntervalLedger<ResourceSlot>>,
    staff: Option<OwnedRwLockWriteGuard<IntervalLedger<StaffSlot>>>,
}

impl OverlapIndex {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            staff: DashMap::new(),
            records: DashMap::new(),
        }
    }

    fn resource_partition(&self, id: Ulid) -> SharedLedger<ResourceSlot> {
        self.resources
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(IntervalLedger::new())))
            .clone()
    }

    fn staff_partition(&self, id: Ulid) -> SharedLedger<StaffSlot> {
        self.staff
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(IntervalLedger::new())))
            .clone()
    }

    /// Acquire the mutual-exclusion scope for `(resource_id, staff_id)`.
    pub async fn scope(&self, resource_id: Ulid, staff_id: Option<Ulid>) -> ExclusionScope<'_> {
        let resource = lock_partition(&self.resources, resource_id).await;
        let staff = match staff_id {
            Some(sid) => Some(lock_partition(&self.staff, sid).await),
            None => None,
        };
        ExclusionScope {
            index: self,
            resource,
            staff,
        }
    }

    /// Check-then-insert in one call: the three exclusion checks against
    /// current state, and the insert only if all pass.
    pub async fn try_commit(&self, booking: &Booking, capacity_floor: u32) -> Result<(), ConflictKind> {
        let mut scope = self.scope(booking.resource_id, booking.staff_id).await;
        match scope.check(booking, capacity_floor) {
            Ok(()) => {
                scope.insert(booking);
                Ok(())
            }
            Err(kind) => {
                drop(scope);
                self.shed_empty_partitions(booking.resource_id, booking.staff_id);
                Err(kind)
            }
        }
    }

    /// Remove a booking's intervals and mark its record cancelled.
    /// Visible to every subsequent query the instant this returns.
    pub async fn remove(&self, booking: &Booking) {
        let mut scope = self.scope(booking.resource_id, booking.staff_id).await;
        scope.remove(booking.id);
        drop(scope);
        self.shed_empty_partitions(booking.resource_id, booking.staff_id);
    }

    /// Active bookings on a resource intersecting the span.
    pub async fn overlapping_on_resource(&self, resource_id: Ulid, span: &Span) -> Vec<Booking> {
        let Some(ledger) = self.resources.get(&resource_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .overlapping(span)
            .filter_map(|e| self.records.get(&e.id).map(|r| r.clone()))
            .collect()
    }

    /// Active bookings for a staff member intersecting the span, across
    /// all resources.
    pub async fn overlapping_for_staff(&self, staff_id: Ulid, span: &Span) -> Vec<Booking> {
        let Some(ledger) = self.staff.get(&staff_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .overlapping(span)
            .filter_map(|e| self.records.get(&e.id).map(|r| r.clone()))
            .collect()
    }

    // ── Record access ────────────────────────────────────────

    pub(crate) fn get_record(&self, id: &Ulid) -> Option<Booking> {
        self.records.get(id).map(|r| r.clone())
    }

    pub(crate) fn set_status(&self, id: &Ulid, status: BookingStatus) {
        if let Some(mut rec) = self.records.get_mut(id) {
            rec.status = status;
        }
    }

    pub(crate) fn records_for_resource(&self, resource_id: &Ulid) -> Vec<Booking> {
        self.records
            .iter()
            .filter(|r| r.resource_id == *resource_id)
            .map(|r| r.clone())
            .collect()
    }

    pub(crate) fn records_for_user(&self, user_id: &Ulid) -> Vec<Booking> {
        self.records
            .iter()
            .filter(|r| r.user_id == *user_id)
            .map(|r| r.clone())
            .collect()
    }

    pub(crate) fn records_for_staff(&self, staff_id: &Ulid) -> Vec<Booking> {
        self.records
            .iter()
            .filter(|r| r.staff_id == Some(*staff_id))
            .map(|r| r.clone())
            .collect()
    }

    pub(crate) fn all_records(&self) -> Vec<Booking> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    // ── Cascade ──────────────────────────────────────────────

    /// Remove everything a deleted resource owns: its ledger partition,
    /// its bookings' staff-ledger entries, and every record (cancelled
    /// ones included). Returns the removed booking ids.
    pub(crate) async fn purge_resource(&self, resource_id: Ulid) -> Vec<Ulid> {
        let partition = self.resource_partition(resource_id);
        let entries = {
            let mut guard = partition.write().await;
            guard.drain_all()
        };
        self.resources.remove(&resource_id);

        for entry in &entries {
            if let Some(staff_id) = entry.data.staff_id {
                let staff_partition = self.staff_partition(staff_id);
                let mut sguard = staff_partition.write().await;
                sguard.remove(entry.id);
                drop(sguard);
                self.drop_staff_partition_if_empty(staff_id);
            }
        }

        let mut removed: Vec<Ulid> = self
            .records
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .map(|r| r.id)
            .collect();
        for id in &removed {
            self.records.remove(id);
        }
        for entry in entries {
            if !removed.contains(&entry.id) {
                removed.push(entry.id);
            }
        }
        removed
    }

    /// Partitions are created on demand by `scope`, so paths that may
    /// leave one empty shed it here. The check runs under the map shard
    /// lock, and `try_read` fails while any scope holds or awaits the
    /// ledger, so only an idle, empty partition is unlinked. A scope
    /// that loses this race re-validates after its lock grant.
    pub(crate) fn shed_empty_partitions(&self, resource_id: Ulid, staff_id: Option<Ulid>) {
        self.drop_resource_partition_if_empty(resource_id);
        if let Some(sid) = staff_id {
            self.drop_staff_partition_if_empty(sid);
        }
    }

    pub(crate) fn drop_resource_partition_if_empty(&self, resource_id: Ulid) {
        self.resources
            .remove_if(&resource_id, |_, ledger| ledger.try_read().is_ok_and(|g| g.is_empty()));
    }

    pub(crate) fn drop_staff_partition_if_empty(&self, staff_id: Ulid) {
        self.staff
            .remove_if(&staff_id, |_, ledger| ledger.try_read().is_ok_and(|g| g.is_empty()));
    }

    #[cfg(test)]
    pub(crate) fn has_resource_partition(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    #[cfg(test)]
    pub(crate) fn has_staff_partition(&self, id: &Ulid) -> bool {
        self.staff.contains_key(id)
    }

    // ── Replay path ──────────────────────────────────────────
    // Single-threaded, before the engine is shared. The ledger locks
    // are uncontended, so try_write always succeeds instantly. Never
    // block here: replay may run inside an async context.

    pub(crate) fn insert_replay(&self, booking: &Booking) {
        let partition = self.resource_partition(booking.resource_id);
        partition.try_write().expect("replay: uncontended write").insert(
            booking.id,
            booking.span,
            ResourceSlot {
                user_id: booking.user_id,
                staff_id: booking.staff_id,
                quantity: booking.quantity,
            },
        );
        if let Some(sid) = booking.staff_id {
            let partition = self.staff_partition(sid);
            partition.try_write().expect("replay: uncontended write").insert(
                booking.id,
                booking.span,
                StaffSlot { resource_id: booking.resource_id },
            );
        }
        self.records.insert(booking.id, booking.clone());
    }

    pub(crate) fn remove_replay(&self, booking_id: &Ulid) {
        let Some(rec) = self.get_record(booking_id) else {
            return;
        };
        let partition = self.resource_partition(rec.resource_id);
        partition
            .try_write()
            .expect("replay: uncontended write")
            .remove(*booking_id);
        if let Some(sid) = rec.staff_id {
            self.staff_partition(sid)
                .try_write()
                .expect("replay: uncontended write")
                .remove(*booking_id);
        }
        self.set_status(booking_id, BookingStatus::Cancelled);
        // Keep replayed state matching the live path, which sheds as it goes.
        self.shed_empty_partitions(rec.resource_id, rec.staff_id);
    }

    pub(crate) fn purge_resource_replay(&self, resource_id: Ulid) {
        if let Some((_, partition)) = self.resources.remove(&resource_id) {
            let entries = partition
                .try_write()
                .expect("replay: uncontended write")
                .drain_all();
            for entry in entries {
                if let Some(sid) = entry.data.staff_id
                    && let Some(staff_partition) = self.staff.get(&sid).map(|e| e.value().clone())
                {
                    staff_partition
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(entry.id);
                    self.drop_staff_partition_if_empty(sid);
                }
            }
        }
        let ids: Vec<Ulid> = self
            .records
            .iter()
            .filter(|r| r.resource_id == resource_id)
            .map(|r| r.id)
            .collect();
        for id in ids {
            self.records.remove(&id);
        }
    }
}

impl Default for OverlapIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusionScope<'_> {
    /// The three checks, in declaration order; the first failure wins.
    pub fn check(&self, booking: &Booking, capacity_floor: u32) -> Result<(), ConflictKind> {
        // 1. Same user, same resource, overlapping span.
        if self
            .resource
            .overlapping(&booking.span)
            .any(|e| e.data.user_id == booking.user_id)
        {
            return Err(ConflictKind::UserResourceOverlap);
        }

        // 2. Same staff member anywhere, overlapping span.
        if let Some(staff) = &self.staff
            && staff.overlapping(&booking.span).next().is_some()
        {
            return Err(ConflictKind::StaffOverlap);
        }

        // 3. Peak concurrent quantity within the span stays under the floor.
        let allocs: Vec<(Span, u32)> = self
            .resource
            .overlapping(&booking.span)
            .map(|e| (e.span, e.data.quantity))
            .collect();
        let peak = peak_load(&allocs, &booking.span);
        if peak as u64 + booking.quantity as u64 > capacity_floor as u64 {
            return Err(ConflictKind::CapacityExceeded);
        }

        Ok(())
    }

    /// Insert into both ledgers and record the booking. Callers persist
    /// the event before this.
    pub fn insert(&mut self, booking: &Booking) {
        self.resource.insert(
            booking.id,
            booking.span,
            ResourceSlot {
                user_id: booking.user_id,
                staff_id: booking.staff_id,
                quantity: booking.quantity,
            },
        );
        if let Some(staff) = &mut self.staff {
            staff.insert(booking.id, booking.span, StaffSlot { resource_id: booking.resource_id });
        }
        self.index.records.insert(booking.id, booking.clone());
    }

    /// Remove the booking's intervals and mark the record cancelled.
    pub fn remove(&mut self, booking_id: Ulid) {
        self.resource.remove(booking_id);
        if let Some(staff) = &mut self.staff {
            staff.remove(booking_id);
        }
        if let Some(mut rec) = self.index.records.get_mut(&booking_id) {
            rec.status = BookingStatus::Cancelled;
        }
    }

    /// Active bookings currently on the resource partition.
    pub fn bookings_on_resource(&self) -> usize {
        self.resource.len()
    }
}
