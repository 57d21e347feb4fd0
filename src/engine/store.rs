use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{AvailabilityRule, CapacityWindow, Resource, Staff};

/// Everything a resource owns: the resource row itself, its
/// availability rules, its capacity windows, and its staff roster.
/// Guarded as one unit so rule and window edits read consistently.
#[derive(Debug)]
pub(crate) struct ResourceEntry {
    pub resource: Resource,
    pub rules: Vec<AvailabilityRule>,
    pub windows: Vec<CapacityWindow>,
    pub assigned: HashSet<Ulid>,
}

impl ResourceEntry {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            rules: Vec::new(),
            windows: Vec::new(),
            assigned: HashSet::new(),
        }
    }
}

pub(crate) type SharedEntry = Arc<RwLock<ResourceEntry>>;

/// Owner-side state: the resource and staff catalogs. Booking intervals
/// live in the overlap index, never here.
pub(crate) struct Catalog {
    resources: DashMap<Ulid, SharedEntry>,
    staff: DashMap<Ulid, Staff>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            staff: DashMap::new(),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &Ulid) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedEntry> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn insert(&self, resource: Resource) {
        self.resources
            .insert(resource.id, Arc::new(RwLock::new(ResourceEntry::new(resource))));
    }

    pub fn remove(&self, id: &Ulid) -> Option<SharedEntry> {
        self.resources.remove(id).map(|(_, e)| e)
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        self.resources.iter().map(|e| *e.key()).collect()
    }

    // ── Staff ────────────────────────────────────────────────

    pub fn staff_count(&self) -> usize {
        self.staff.len()
    }

    pub fn contains_staff(&self, id: &Ulid) -> bool {
        self.staff.contains_key(id)
    }

    pub fn get_staff(&self, id: &Ulid) -> Option<Staff> {
        self.staff.get(id).map(|s| s.value().clone())
    }

    pub fn insert_staff(&self, staff: Staff) {
        self.staff.insert(staff.id, staff);
    }

    pub fn remove_staff(&self, id: &Ulid) -> Option<Staff> {
        self.staff.remove(id).map(|(_, s)| s)
    }

    pub fn staff_ids(&self) -> Vec<Ulid> {
        self.staff.iter().map(|s| *s.key()).collect()
    }
}
