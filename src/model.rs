use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Overlapping part of `self` and `other`, if any.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end { Some(Span { start, end }) } else { None }
    }
}

/// When an opening-hours rule applies. The two shapes are mutually
/// exclusive by construction: a rule is weekly-recurring or one-off,
/// never both, never neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSchedule {
    /// Recurs every week on the given weekday.
    Weekly(Weekday),
    /// Applies to a single calendar date, overriding the weekly schedule.
    OneOff(NaiveDate),
}

impl RuleSchedule {
    /// Bridge from the two-nullable-field shape management frontends send.
    /// Weekday numbering is 0 = Monday .. 6 = Sunday.
    pub fn from_parts(weekday: Option<u8>, date: Option<NaiveDate>) -> Result<Self, EngineError> {
        match (weekday, date) {
            (Some(_), Some(_)) | (None, None) => Err(EngineError::AmbiguousRuleSpecification),
            (None, Some(d)) => Ok(RuleSchedule::OneOff(d)),
            (Some(w), None) => {
                let weekday = match w {
                    0 => Weekday::Mon,
                    1 => Weekday::Tue,
                    2 => Weekday::Wed,
                    3 => Weekday::Thu,
                    4 => Weekday::Fri,
                    5 => Weekday::Sat,
                    6 => Weekday::Sun,
                    _ => return Err(EngineError::AmbiguousRuleSpecification),
                };
                Ok(RuleSchedule::Weekly(weekday))
            }
        }
    }

    pub fn matches_day(&self, day: NaiveDate) -> bool {
        match self {
            RuleSchedule::Weekly(w) => day.weekday() == *w,
            RuleSchedule::OneOff(d) => *d == day,
        }
    }

    pub fn is_one_off(&self) -> bool {
        matches!(self, RuleSchedule::OneOff(_))
    }
}

/// Opening-hours rule on a resource. Wall-clock times, no date part;
/// the schedule decides which days the window exists on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub schedule: RuleSchedule,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Slot granularity in minutes. `None` or zero means the requester
    /// picks any range inside the window.
    pub slot_size: Option<u32>,
}

impl AvailabilityRule {
    /// Slot granularity, with zero normalized away.
    pub fn effective_slot_size(&self) -> Option<u32> {
        self.slot_size.filter(|s| *s > 0)
    }
}

/// Capacity override for part of a resource's timeline. Windows on one
/// resource never overlap, so capacity at an instant is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityWindow {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: Option<String>,
    /// Units bookable at once wherever no capacity window says otherwise.
    pub max_capacity: u32,
    /// When set, bookings must name an assigned staff member.
    pub requires_staff: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// A reservation. Active bookings (pending or confirmed) occupy their
/// span in the overlap index; cancelled ones keep the record only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub span: Span,
    /// Units of capacity this reservation consumes.
    pub quantity: u32,
    pub label: Option<String>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        !matches!(self.status, BookingStatus::Cancelled)
    }
}

/// Parameters for a booking attempt. The engine fills in the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub span: Span,
    pub quantity: u32,
    pub label: Option<String>,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        tenant_id: Ulid,
        name: Option<String>,
        max_capacity: u32,
        requires_staff: bool,
    },
    ResourceUpdated {
        id: Ulid,
        name: Option<String>,
        max_capacity: u32,
        requires_staff: bool,
    },
    ResourceDeleted {
        id: Ulid,
    },
    RuleAdded {
        id: Ulid,
        resource_id: Ulid,
        schedule: RuleSchedule,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_size: Option<u32>,
    },
    RuleUpdated {
        id: Ulid,
        resource_id: Ulid,
        schedule: RuleSchedule,
        start_time: NaiveTime,
        end_time: NaiveTime,
        slot_size: Option<u32>,
    },
    RuleRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    WindowAdded {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: u32,
    },
    WindowUpdated {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        capacity: u32,
    },
    WindowRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    StaffCreated {
        id: Ulid,
        tenant_id: Ulid,
        name: Option<String>,
    },
    StaffDeleted {
        id: Ulid,
    },
    StaffAssigned {
        resource_id: Ulid,
        staff_id: Ulid,
    },
    StaffUnassigned {
        resource_id: Ulid,
        staff_id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        staff_id: Option<Ulid>,
        span: Span,
        quantity: u32,
        label: Option<String>,
    },
    BookingConfirmed {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}
