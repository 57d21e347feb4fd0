//! In-memory booking engine with durable write-ahead logging.
//!
//! Resources carry weekday and one-off availability rules, capacity
//! windows, and staff rosters. Bookings commit through a per-resource,
//! per-staff exclusion scope: overlap and capacity checks plus the
//! insert happen indivisibly, so racing requests for the same slot
//! resolve to exactly one winner. Every mutation is persisted via a
//! group-commit WAL before it becomes visible and fans out to live
//! subscribers afterwards.

pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use engine::{wall_clock_ms, ConflictKind, Engine, EngineError, OverlapIndex};
pub use model::*;
pub use notify::NotifyHub;
