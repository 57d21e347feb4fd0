mod availability;
mod capacity;
mod error;
mod mutations;
mod overlap;
mod queries;
mod staffing;
mod store;

pub use availability::wall_clock_ms;
pub use error::{ConflictKind, EngineError};
pub use overlap::{ExclusionScope, OverlapIndex};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use store::Catalog;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine. Owner state (resources, rules, windows, staff)
/// lives in the catalog; booking intervals and records live in the
/// overlap index. Every mutation persists its event to the WAL before
/// becoming visible, and fans out over the notify hub after.
pub struct Engine {
    pub(crate) catalog: Catalog,
    pub(crate) index: OverlapIndex,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Every mutation holds this shared from before its WAL append until
    /// its in-memory apply is done; compaction holds it exclusive while
    /// assembling the snapshot and queueing the rewrite. So the snapshot
    /// covers every acknowledged event, and events appended afterwards
    /// land behind the rewrite in the new file.
    pub(super) compact_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            catalog: Catalog::new(),
            index: OverlapIndex::new(),
            wal_tx,
            compact_gate: RwLock::new(()),
            notify,
        };
        for event in &events {
            engine.replay_apply(event);
        }
        Ok(engine)
    }

    /// Apply one replayed event. Single-threaded: the engine is not yet
    /// shared, so try_read/try_write always succeed instantly. Never use
    /// blocking_read/blocking_write here because this may run inside an
    /// async context.
    fn replay_apply(&self, event: &Event) {
        match event {
            Event::ResourceCreated {
                id,
                tenant_id,
                name,
                max_capacity,
                requires_staff,
            } => {
                self.catalog.insert(Resource {
                    id: *id,
                    tenant_id: *tenant_id,
                    name: name.clone(),
                    max_capacity: *max_capacity,
                    requires_staff: *requires_staff,
                });
            }
            Event::ResourceUpdated {
                id,
                name,
                max_capacity,
                requires_staff,
            } => {
                if let Some(entry) = self.catalog.get(id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.resource.name = name.clone();
                    guard.resource.max_capacity = *max_capacity;
                    guard.resource.requires_staff = *requires_staff;
                }
            }
            Event::ResourceDeleted { id } => {
                self.catalog.remove(id);
                self.index.purge_resource_replay(*id);
            }
            Event::RuleAdded {
                id,
                resource_id,
                schedule,
                start_time,
                end_time,
                slot_size,
            } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.rules.push(AvailabilityRule {
                        id: *id,
                        resource_id: *resource_id,
                        schedule: *schedule,
                        start_time: *start_time,
                        end_time: *end_time,
                        slot_size: *slot_size,
                    });
                }
            }
            Event::RuleUpdated {
                id,
                resource_id,
                schedule,
                start_time,
                end_time,
                slot_size,
            } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    if let Some(rule) = guard.rules.iter_mut().find(|r| r.id == *id) {
                        rule.schedule = *schedule;
                        rule.start_time = *start_time;
                        rule.end_time = *end_time;
                        rule.slot_size = *slot_size;
                    }
                }
            }
            Event::RuleRemoved { id, resource_id } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.rules.retain(|r| r.id != *id);
                }
            }
            Event::WindowAdded {
                id,
                resource_id,
                span,
                capacity,
            } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.windows.push(CapacityWindow {
                        id: *id,
                        resource_id: *resource_id,
                        span: *span,
                        capacity: *capacity,
                    });
                }
            }
            Event::WindowUpdated {
                id,
                resource_id,
                span,
                capacity,
            } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    if let Some(window) = guard.windows.iter_mut().find(|w| w.id == *id) {
                        window.span = *span;
                        window.capacity = *capacity;
                    }
                }
            }
            Event::WindowRemoved { id, resource_id } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.windows.retain(|w| w.id != *id);
                }
            }
            Event::StaffCreated { id, tenant_id, name } => {
                self.catalog.insert_staff(Staff {
                    id: *id,
                    tenant_id: *tenant_id,
                    name: name.clone(),
                });
            }
            Event::StaffDeleted { id } => {
                self.catalog.remove_staff(id);
            }
            Event::StaffAssigned { resource_id, staff_id } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.assigned.insert(*staff_id);
                }
            }
            Event::StaffUnassigned { resource_id, staff_id } => {
                if let Some(entry) = self.catalog.get(resource_id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.assigned.remove(staff_id);
                }
            }
            Event::BookingCreated {
                id,
                resource_id,
                user_id,
                staff_id,
                span,
                quantity,
                label,
            } => {
                self.index.insert_replay(&Booking {
                    id: *id,
                    resource_id: *resource_id,
                    user_id: *user_id,
                    staff_id: *staff_id,
                    span: *span,
                    quantity: *quantity,
                    label: label.clone(),
                    status: BookingStatus::Pending,
                });
            }
            Event::BookingConfirmed { id, .. } => {
                self.index.set_status(id, BookingStatus::Confirmed);
            }
            Event::BookingCancelled { id, .. } => {
                self.index.remove_replay(id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Lookup a resource id, erroring when the catalog has no such row.
    pub(super) fn require_resource(&self, id: &Ulid) -> Result<store::SharedEntry, EngineError> {
        self.catalog.get(id).ok_or(EngineError::NotFound(*id))
    }
}
