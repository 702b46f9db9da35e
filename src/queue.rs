//! Pending-delivery queue, worker dispatch, and the drain barrier.
//!
//! Emission pushes tasks here and returns; workers invoke the callbacks.
//! Each worker drains its own FIFO channel, and the manager routes every
//! task for a given event to the same worker, so deliveries to one event
//! stay in submission order while unrelated elements spread across the
//! pool.

use crate::event::Event;
use crate::registry::EventRegistry;
use crate::types::{ConnectionId, ContextId, ElementId, EmitHandler, EventKind, EventStats};
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One emitted-but-undelivered notification. Holds a delivery reference
/// on its event; the worker releases it after the callback returns.
pub(crate) struct PendingTask {
    pub event: Arc<Event>,
    pub kind: EventKind,
    pub context: ContextId,
    pub connection: Option<ConnectionId>,
    pub other: Option<ElementId>,
}

/// Barrier coupling emission admission to `stop_processing`'s drain.
///
/// `in_flight` counts tasks from admission until the worker has finished
/// the callback and released its event reference. Admission and stop share
/// one mutex, so no emit can slip a task past a completed drain.
pub(crate) struct DrainGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

struct GateState {
    stopped: bool,
    in_flight: u64,
}

impl DrainGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                stopped: false,
                in_flight: 0,
            }),
            idle: Condvar::new(),
        }
    }

    /// Admit one delivery; fails once processing has been stopped.
    pub fn try_admit(&self) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        state.in_flight += 1;
        true
    }

    /// Mark one admitted delivery finished.
    pub fn settle(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.in_flight > 0, "settle without a matching admit");
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Stop admissions and wait for every admitted delivery to finish.
    /// Idempotent.
    pub fn stop_and_drain(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        while state.in_flight > 0 {
            self.idle.wait(&mut state);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

/// Monotonic delivery counters.
#[derive(Default)]
pub(crate) struct StatCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl StatCounters {
    pub fn note_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventStats {
        EventStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the manager and its workers.
pub(crate) struct Shared {
    pub registry: EventRegistry,
    pub gate: DrainGate,
    pub stats: StatCounters,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            registry: EventRegistry::new(),
            gate: DrainGate::new(),
            stats: StatCounters::default(),
        }
    }
}

/// Drain one worker queue until the channel disconnects.
pub(crate) fn worker_loop(tasks: Receiver<PendingTask>, shared: Arc<Shared>) {
    while let Ok(task) = tasks.recv() {
        deliver(&task, &shared.stats);
        // Release the reference taken at emission, whatever the callback
        // did; the final release of a doomed event tears it down here.
        if task.event.release() {
            shared.registry.unregister(&task.event);
        }
        shared.gate.settle();
    }
}

/// Invoke at most one emit handler for the task, isolating failures at
/// the dispatch boundary so one misbehaving subscriber cannot stall the
/// queue or kill the worker.
fn deliver(task: &PendingTask, stats: &StatCounters) {
    let event = task.event.as_ref();
    let outcome = match event.callbacks().on_emit.as_ref() {
        Some(EmitHandler::Extended(callback)) => catch_unwind(AssertUnwindSafe(|| {
            callback(event, task.connection, task.other)
        })),
        Some(EmitHandler::Legacy(callback)) => catch_unwind(AssertUnwindSafe(|| {
            callback(task.context, event, event.user_data())
        })),
        None => Ok(Ok(())),
    };

    match outcome {
        Ok(Ok(())) => stats.note_delivered(),
        Ok(Err(err)) => {
            tracing::warn!("{:?} callback for event {} failed: {}", task.kind, event.id(), err);
            stats.note_failed();
        }
        Err(_) => {
            tracing::warn!("{:?} callback for event {} panicked", task.kind, event.id());
            stats.note_failed();
        }
    }
}
