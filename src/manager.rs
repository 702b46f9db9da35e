//! The event manager: subscription, emission, deletion notification, and
//! subsystem lifecycle.

use crate::error::{EventError, Result};
use crate::event::Event;
use crate::queue::{worker_loop, PendingTask, Shared};
use crate::types::{
    AccessLevel, CallbackSet, ConnectionId, ContextId, ElementId, EventId, EventKind, EventStats,
    UserData,
};
use crossbeam_channel::{unbounded, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Engine-supplied probe deciding whether an element handle is live.
/// Consulted on subscribe so dead handles are rejected up front.
pub type ElementProbe = Arc<dyn Fn(ElementId) -> bool + Send + Sync>;

/// Manager configuration.
#[derive(Clone)]
pub struct EventManagerConfig {
    /// Worker threads draining the pending queues.
    ///
    /// Tasks for one event always land on the same worker, so deliveries
    /// to a single event stay in submission order regardless of pool size.
    pub worker_threads: usize,

    /// Probe consulted on subscribe to reject dead elements.
    /// `None` accepts every handle.
    pub element_probe: Option<ElementProbe>,
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            element_probe: None,
        }
    }
}

impl fmt::Debug for EventManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManagerConfig")
            .field("worker_threads", &self.worker_threads)
            .field("element_probe", &self.element_probe.is_some())
            .finish()
    }
}

/// Manages event subscriptions and dispatches notifications.
///
/// One instance is the whole subsystem: the registry, the pending queues,
/// and the worker pool live inside it, so lifecycle stays explicit: build
/// it on engine startup, call [`EventManager::shutdown`] on the way down.
pub struct EventManager {
    shared: Arc<Shared>,
    senders: Vec<Sender<PendingTask>>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    probe: Option<ElementProbe>,
}

impl EventManager {
    /// Create a manager with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(EventManagerConfig::default())
    }

    /// Create a manager with the given configuration.
    pub fn with_config(config: EventManagerConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let worker_count = config.worker_threads.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (sender, receiver) = unbounded();
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("axon-worker-{index}"))
                .spawn(move || worker_loop(receiver, worker_shared))
                .map_err(|err| EventError::ResourceExhausted(err.to_string()))?;
            senders.push(sender);
            workers.push(handle);
        }

        tracing::debug!("event manager started with {} worker(s)", worker_count);

        Ok(Self {
            shared,
            senders,
            workers,
            next_id: AtomicU64::new(1),
            probe: config.element_probe,
        })
    }

    // --- Subscription ---

    /// Subscribe `ctx` to `kind` mutations on `element`.
    ///
    /// The returned event doubles as the unsubscribe handle. Fails with
    /// `InvalidElement` when the engine probe rejects the handle, and with
    /// `AlreadyStopped` once processing has been stopped.
    pub fn subscribe(
        &self,
        ctx: ContextId,
        element: ElementId,
        kind: EventKind,
        callbacks: CallbackSet,
        user_data: Option<UserData>,
    ) -> Result<Arc<Event>> {
        if self.shared.gate.is_stopped() {
            return Err(EventError::AlreadyStopped);
        }
        if let Some(probe) = &self.probe {
            if !probe(element) {
                return Err(EventError::InvalidElement(element));
            }
        }

        let id = EventId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let event = Arc::new(Event::new(id, element, kind, ctx, callbacks, user_data));
        self.shared.registry.register(Arc::clone(&event));
        Ok(event)
    }

    /// Request destruction of a subscription.
    ///
    /// Safe to call from any thread and any number of times; duplicate
    /// calls are no-ops. The event is freed once in-flight deliveries
    /// drain; with none in flight it is freed before this returns.
    pub fn unsubscribe(&self, event: &Arc<Event>) {
        self.retire(event);
    }

    /// Set the destroy flag and drop the registration reference. The
    /// transition winner does both; later callers do nothing.
    fn retire(&self, event: &Arc<Event>) {
        if event.request_destroy() && event.release() {
            self.shared.registry.unregister(event);
        }
    }

    // --- Emission ---

    /// Notify subscribers of `element` that a `kind` mutation occurred.
    ///
    /// Enqueues one delivery per live subscription and returns without
    /// waiting for any callback. After [`EventManager::stop_processing`]
    /// this still succeeds but delivers nothing. `access` is the acting
    /// context's access level, already checked by the engine; the bus only
    /// propagates it.
    pub fn emit(
        &self,
        ctx: ContextId,
        element: ElementId,
        access: AccessLevel,
        kind: EventKind,
        connection: Option<ConnectionId>,
        other: Option<ElementId>,
    ) -> Result<()> {
        if self.shared.gate.is_stopped() {
            return Ok(());
        }
        tracing::trace!("emit {:?} on {} by {} (access {:?})", kind, element, ctx, access);

        for event in self.shared.registry.lookup(element, Some(kind)) {
            // Being torn down concurrently; must not receive new work.
            if !event.try_retain() {
                self.shared.stats.note_dropped();
                continue;
            }
            if !self.shared.gate.try_admit() {
                // Stopped between the check above and here.
                self.abandon(&event);
                continue;
            }

            let shard = (event.id().0 % self.senders.len() as u64) as usize;
            let task = PendingTask {
                event: Arc::clone(&event),
                kind,
                context: ctx,
                connection,
                other,
            };
            if self.senders[shard].send(task).is_err() {
                // Workers are gone; hand the admission back.
                self.shared.gate.settle();
                self.abandon(&event);
            }
        }
        Ok(())
    }

    /// Give back a delivery reference that will never be serviced.
    fn abandon(&self, event: &Arc<Event>) {
        if event.release() {
            self.shared.registry.unregister(event);
        }
        self.shared.stats.note_dropped();
    }

    // --- Deletion ---

    /// Notify the bus that the engine is deleting `element`.
    ///
    /// Fires delete callbacks synchronously on the calling thread, then
    /// marks every subscription on the element for destruction. Events
    /// with a delivery in flight are freed later by the worker holding
    /// their last reference; this never blocks on them. The engine must
    /// not reuse the element handle before this returns.
    pub fn notify_element_deleted(&self, element: ElementId) -> Result<()> {
        for event in self.shared.registry.lookup(element, None) {
            // Already being torn down by an explicit unsubscribe.
            if event.is_destroy_requested() {
                continue;
            }
            if let Some(callback) = event.callbacks().on_delete.as_ref() {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| callback(event.owner(), &event, element)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!("delete callback for event {} failed: {}", event.id(), err);
                    }
                    Err(_) => {
                        tracing::warn!("delete callback for event {} panicked", event.id());
                    }
                }
            }
            self.retire(&event);
        }
        Ok(())
    }

    // --- Lifecycle ---

    /// Stop accepting deliveries and wait for in-flight ones to finish.
    ///
    /// Emissions made after this call are accepted and silently dropped;
    /// new subscriptions are refused with `AlreadyStopped`. Idempotent.
    pub fn stop_processing(&self) {
        self.shared.gate.stop_and_drain();
    }

    /// Tear the subsystem down: drain deliveries, join the workers, and
    /// free every remaining event along with the registry.
    ///
    /// Consumes the manager, so no operation can follow it. Dropping the
    /// manager without calling this performs the same teardown.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.stop_processing();
        // Disconnect the queues so workers fall out of their recv loops.
        self.senders.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // Nothing is in flight any more, so every event frees right here.
        for event in self.shared.registry.drain() {
            if event.request_destroy() {
                event.release();
            }
        }
    }

    // --- Observability ---

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> EventStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
