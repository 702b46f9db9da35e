//! Event records and their lifecycle protocol.
//!
//! An event's liveness lives in a single atomic word decoded as a small
//! state machine:
//!
//! - `Active { refs }`: live, with `refs` outstanding references
//! - `Doomed { refs }`: destruction requested, references draining
//!
//! The word starts at `Active { refs: 1 }`, the registry's own hold.
//! Emission takes a reference with [`Event::try_retain`], which fails once
//! the event is doomed, so the count can never rise again after teardown
//! became reachable. The release that observes `Doomed { refs: 0 }` runs
//! the teardown; there is no other free path.

use crate::error::{EventError, Result};
use crate::types::{CallbackSet, ContextId, ElementId, EventId, EventKind, UserData};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// High bit marks destruction as requested; the rest is the count.
const DOOMED_BIT: u32 = 1 << 31;

/// Decoded lifecycle state. `Doomed` is one-way.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LifeState {
    Active { refs: u32 },
    Doomed { refs: u32 },
}

impl LifeState {
    fn decode(raw: u32) -> Self {
        let refs = raw & !DOOMED_BIT;
        if raw & DOOMED_BIT != 0 {
            LifeState::Doomed { refs }
        } else {
            LifeState::Active { refs }
        }
    }

    fn encode(self) -> u32 {
        match self {
            LifeState::Active { refs } => refs,
            LifeState::Doomed { refs } => refs | DOOMED_BIT,
        }
    }
}

/// A single subscription: one element, one mutation kind, one callback set.
///
/// Returned by `EventManager::subscribe` and used as the handle for
/// unsubscribing. The exclusive section ([`Event::lock`] /
/// [`Event::unlock`]) lets a subscriber guard compound updates against
/// other contexts touching the same subscription.
pub struct Event {
    id: EventId,
    element: ElementId,
    kind: EventKind,
    owner: ContextId,
    callbacks: CallbackSet,
    user_data: Option<UserData>,
    state: AtomicU32,
    /// Context currently holding the exclusive section (None = unlocked).
    holder: Mutex<Option<ContextId>>,
    released: Condvar,
}

impl Event {
    pub(crate) fn new(
        id: EventId,
        element: ElementId,
        kind: EventKind,
        owner: ContextId,
        callbacks: CallbackSet,
        user_data: Option<UserData>,
    ) -> Self {
        Self {
            id,
            element,
            kind,
            owner,
            callbacks,
            user_data,
            state: AtomicU32::new(LifeState::Active { refs: 1 }.encode()),
            holder: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Context that created the subscription.
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// Subscriber payload, if one was supplied.
    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    pub(crate) fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    /// Whether destruction has been requested.
    pub fn is_destroy_requested(&self) -> bool {
        matches!(
            LifeState::decode(self.state.load(Ordering::Acquire)),
            LifeState::Doomed { .. }
        )
    }

    // --- Lifecycle protocol ---

    /// Take a reference for an in-flight delivery. Fails once destruction
    /// has been requested; the event must then receive no new work.
    pub(crate) fn try_retain(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match LifeState::decode(current) {
                LifeState::Doomed { .. } => return false,
                LifeState::Active { refs } => LifeState::Active { refs: refs + 1 },
            };
            match self.state.compare_exchange_weak(
                current,
                next.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drop one reference. Returns true exactly when this was the final
    /// reference of a doomed event; the caller must then unregister it.
    pub(crate) fn release(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match LifeState::decode(current) {
                LifeState::Active { refs } => {
                    debug_assert!(refs > 0, "release without a matching retain");
                    LifeState::Active {
                        refs: refs.saturating_sub(1),
                    }
                }
                LifeState::Doomed { refs } => {
                    debug_assert!(refs > 0, "release without a matching retain");
                    LifeState::Doomed {
                        refs: refs.saturating_sub(1),
                    }
                }
            };
            match self.state.compare_exchange_weak(
                current,
                next.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next == LifeState::Doomed { refs: 0 },
                Err(observed) => current = observed,
            }
        }
    }

    /// Mark the event for destruction. Returns true if this call made the
    /// transition; the winner is responsible for dropping the registration
    /// reference. Setting the flag twice is a no-op, not an error.
    pub(crate) fn request_destroy(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match LifeState::decode(current) {
                LifeState::Doomed { .. } => return false,
                LifeState::Active { refs } => LifeState::Doomed { refs },
            };
            match self.state.compare_exchange_weak(
                current,
                next.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    // --- Exclusive section ---

    /// Acquire the exclusive section for `ctx`, blocking while another
    /// context holds it. Re-acquisition by the holder returns immediately.
    pub fn lock(&self, ctx: ContextId) {
        let mut holder = self.holder.lock();
        if *holder == Some(ctx) {
            return;
        }
        while holder.is_some() {
            self.released.wait(&mut holder);
        }
        *holder = Some(ctx);
    }

    /// Release the exclusive section. Fails with `NotOwner` when `ctx`
    /// does not hold it.
    pub fn unlock(&self, ctx: ContextId) -> Result<()> {
        let mut holder = self.holder.lock();
        if *holder != Some(ctx) {
            return Err(EventError::NotOwner(ctx));
        }
        *holder = None;
        self.released.notify_one();
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("element", &self.element)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish()
    }
}
