//! Core handle, callback, and statistics types for the notification bus.

use crate::error::Result;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque handle to a graph element. Assigned by the engine; the bus never
/// interprets it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a directed connection between two elements.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Identity of the acting principal behind an operation or subscription.
/// Only compared for equality, never dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an event subscription (assigned by the manager).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access level of a context over an element. Assigned and checked by the
/// engine before emission; the bus only carries it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccessLevel(pub u8);

/// Kind of graph mutation a subscription listens for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An element was created.
    ElementCreated,
    /// A connection from or to the subscribed element was added.
    ConnectionAdded,
    /// A connection from or to the subscribed element was removed.
    ConnectionRemoved,
    /// The subscribed element's content changed.
    ContentChanged,
    /// The subscribed element is about to be deleted.
    ElementDeleted,
}

/// Opaque subscriber payload handed back to legacy callbacks. Owned by the
/// subscriber; the bus never inspects or clones it.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Narrow callback signature kept for engines migrating from the old API:
/// (acting context, event, subscriber payload).
pub type LegacyCallback =
    Box<dyn Fn(ContextId, &Event, Option<&UserData>) -> Result<()> + Send + Sync>;

/// Full callback signature: (event, affected connection, other endpoint).
pub type ExtendedCallback =
    Box<dyn Fn(&Event, Option<ConnectionId>, Option<ElementId>) -> Result<()> + Send + Sync>;

/// Invoked synchronously on the deleting thread when the subscribed
/// element disappears: (owning context, event, deleted element).
pub type DeleteCallback = Box<dyn Fn(ContextId, &Event, ElementId) -> Result<()> + Send + Sync>;

/// Emit-time handler of a subscription. A worker invokes whichever variant
/// is present, so one task can never trigger both signatures.
pub enum EmitHandler {
    Legacy(LegacyCallback),
    Extended(ExtendedCallback),
}

/// The callbacks attached to one subscription. Any subset may be absent.
#[derive(Default)]
pub struct CallbackSet {
    /// Invoked on a worker thread for every delivered notification.
    pub on_emit: Option<EmitHandler>,
    /// Invoked on the deleting thread when the element disappears.
    pub on_delete: Option<DeleteCallback>,
}

impl CallbackSet {
    /// Subscribe with the narrow legacy signature.
    pub fn legacy(
        callback: impl Fn(ContextId, &Event, Option<&UserData>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_emit: Some(EmitHandler::Legacy(Box::new(callback))),
            on_delete: None,
        }
    }

    /// Subscribe with the full signature.
    pub fn extended(
        callback: impl Fn(&Event, Option<ConnectionId>, Option<ElementId>) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            on_emit: Some(EmitHandler::Extended(Box::new(callback))),
            on_delete: None,
        }
    }

    /// Attach a deletion callback.
    pub fn with_delete(
        mut self,
        callback: impl Fn(ContextId, &Event, ElementId) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_delete = Some(Box::new(callback));
        self
    }
}

/// Snapshot of delivery counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EventStats {
    /// Callbacks that ran to completion (or deliveries with no handler).
    pub delivered: u64,
    /// Callbacks that returned an error or panicked.
    pub failed: u64,
    /// Deliveries skipped: subscription being torn down, or bus stopped.
    pub dropped: u64,
}
