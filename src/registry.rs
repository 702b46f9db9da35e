//! Process-wide index from graph elements to their subscribed events.

use crate::event::Event;
use crate::types::{ElementId, EventKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent element → subscriber-set index.
///
/// Lookups return a snapshot, not a committed view: subscriptions added or
/// removed while a scan runs may be missed or included. Callers must take
/// a delivery reference on each event before handing it work, which is
/// what keeps the snapshot safe.
pub struct EventRegistry {
    entries: RwLock<HashMap<ElementId, Vec<Arc<Event>>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert an event under its element.
    pub(crate) fn register(&self, event: Arc<Event>) {
        self.entries
            .write()
            .entry(event.element())
            .or_default()
            .push(event);
    }

    /// Remove an event by identity; drops the element's entry when it
    /// empties.
    pub(crate) fn unregister(&self, event: &Event) {
        let mut entries = self.entries.write();
        if let Some(events) = entries.get_mut(&event.element()) {
            events.retain(|candidate| candidate.id() != event.id());
            if events.is_empty() {
                entries.remove(&event.element());
            }
        }
    }

    /// Snapshot the subscribers of `element`, optionally narrowed to one
    /// mutation kind (`None` matches any kind).
    pub fn lookup(&self, element: ElementId, kind: Option<EventKind>) -> Vec<Arc<Event>> {
        let entries = self.entries.read();
        match entries.get(&element) {
            Some(events) => events
                .iter()
                .filter(|event| kind.map_or(true, |k| event.kind() == k))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remove and return every registered event. Shutdown only.
    pub(crate) fn drain(&self) -> Vec<Arc<Event>> {
        self.entries
            .write()
            .drain()
            .flat_map(|(_, events)| events)
            .collect()
    }

    /// Total number of registered events.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}
