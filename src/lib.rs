//! # Axon
//!
//! A concurrent event-notification bus for a semantic graph store.
//!
//! External actors subscribe to mutations on a graph element and are
//! notified asynchronously on worker threads, while the engine can safely
//! tear down subscriptions for elements that disappear, all without a
//! global mutex.
//!
//! ## Core Concepts
//!
//! - **Events**: one subscription record per (element, mutation kind) pair
//! - **Registry**: concurrent index from element to its subscribers
//! - **Pending queues**: emission is decoupled from callback execution
//! - **Lifecycle protocol**: a reference count plus a one-way destroy flag
//!   decide exactly when an event is freed
//!
//! ## Example
//!
//! ```ignore
//! use axon::{AccessLevel, CallbackSet, ConnectionId, ContextId, ElementId,
//!            EventKind, EventManager};
//!
//! let bus = EventManager::new()?;
//!
//! // Subscribe to connection additions on element 42
//! let event = bus.subscribe(
//!     ContextId(1),
//!     ElementId(42),
//!     EventKind::ConnectionAdded,
//!     CallbackSet::extended(|event, connection, other| {
//!         println!("{} gained {:?} -> {:?}", event.element(), connection, other);
//!         Ok(())
//!     }),
//!     None,
//! )?;
//!
//! // The engine emits after performing a mutation
//! bus.emit(
//!     ContextId(2),
//!     ElementId(42),
//!     AccessLevel(0),
//!     EventKind::ConnectionAdded,
//!     Some(ConnectionId(7)),
//!     Some(ElementId(43)),
//! )?;
//!
//! bus.unsubscribe(&event);
//! bus.shutdown();
//! ```

pub mod error;
pub mod event;
pub mod manager;
mod queue;
pub mod registry;
pub mod types;

// Re-exports
pub use error::{EventError, Result};
pub use event::Event;
pub use manager::{ElementProbe, EventManager, EventManagerConfig};
pub use registry::EventRegistry;
pub use types::{
    AccessLevel, CallbackSet, ConnectionId, ContextId, DeleteCallback, ElementId, EmitHandler,
    EventId, EventKind, EventStats, ExtendedCallback, LegacyCallback, UserData,
};
