//! Error types for the notification bus.

use crate::types::{ContextId, ElementId};
use thiserror::Error;

/// Main error type for bus operations.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Unknown graph element: {0}")]
    InvalidElement(ElementId),

    #[error("Context {0} does not hold the event lock")]
    NotOwner(ContextId),

    #[error("Event processing already stopped")]
    AlreadyStopped,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Callback failed: {0}")]
    Callback(String),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, EventError>;
