//! Error types for the Vessel resolution engine.
//!
//! Resolution failures never surface synchronously: they are delivered through
//! the failure channel of an [`AsyncHandle`](crate::AsyncHandle) as a [`Cause`].
//! Callers recover the concrete type with `cause.downcast_ref::<ResolveError>()`.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::QualifierSet;

/// Boxed error returned by user tasks, factories and observers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Shared failure cause stored inside a completed handle.
///
/// A handle may be observed by many continuations, so the cause is
/// reference-counted rather than boxed.
pub type Cause = Arc<dyn Error + Send + Sync>;

/// Wraps any error into a [`Cause`].
pub fn cause<E>(error: E) -> Cause
where
    E: Error + Send + Sync + 'static,
{
    Arc::new(error)
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Where an ambiguity was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Several asynchronous producers matched.
    Producer,
    /// Several container candidates matched.
    Container,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => f.write_str("async producers"),
            Self::Container => f.write_str("components"),
        }
    }
}

// =============================================================================
// Resolution Errors
// =============================================================================

/// Errors produced while resolving a component asynchronously.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No candidate matched the required type and qualifiers.
    #[error("unsatisfied dependency: no component of type {required} with qualifiers {qualifiers}")]
    Unsatisfied {
        /// Name of the required type.
        required: &'static str,
        /// Requested qualifiers.
        qualifiers: QualifierSet,
    },

    /// More than one equally-qualified candidate matched.
    #[error("ambiguous {origin} for type {required} with qualifiers {qualifiers}: {candidates} candidates")]
    Ambiguous {
        /// Name of the required type.
        required: &'static str,
        /// Requested qualifiers.
        qualifiers: QualifierSet,
        /// Number of matching candidates.
        candidates: usize,
        /// Whether producers or container candidates were ambiguous.
        origin: Origin,
    },

    /// A matching candidate produced an instance that cannot be viewed as the
    /// required type.
    #[error("component '{component}' cannot be viewed as {required}")]
    NotAssignable {
        /// Name of the required type.
        required: &'static str,
        /// Name of the offending component or producer.
        component: String,
    },
}

impl ResolveError {
    /// Returns `true` for [`ResolveError::Unsatisfied`].
    pub fn is_unsatisfied(&self) -> bool {
        matches!(self, Self::Unsatisfied { .. })
    }

    /// Returns `true` for [`ResolveError::Ambiguous`].
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

// =============================================================================
// Task Errors
// =============================================================================

/// Errors raised by the executor itself rather than by a task body.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task panicked; the payload message is preserved.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped before it produced an outcome (e.g. the event loop
    /// shut down).
    #[error("task was cancelled before completion")]
    Cancelled,
}
