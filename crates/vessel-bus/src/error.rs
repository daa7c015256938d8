//! Error types for the message bus.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a request did not receive a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No consumer was registered at the target address.
    NoHandlers,
    /// No reply arrived before the delivery timeout elapsed.
    Timeout,
    /// The recipient explicitly failed the message.
    Recipient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHandlers => f.write_str("NO_HANDLERS"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::Recipient => f.write_str("RECIPIENT_FAILURE"),
        }
    }
}

/// A failed reply, as seen by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({code}): {message}")]
pub struct BusFailure {
    kind: FailureKind,
    code: i32,
    message: String,
}

impl BusFailure {
    /// A failure reported by the consumer with an application-defined code.
    pub fn recipient(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Recipient,
            code,
            message: message.into(),
        }
    }

    pub fn no_handlers(address: &str) -> Self {
        Self {
            kind: FailureKind::NoHandlers,
            code: -1,
            message: format!("no handlers for address {address}"),
        }
    }

    pub fn timeout(address: &str, after: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            code: -1,
            message: format!(
                "timed out after waiting {} ms for a reply on {address}",
                after.as_millis()
            ),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Application failure code; `-1` for transport-level failures.
    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised while managing bus subscriptions.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The consumer could not be registered.
    #[error("failed to subscribe to '{address}': {reason}")]
    SubscriptionFailed { address: String, reason: String },
}

/// Result type for subscription management.
pub type BusResult<T> = Result<T, BusError>;
