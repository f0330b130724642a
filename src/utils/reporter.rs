//! Error reporting hook for listener failures.
//!
//! The dispatcher never lets a listener error escape a dispatch pass. Every failure is
//! turned into a [`ListenerFailure`] record and handed to an [`ErrorReporter`], which is
//! the seam where a host plugs in its own observability.

use crate::core::types::{CategoryId, ConnectionId, Direction};
use crate::protocol::listener::ListenerHandle;
use tracing::{error, warn};

/// One failed listener invocation
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    pub handle: ListenerHandle,
    pub listener: String,
    pub connection: ConnectionId,
    pub direction: Direction,
    pub category: CategoryId,
    pub error: String,
    /// Failures in a row including this one
    pub consecutive: u32,
    /// Whether this failure caused the listener to be deregistered
    pub removed: bool,
}

/// Receiver of listener failure reports
pub trait ErrorReporter: Send + Sync {
    fn report(&self, failure: &ListenerFailure);
}

/// Default reporter: structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, failure: &ListenerFailure) {
        if failure.removed {
            error!(
                listener = %failure.listener,
                handle = %failure.handle,
                connection = %failure.connection,
                direction = %failure.direction,
                category = %failure.category,
                consecutive = failure.consecutive,
                error = %failure.error,
                "Listener deregistered after repeated failures"
            );
        } else {
            warn!(
                listener = %failure.listener,
                handle = %failure.handle,
                connection = %failure.connection,
                direction = %failure.direction,
                category = %failure.category,
                consecutive = failure.consecutive,
                error = %failure.error,
                "Listener failed"
            );
        }
    }
}
