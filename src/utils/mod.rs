//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and failure reporting.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by `LoggingConfig`
//! - **Metrics**: Thread-safe observability counters
//! - **Reporter**: Sink for isolated listener failures

pub mod logging;
pub mod metrics;
pub mod reporter;

pub use metrics::{Metrics, MetricsSnapshot, Timer};
pub use reporter::{ErrorReporter, ListenerFailure, TracingReporter};
