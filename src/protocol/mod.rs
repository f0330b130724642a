//! # Listener Dispatch
//!
//! Packet containers and the priority-ordered listener chains that run against them.
//!
//! ## Components
//! - **Priority**: bands `Lowest..Monitor` and the cancellation policy
//! - **Listener**: handler trait, category filters, handles and statistics
//! - **Container**: the mutable packet handed to each listener
//! - **Dispatcher**: copy-on-write chains, failure isolation and auto-deregistration
//!
//! ## Dispatch order
//! ```text
//! Lowest -> Low -> Normal -> High -> Highest -> Monitor (read-only)
//!   registration order within each band
//! ```

pub mod container;
pub mod dispatcher;
pub mod listener;
pub mod priority;
