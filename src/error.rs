//! # Error Types
//!
//! Error handling for the interception engine.
//!
//! This module defines every error variant that can surface from the registry, the
//! structure modifier, the dispatcher, the pipeline injector and the synthetic send path.
//!
//! ## Error Categories
//! - **Schema Errors**: unknown message types, conflicting or malformed descriptors
//! - **Field Errors**: wrong field kinds or paths used by a listener
//! - **Container Errors**: descriptor mismatches on replace, writes to read-only packets
//! - **Connection Errors**: synthetic sends to closed connections, connection limits
//! - **Listener Errors**: failures raised by listener code (isolated by the dispatcher)
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use packet_intercept::error::{InterceptError, Result};
//! use tracing::{error, info};
//!
//! fn checked_amount(amount: i32) -> Result<i32> {
//!     if amount < 0 {
//!         return Err(InterceptError::Listener(format!("negative amount {amount}")));
//!     }
//!     Ok(amount)
//! }
//!
//! fn main() {
//!     match checked_amount(-1) {
//!         Ok(amount) => info!(amount, "Amount accepted"),
//!         Err(e) => error!(error = %e, "Amount rejected"),
//!     }
//! }
//! ```

use crate::core::types::{CategoryId, Direction, SchemaVersion};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lane and connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_CONNECTION_UNKNOWN: &str = "Connection is not injected";
    pub const ERR_NO_SCHEMA_VERSION: &str = "Connection has no usable schema version";

    /// Container errors
    pub const ERR_READ_ONLY: &str = "Packet is read-only for monitor listeners";
    pub const ERR_DIRECTION_MISMATCH: &str = "Descriptor direction does not match send direction";
    pub const ERR_VERSION_MISMATCH: &str = "Descriptor version does not match negotiated version";
    pub const ERR_VALUES_MISMATCH: &str = "Field values do not conform to descriptor";

    /// Listener errors
    pub const ERR_LISTENER_PANICKED: &str = "Listener panicked";
}

/// InterceptError is the primary error type for all engine operations
#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Unknown message type {category} ({direction}) for schema version {version}")]
    UnknownType {
        direction: Direction,
        category: CategoryId,
        version: SchemaVersion,
    },

    #[error("Conflicting descriptor for {category} ({direction}) in schema version {version}")]
    ConflictingDescriptor {
        direction: Direction,
        category: CategoryId,
        version: SchemaVersion,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Field type mismatch at {path}: expected {expected}, found {found}")]
    FieldTypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Descriptor mismatch: expected {expected}, found {found}")]
    DescriptorMismatch { expected: String, found: String },

    #[error("{}", constants::ERR_READ_ONLY)]
    ReadOnlyPacket,

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Connection limit reached: {0}")]
    ConnectionLimit(usize),

    #[error("Synthetic send queue full: {0} pending")]
    QueueFull(usize),

    #[error("Synthetic send loop detected at depth {0}")]
    SyntheticLoop(u32),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl InterceptError {
    /// Shorthand for a [`InterceptError::DescriptorMismatch`] built from displayable parts
    pub fn descriptor_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        InterceptError::DescriptorMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Type alias for Results using InterceptError
pub type Result<T> = std::result::Result<T, InterceptError>;
