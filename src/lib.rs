//! # Packet Intercept
//!
//! Per-connection interception and dispatch of decoded protocol messages.
//!
//! The engine sits between a connection's transport and its application handler. Every
//! decoded message it recognizes is offered to an ordered chain of listeners that may
//! observe it, rewrite its fields, replace it or cancel it. The engine can also originate
//! synthetic messages that are ordered with genuine traffic on the same connection.
//!
//! ## Architecture
//! ```text
//! transport --> InterceptHook --> lane (per connection, per direction)
//!                                   |- classify (registry, negotiated version)
//!                                   |- dispatch (Lowest .. Highest, then Monitor)
//!                                   '- forward / drop
//! InjectionCoordinator --> pending queue --^
//! ```
//!
//! ## Modules
//! - [`core`]: schema registry, descriptors, structure modifier
//! - [`protocol`]: listeners, priorities, packet container, dispatcher
//! - [`transport`]: channel traits, connection contexts, pipeline injector
//! - [`service`]: synthetic sends and the [`ProtocolManager`] facade
//! - [`config`]: engine configuration (TOML, environment)
//! - [`utils`]: logging setup, metrics, failure reporting
//!
//! ## Example
//! ```rust
//! use packet_intercept::prelude::*;
//!
//! # fn main() -> packet_intercept::error::Result<()> {
//! let manager = ProtocolManager::new(EngineConfig::default())?;
//! manager.registry().register(
//!     MessageDescriptor::builder(Direction::Outbound, 42u32, 763u32, "SetCoins")
//!         .field("amount", FieldKind::I32)
//!         .build()?,
//! )?;
//!
//! manager.register_listener(
//!     Direction::Outbound,
//!     CategoryFilter::from(CategoryId(42)),
//!     ListenerPriority::Normal,
//!     |packet: &mut PacketContainer| -> packet_intercept::error::Result<()> {
//!         packet.write("amount", 0i32)
//!     },
//! );
//!
//! let (channel, mut endpoints) = MemoryChannel::new(ConnectionId(1));
//! manager.inject(channel.clone(), Some(SchemaVersion(763)))?;
//! channel.deliver(
//!     Direction::Outbound,
//!     RawMessage::new(42u32, vec![FieldValue::I32(50)]),
//! )?;
//!
//! let forwarded = endpoints.outbound.drain();
//! assert_eq!(forwarded[0].fields, vec![FieldValue::I32(0)]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::EngineConfig;
pub use crate::error::{InterceptError, Result};
pub use crate::service::manager::ProtocolManager;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{DispatcherConfig, EngineConfig, InjectorConfig, LoggingConfig};
    pub use crate::core::catalog::SchemaCatalog;
    pub use crate::core::descriptor::{FieldKind, MessageDescriptor};
    pub use crate::core::instance::MessageInstance;
    pub use crate::core::registry::MessageTypeRegistry;
    pub use crate::core::types::{CategoryId, ConnectionId, Direction, SchemaVersion};
    pub use crate::core::value::{CompositeType, FieldValue};
    pub use crate::error::{InterceptError, Result};
    pub use crate::protocol::container::PacketContainer;
    pub use crate::protocol::dispatcher::{DispatchReport, ListenerDispatcher};
    pub use crate::protocol::listener::{
        CategoryFilter, ListenerHandle, NamedListener, PacketListener,
    };
    pub use crate::protocol::priority::{CancellationPolicy, ListenerPriority};
    pub use crate::service::coordinator::InjectionCoordinator;
    pub use crate::service::manager::ProtocolManager;
    pub use crate::transport::channel::{Channel, InterceptHook, MessageOrigin, RawMessage};
    pub use crate::transport::injector::{DrainReport, PipelineInjector};
    pub use crate::transport::memory::MemoryChannel;
}
