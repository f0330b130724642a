//! Transport boundary.
//!
//! The engine never touches wire bytes. A transport decodes frames into [`RawMessage`]s,
//! hands them to the hook attached for that direction, and re-encodes whatever the hook
//! forwards. [`Channel`] is the capability a transport exposes per connection.

use crate::core::types::{CategoryId, ConnectionId, Direction};
use crate::core::value::FieldValue;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Produced by the real peer (inbound) or the host (outbound)
    #[default]
    Peer,
    /// Injected by the engine. `filtered` messages already went through interception
    /// (or bypassed it) and are never dispatched again.
    Synthetic { filtered: bool },
}

impl MessageOrigin {
    pub fn is_synthetic(self) -> bool {
        matches!(self, MessageOrigin::Synthetic { .. })
    }

    pub fn is_filtered(self) -> bool {
        matches!(self, MessageOrigin::Synthetic { filtered: true })
    }
}

/// A decoded message as the transport sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub category: CategoryId,
    pub fields: Vec<FieldValue>,
    #[serde(default)]
    pub origin: MessageOrigin,
}

impl RawMessage {
    pub fn new(category: impl Into<CategoryId>, fields: Vec<FieldValue>) -> Self {
        Self {
            category: category.into(),
            fields,
            origin: MessageOrigin::Peer,
        }
    }

    pub fn with_origin(mut self, origin: MessageOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Per-direction interception point installed into a channel
pub trait InterceptHook: Send + Sync {
    /// Called by the transport for every message of the hook's direction. The hook is
    /// responsible for passing the message on through `channel.forward` (or dropping it).
    fn intercept(&self, channel: &dyn Channel, message: RawMessage) -> Result<()>;
}

/// Capability interface of one transport connection
pub trait Channel: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Install `hook` as the first stage of `direction`; replaces any previous hook
    fn attach(&self, direction: Direction, hook: Arc<dyn InterceptHook>) -> Result<()>;

    /// Remove the hook of `direction`, returning it if one was attached
    fn detach(&self, direction: Direction) -> Option<Arc<dyn InterceptHook>>;

    /// Hand a message to the stage after interception
    fn forward(&self, direction: Direction, message: RawMessage) -> Result<()>;

    fn is_open(&self) -> bool {
        true
    }
}
