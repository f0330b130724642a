//! In-memory channel for embedding the engine without a network transport.
//!
//! [`MemoryChannel::deliver`] plays the transport's role: it hands a decoded message to
//! the attached hook (or straight through when none is attached). Whatever passes
//! interception lands on a tokio mpsc queue per direction.

use crate::core::types::{ConnectionId, Direction};
use crate::error::{constants, InterceptError, Result};
use crate::transport::channel::{Channel, InterceptHook, RawMessage};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

/// Receiving end of one direction of a [`MemoryChannel`]
#[derive(Debug)]
pub struct MemoryReceiver {
    receiver: mpsc::UnboundedReceiver<RawMessage>,
}

impl MemoryReceiver {
    /// Next forwarded message, waiting for one
    pub async fn recv(&mut self) -> Option<RawMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RawMessage> {
        self.receiver.try_recv().ok()
    }

    /// Everything forwarded so far
    pub fn drain(&mut self) -> Vec<RawMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<RawMessage> {
        UnboundedReceiverStream::new(self.receiver)
    }
}

/// Forwarded output of both directions
#[derive(Debug)]
pub struct MemoryEndpoints {
    /// Messages that reached the host
    pub inbound: MemoryReceiver,
    /// Messages that reached the peer
    pub outbound: MemoryReceiver,
}

pub struct MemoryChannel {
    id: ConnectionId,
    hooks: [RwLock<Option<Arc<dyn InterceptHook>>>; 2],
    outputs: [mpsc::UnboundedSender<RawMessage>; 2],
    open: AtomicBool,
}

impl MemoryChannel {
    pub fn new(id: ConnectionId) -> (Arc<Self>, MemoryEndpoints) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id,
            hooks: [RwLock::new(None), RwLock::new(None)],
            outputs: [inbound_tx, outbound_tx],
            open: AtomicBool::new(true),
        });
        let endpoints = MemoryEndpoints {
            inbound: MemoryReceiver {
                receiver: inbound_rx,
            },
            outbound: MemoryReceiver {
                receiver: outbound_rx,
            },
        };
        (channel, endpoints)
    }

    /// Feed a message into `direction` as the transport would
    pub fn deliver(&self, direction: Direction, message: RawMessage) -> Result<()> {
        if !self.is_open() {
            return Err(InterceptError::NotConnected(format!(
                "{}: {}",
                self.id,
                constants::ERR_CONNECTION_CLOSED
            )));
        }
        let hook = self.hooks[direction.index()].read().clone();
        match hook {
            Some(hook) => hook.intercept(self, message),
            None => self.forward(direction, message),
        }
    }

    pub fn has_hook(&self, direction: Direction) -> bool {
        self.hooks[direction.index()].read().is_some()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn attach(&self, direction: Direction, hook: Arc<dyn InterceptHook>) -> Result<()> {
        *self.hooks[direction.index()].write() = Some(hook);
        Ok(())
    }

    fn detach(&self, direction: Direction) -> Option<Arc<dyn InterceptHook>> {
        self.hooks[direction.index()].write().take()
    }

    fn forward(&self, direction: Direction, message: RawMessage) -> Result<()> {
        trace!(connection = %self.id, %direction, category = %message.category, "Forwarding");
        self.outputs[direction.index()]
            .send(message)
            .map_err(|_| InterceptError::NotConnected(self.id.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("inbound_hook", &self.has_hook(Direction::Inbound))
            .field("outbound_hook", &self.has_hook(Direction::Outbound))
            .field("open", &self.is_open())
            .finish()
    }
}
