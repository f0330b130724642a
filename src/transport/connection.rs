//! Per-connection state.
//!
//! Each connection owns two lanes, one per direction. A lane hands out FIFO tickets so
//! dispatch and forward of messages in the same direction happen strictly in arrival
//! order while the two directions (and other connections) proceed independently.

use crate::core::instance::MessageInstance;
use crate::core::types::{ConnectionId, Direction, SchemaVersion};
use crate::error::{InterceptError, Result};
use crate::transport::channel::Channel;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LaneState {
    next_ticket: u64,
    serving: u64,
}

/// FIFO ticket lock serializing one (connection, direction)
#[derive(Debug, Default)]
pub(crate) struct Lane {
    state: Mutex<LaneState>,
    turn: Condvar,
}

impl Lane {
    /// Wait for this caller's turn
    pub(crate) fn enter(&self) -> LaneGuard<'_> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket {
            self.turn.wait(&mut state);
        }
        LaneGuard { lane: self }
    }

    /// Take the lane only if nobody holds it or waits for it
    pub(crate) fn try_enter(&self) -> Option<LaneGuard<'_>> {
        let mut state = self.state.lock();
        if state.next_ticket == state.serving {
            state.next_ticket += 1;
            Some(LaneGuard { lane: self })
        } else {
            None
        }
    }
}

pub(crate) struct LaneGuard<'a> {
    lane: &'a Lane,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lane.state.lock();
        state.serving += 1;
        self.lane.turn.notify_all();
    }
}

/// Count of hook invocations currently running for a connection
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

pub(crate) struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.in_flight.count.lock();
        *count -= 1;
        self.in_flight.idle.notify_all();
    }
}

/// A synthetic send waiting for its lane
#[derive(Debug)]
pub(crate) struct PendingSend {
    pub(crate) instance: MessageInstance,
    pub(crate) bypass: bool,
    pub(crate) depth: u32,
}

struct PendingQueue {
    sender: Sender<PendingSend>,
    receiver: Receiver<PendingSend>,
}

impl PendingQueue {
    fn new(limit: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(limit);
        Self { sender, receiver }
    }
}

/// State of one injected connection
pub struct ConnectionContext {
    id: ConnectionId,
    channel: Arc<dyn Channel>,
    version: RwLock<Option<SchemaVersion>>,
    interception: [AtomicBool; 2],
    lanes: [Lane; 2],
    pending: [PendingQueue; 2],
    in_flight: InFlight,
    closed: AtomicBool,
}

impl ConnectionContext {
    pub(crate) fn new(
        channel: Arc<dyn Channel>,
        version: Option<SchemaVersion>,
        queue_limit: usize,
    ) -> Self {
        Self {
            id: channel.id(),
            channel,
            version: RwLock::new(version),
            interception: [AtomicBool::new(true), AtomicBool::new(true)],
            lanes: [Lane::default(), Lane::default()],
            pending: [PendingQueue::new(queue_limit), PendingQueue::new(queue_limit)],
            in_flight: InFlight::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Negotiated schema version, `None` while unknown
    pub fn schema_version(&self) -> Option<SchemaVersion> {
        *self.version.read()
    }

    pub(crate) fn set_schema_version(&self, version: Option<SchemaVersion>) {
        *self.version.write() = version;
    }

    pub fn is_intercepting(&self, direction: Direction) -> bool {
        self.interception[direction.index()].load(Ordering::Acquire)
    }

    pub(crate) fn set_intercepting(&self, direction: Direction, enabled: bool) {
        self.interception[direction.index()].store(enabled, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn lane(&self, direction: Direction) -> &Lane {
        &self.lanes[direction.index()]
    }

    /// Queue a synthetic send for the lane holder to drain
    pub(crate) fn enqueue(&self, direction: Direction, send: PendingSend) -> Result<()> {
        let queue = &self.pending[direction.index()];
        queue.sender.try_send(send).map_err(|e| match e {
            TrySendError::Full(_) => InterceptError::QueueFull(queue.sender.len()),
            TrySendError::Disconnected(_) => InterceptError::NotConnected(self.id.to_string()),
        })
    }

    pub(crate) fn next_pending(&self, direction: Direction) -> Option<PendingSend> {
        self.pending[direction.index()].receiver.try_recv().ok()
    }

    pub(crate) fn has_pending(&self, direction: Direction) -> bool {
        !self.pending[direction.index()].receiver.is_empty()
    }

    /// Number of queued synthetic sends in `direction`
    pub fn pending_len(&self, direction: Direction) -> usize {
        self.pending[direction.index()].receiver.len()
    }

    /// Drop every queued synthetic send; returns how many were discarded
    pub(crate) fn discard_pending(&self) -> usize {
        self.pending
            .iter()
            .map(|queue| queue.receiver.try_iter().count())
            .sum()
    }

    pub(crate) fn begin_pass(&self) -> InFlightGuard<'_> {
        *self.in_flight.count.lock() += 1;
        InFlightGuard {
            in_flight: &self.in_flight,
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Wait until at most `floor` passes are running or `timeout` elapses; returns the
    /// passes above `floor` still running
    pub(crate) fn wait_idle(&self, timeout: Duration, floor: usize) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > floor {
            if self
                .in_flight
                .idle
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                break;
            }
        }
        count.saturating_sub(floor)
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.id)
            .field("version", &self.schema_version())
            .field("inbound", &self.is_intercepting(Direction::Inbound))
            .field("outbound", &self.is_intercepting(Direction::Outbound))
            .field("closed", &self.is_closed())
            .finish()
    }
}
