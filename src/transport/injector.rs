//! # Pipeline Injection
//!
//! Attaches interception hooks to connections and routes their traffic through the
//! listener dispatcher.
//!
//! ## Message flow
//! ```text
//! transport -> hook -> lane(conn, dir) -> classify -> dispatch -> forward | drop
//!                                     \-> drain queued synthetic sends
//! ```
//!
//! Classification fails open: an unknown category, a connection without a usable schema
//! version, or fields that do not conform to the descriptor are forwarded untouched
//! without building a container.

use crate::config::InjectorConfig;
use crate::core::instance::MessageInstance;
use crate::core::registry::MessageTypeRegistry;
use crate::core::types::{ConnectionId, Direction, SchemaVersion};
use crate::error::{constants, InterceptError, Result};
use crate::protocol::container::PacketContainer;
use crate::protocol::dispatcher::ListenerDispatcher;
use crate::transport::channel::{Channel, InterceptHook, MessageOrigin, RawMessage};
use crate::transport::connection::{ConnectionContext, InFlightGuard, PendingSend};
use crate::utils::metrics::{Metrics, Timer};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, instrument, trace, warn};

thread_local! {
    /// Depth of the synthetic message being dispatched on this thread, 0 outside
    static SYNTHETIC_DEPTH: Cell<u32> = const { Cell::new(0) };
    /// Connections with a pass running on this thread
    static ACTIVE_PASSES: RefCell<Vec<ConnectionId>> = const { RefCell::new(Vec::new()) };
}

/// Synthetic depth of the pass currently running on this thread
pub(crate) fn current_synthetic_depth() -> u32 {
    SYNTHETIC_DEPTH.with(Cell::get)
}

struct DepthScope {
    previous: u32,
}

impl DepthScope {
    fn enter(depth: u32) -> Self {
        Self {
            previous: SYNTHETIC_DEPTH.with(|d| d.replace(depth)),
        }
    }
}

impl Drop for DepthScope {
    fn drop(&mut self) {
        SYNTHETIC_DEPTH.with(|d| d.set(self.previous));
    }
}

/// In-flight accounting for one pass, visible to `uninject` on the same thread
struct PassScope<'a> {
    _in_flight: InFlightGuard<'a>,
}

impl<'a> PassScope<'a> {
    fn enter(context: &'a ConnectionContext) -> Self {
        ACTIVE_PASSES.with(|active| active.borrow_mut().push(context.id()));
        Self {
            _in_flight: context.begin_pass(),
        }
    }
}

impl Drop for PassScope<'_> {
    fn drop(&mut self) {
        ACTIVE_PASSES.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

fn passes_on_this_thread(id: ConnectionId) -> usize {
    ACTIVE_PASSES.with(|active| active.borrow().iter().filter(|c| **c == id).count())
}

/// Result of tearing down a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub connection: ConnectionId,
    /// Queued synthetic sends dropped without being processed
    pub discarded_synthetic: usize,
    /// Passes still running when the drain timeout expired
    pub abandoned_in_flight: usize,
    /// Whether every in-flight pass finished within the timeout
    pub completed: bool,
}

/// Hook installed per connection and direction
struct InjectorHook {
    injector: Weak<PipelineInjector>,
    context: Weak<ConnectionContext>,
    direction: Direction,
}

impl InterceptHook for InjectorHook {
    fn intercept(&self, channel: &dyn Channel, message: RawMessage) -> Result<()> {
        match (self.injector.upgrade(), self.context.upgrade()) {
            (Some(injector), Some(context)) => injector.handle(&context, self.direction, message),
            _ => channel.forward(self.direction, message),
        }
    }
}

/// Owner of every injected connection
pub struct PipelineInjector {
    registry: Arc<MessageTypeRegistry>,
    dispatcher: Arc<ListenerDispatcher>,
    connections: DashMap<ConnectionId, Arc<ConnectionContext>>,
    /// Table entries counted against `max_connections`
    slots: AtomicUsize,
    config: InjectorConfig,
    metrics: Arc<Metrics>,
}

impl PipelineInjector {
    pub fn new(
        registry: Arc<MessageTypeRegistry>,
        dispatcher: Arc<ListenerDispatcher>,
        config: InjectorConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            connections: DashMap::new(),
            slots: AtomicUsize::new(0),
            config,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MessageTypeRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Attach inbound and outbound hooks to `channel`.
    ///
    /// Injecting an already injected connection returns its existing context. A version
    /// the registry does not know leaves the connection in passthrough.
    #[instrument(skip(self, channel), fields(connection = %channel.id()))]
    pub fn inject(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        version: Option<SchemaVersion>,
    ) -> Result<Arc<ConnectionContext>> {
        let id = channel.id();
        if !channel.is_open() {
            return Err(InterceptError::NotConnected(format!(
                "{id}: {}",
                constants::ERR_CONNECTION_CLOSED
            )));
        }

        let context = match self.connections.entry(id) {
            Entry::Occupied(existing) => {
                debug!(connection = %id, "Connection already injected");
                return Ok(Arc::clone(existing.get()));
            }
            Entry::Vacant(entry) => {
                if !self.reserve_slot() {
                    return Err(InterceptError::ConnectionLimit(self.config.max_connections));
                }
                let version = version.and_then(|v| self.usable_version(id, v));
                let context = Arc::new(ConnectionContext::new(
                    Arc::clone(&channel),
                    version,
                    self.config.synthetic_queue_limit,
                ));
                entry.insert(Arc::clone(&context));
                self.metrics.connection_injected();
                context
            }
        };

        // Hooks are attached with the table unlocked; the transport may call back in
        if let Err(e) = self.attach_hooks(&channel, &context) {
            self.abort_inject(&channel, &context);
            return Err(e);
        }
        if context.is_closed() {
            // Uninjected while the hooks were being attached
            for direction in Direction::ALL {
                channel.detach(direction);
            }
            return Err(InterceptError::NotConnected(format!(
                "{id}: {}",
                constants::ERR_CONNECTION_CLOSED
            )));
        }

        info!(connection = %id, version = ?context.schema_version(), "Connection injected");
        Ok(context)
    }

    fn attach_hooks(
        self: &Arc<Self>,
        channel: &Arc<dyn Channel>,
        context: &Arc<ConnectionContext>,
    ) -> Result<()> {
        for direction in Direction::ALL {
            let hook = Arc::new(InjectorHook {
                injector: Arc::downgrade(self),
                context: Arc::downgrade(context),
                direction,
            });
            if let Err(e) = channel.attach(direction, hook) {
                error!(connection = %context.id(), %direction, error = %e, "Failed to attach hook");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo a half-finished inject: no hook and no table entry survive
    fn abort_inject(&self, channel: &Arc<dyn Channel>, context: &Arc<ConnectionContext>) {
        context.close();
        for direction in Direction::ALL {
            channel.detach(direction);
        }
        if self
            .connections
            .remove_if(&context.id(), |_, current| Arc::ptr_eq(current, context))
            .is_some()
        {
            self.release_slot();
            self.metrics.connection_removed();
        }
    }

    /// Claim one of the `max_connections` slots
    fn reserve_slot(&self) -> bool {
        let limit = self.config.max_connections;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < limit).then_some(used + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }

    fn usable_version(&self, id: ConnectionId, version: SchemaVersion) -> Option<SchemaVersion> {
        if self.registry.knows_version(version) {
            Some(version)
        } else {
            warn!(connection = %id, %version, "{}", constants::ERR_NO_SCHEMA_VERSION);
            None
        }
    }

    /// Detach a connection and drain it.
    ///
    /// Queued synthetic sends are discarded. Running passes are waited for up to the
    /// configured drain timeout and abandoned afterwards; they are never interrupted.
    #[instrument(skip(self))]
    pub fn uninject(&self, id: ConnectionId) -> Result<DrainReport> {
        let (_, context) = self.connections.remove(&id).ok_or_else(|| {
            InterceptError::NotConnected(format!("{id}: {}", constants::ERR_CONNECTION_UNKNOWN))
        })?;
        self.release_slot();

        context.close();
        for direction in Direction::ALL {
            context.channel().detach(direction);
        }

        let discarded = context.discard_pending();
        self.metrics.synthetic_discarded(discarded as u64);

        let own = passes_on_this_thread(id);
        let running = context.wait_idle(self.config.drain_timeout, own);
        if running > 0 {
            warn!(
                connection = %id,
                running,
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Drain timeout expired, abandoning in-flight passes"
            );
            self.metrics.dispatches_abandoned(running as u64);
        }

        self.metrics.connection_removed();
        info!(connection = %id, discarded, abandoned = running, "Connection uninjected");
        Ok(DrainReport {
            connection: id,
            discarded_synthetic: discarded,
            abandoned_in_flight: running,
            completed: running == 0,
        })
    }

    pub fn context(&self, id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, id: ConnectionId) -> Result<Arc<ConnectionContext>> {
        self.context(id).ok_or_else(|| {
            InterceptError::NotConnected(format!("{id}: {}", constants::ERR_CONNECTION_UNKNOWN))
        })
    }

    /// Every injected connection
    pub fn contexts(&self) -> Vec<Arc<ConnectionContext>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Renegotiate the schema version of a connection
    pub fn set_schema_version(&self, id: ConnectionId, version: SchemaVersion) -> Result<()> {
        let context = self.require(id)?;
        let usable = self.usable_version(id, version);
        context.set_schema_version(usable);
        debug!(connection = %id, version = ?usable, "Schema version set");
        Ok(())
    }

    /// Turn interception of one direction on or off; off means passthrough
    pub fn set_interception(&self, id: ConnectionId, direction: Direction, enabled: bool) -> Result<()> {
        let context = self.require(id)?;
        context.set_intercepting(direction, enabled);
        debug!(connection = %id, %direction, enabled, "Interception toggled");
        Ok(())
    }

    /// Entry point of the hooks: one message, in lane order
    fn handle(&self, context: &ConnectionContext, direction: Direction, message: RawMessage) -> Result<()> {
        if context.is_closed() {
            return self.pass_through(context, direction, message);
        }

        let result = {
            let _lane = context.lane(direction).enter();
            // Only lane holders count as in flight; a waiter that gets the lane after
            // `uninject` closed the connection passes its message through
            let _pass = PassScope::enter(context);
            if context.is_closed() {
                return self.pass_through(context, direction, message);
            }
            let result = self.process(context, direction, message);
            self.drain_pending(context, direction);
            result
        };
        self.pump(context, direction);
        result
    }

    /// Queue a synthetic send and process it right away if its lane is idle
    pub(crate) fn submit(
        &self,
        context: &ConnectionContext,
        direction: Direction,
        send: PendingSend,
    ) -> Result<()> {
        if context.is_closed() {
            return Err(InterceptError::NotConnected(format!(
                "{}: {}",
                context.id(),
                constants::ERR_CONNECTION_CLOSED
            )));
        }
        let bypass = send.bypass;
        context.enqueue(direction, send)?;
        self.metrics.synthetic_queued(bypass);
        self.pump(context, direction);
        Ok(())
    }

    /// Drain queued synthetic sends whenever the lane is free. A busy lane is drained by
    /// its holder before release.
    fn pump(&self, context: &ConnectionContext, direction: Direction) {
        while context.has_pending(direction) && !context.is_closed() {
            let Some(_lane) = context.lane(direction).try_enter() else {
                break;
            };
            let _pass = PassScope::enter(context);
            self.drain_pending(context, direction);
        }
    }

    fn drain_pending(&self, context: &ConnectionContext, direction: Direction) {
        while !context.is_closed() {
            let Some(send) = context.next_pending(direction) else {
                break;
            };
            if let Err(e) = self.process_synthetic(context, direction, send) {
                error!(connection = %context.id(), %direction, error = %e, "Synthetic send failed");
            }
        }
    }

    fn process(&self, context: &ConnectionContext, direction: Direction, message: RawMessage) -> Result<()> {
        if message.origin.is_filtered() || !context.is_intercepting(direction) {
            return self.pass_through(context, direction, message);
        }
        let Some(version) = context.schema_version() else {
            return self.pass_through(context, direction, message);
        };
        let descriptor = match self.registry.resolve(direction, message.category, version) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                trace!(connection = %context.id(), error = %e, "Unclassified message");
                return self.pass_through(context, direction, message);
            }
        };
        if let Err(e) = descriptor.validate(&message.fields) {
            debug!(
                connection = %context.id(),
                descriptor = %descriptor,
                error = %e,
                "Payload does not match descriptor, passing through"
            );
            return self.pass_through(context, direction, message);
        }

        let synthetic = message.origin.is_synthetic();
        let instance = MessageInstance::from_validated(descriptor, message.fields);
        self.dispatch_and_forward(context, direction, instance, synthetic)
    }

    fn process_synthetic(
        &self,
        context: &ConnectionContext,
        direction: Direction,
        send: PendingSend,
    ) -> Result<()> {
        if send.bypass || !context.is_intercepting(direction) {
            let message = RawMessage {
                category: send.instance.descriptor().category(),
                fields: send.instance.into_fields(),
                origin: MessageOrigin::Synthetic { filtered: true },
            };
            return self.forward(context, direction, message);
        }
        let _depth = DepthScope::enter(send.depth);
        self.dispatch_and_forward(context, direction, send.instance, true)
    }

    fn dispatch_and_forward(
        &self,
        context: &ConnectionContext,
        direction: Direction,
        instance: MessageInstance,
        synthetic: bool,
    ) -> Result<()> {
        let _timer = Timer::start("dispatch");
        let mut container = PacketContainer::new(context.id(), direction, instance).synthetic(synthetic);
        self.metrics.packet_intercepted();

        let report = self.dispatcher.dispatch(&mut container);
        if report.cancelled {
            self.metrics.packet_cancelled();
            trace!(
                connection = %context.id(),
                %direction,
                category = %container.packet_type(),
                "Packet cancelled"
            );
            return Ok(());
        }

        let category = container.packet_type();
        let origin = if synthetic {
            MessageOrigin::Synthetic { filtered: true }
        } else {
            MessageOrigin::Peer
        };
        let message = RawMessage {
            category,
            fields: container.into_instance().into_fields(),
            origin,
        };
        self.forward(context, direction, message)
    }

    fn pass_through(&self, context: &ConnectionContext, direction: Direction, message: RawMessage) -> Result<()> {
        self.metrics.packet_passthrough();
        self.forward(context, direction, message)
    }

    fn forward(&self, context: &ConnectionContext, direction: Direction, message: RawMessage) -> Result<()> {
        context.channel().forward(direction, message)?;
        self.metrics.packet_forwarded();
        Ok(())
    }
}

impl Drop for PipelineInjector {
    fn drop(&mut self) {
        for entry in self.connections.iter() {
            for direction in Direction::ALL {
                entry.value().channel().detach(direction);
            }
        }
    }
}
