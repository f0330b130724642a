//! Facade tying the registry, dispatcher, injector and coordinator together.

use crate::config::EngineConfig;
use crate::core::catalog::SchemaCatalog;
use crate::core::descriptor::MessageDescriptor;
use crate::core::instance::MessageInstance;
use crate::core::registry::MessageTypeRegistry;
use crate::core::types::{CategoryId, ConnectionId, Direction, SchemaVersion};
use crate::core::value::FieldValue;
use crate::error::Result;
use crate::protocol::dispatcher::ListenerDispatcher;
use crate::protocol::listener::{CategoryFilter, ListenerHandle, PacketListener};
use crate::protocol::priority::ListenerPriority;
use crate::service::coordinator::InjectionCoordinator;
use crate::transport::channel::Channel;
use crate::transport::connection::ConnectionContext;
use crate::transport::injector::{DrainReport, PipelineInjector};
use crate::utils::metrics::Metrics;
use crate::utils::reporter::{ErrorReporter, TracingReporter};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One interception engine instance
pub struct ProtocolManager {
    config: EngineConfig,
    registry: Arc<MessageTypeRegistry>,
    dispatcher: Arc<ListenerDispatcher>,
    injector: Arc<PipelineInjector>,
    coordinator: InjectionCoordinator,
    metrics: Arc<Metrics>,
}

impl ProtocolManager {
    /// Engine reporting listener failures through `tracing`
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_reporter(config, Arc::new(TracingReporter))
    }

    #[instrument(skip(config, reporter))]
    pub fn with_reporter(config: EngineConfig, reporter: Arc<dyn ErrorReporter>) -> Result<Self> {
        config.validate_strict()?;

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(MessageTypeRegistry::new());
        let dispatcher = Arc::new(
            ListenerDispatcher::new(config.dispatcher.clone())
                .with_reporter(reporter)
                .with_metrics(Arc::clone(&metrics)),
        );
        let injector = Arc::new(
            PipelineInjector::new(
                Arc::clone(&registry),
                Arc::clone(&dispatcher),
                config.injector.clone(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let coordinator = InjectionCoordinator::new(Arc::clone(&injector));

        info!(
            policy = ?config.dispatcher.cancellation_policy,
            max_failures = config.dispatcher.max_consecutive_failures,
            "Interception engine ready"
        );
        Ok(Self {
            config,
            registry,
            dispatcher,
            injector,
            coordinator,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MessageTypeRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ListenerDispatcher> {
        &self.dispatcher
    }

    pub fn injector(&self) -> &Arc<PipelineInjector> {
        &self.injector
    }

    pub fn coordinator(&self) -> &InjectionCoordinator {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Publish a schema version
    pub fn load_catalog(&self, catalog: &SchemaCatalog) -> Result<usize> {
        self.registry.register_catalog(catalog)
    }

    pub fn register_listener<L>(
        &self,
        direction: Direction,
        filter: CategoryFilter,
        priority: ListenerPriority,
        listener: L,
    ) -> ListenerHandle
    where
        L: PacketListener + 'static,
    {
        self.dispatcher.register(direction, filter, priority, listener)
    }

    pub fn unregister_listener(&self, handle: ListenerHandle) -> bool {
        self.dispatcher.unregister(handle)
    }

    pub fn inject(
        &self,
        channel: Arc<dyn Channel>,
        version: Option<SchemaVersion>,
    ) -> Result<Arc<ConnectionContext>> {
        self.injector.inject(channel, version)
    }

    pub fn uninject(&self, connection: ConnectionId) -> Result<DrainReport> {
        self.injector.uninject(connection)
    }

    pub fn send(
        &self,
        connection: ConnectionId,
        direction: Direction,
        descriptor: &Arc<MessageDescriptor>,
        values: Vec<FieldValue>,
        bypass: bool,
    ) -> Result<()> {
        self.coordinator
            .send(connection, direction, descriptor, values, bypass)
    }

    pub fn send_instance(
        &self,
        connection: ConnectionId,
        direction: Direction,
        instance: MessageInstance,
        bypass: bool,
    ) -> Result<()> {
        self.coordinator
            .send_instance(connection, direction, instance, bypass)
    }

    pub fn broadcast(&self, direction: Direction, instance: &MessageInstance, bypass: bool) -> usize {
        self.coordinator.broadcast(direction, instance, bypass)
    }

    pub fn create_packet(
        &self,
        direction: Direction,
        category: CategoryId,
        version: SchemaVersion,
    ) -> Result<MessageInstance> {
        self.coordinator.create_packet(direction, category, version)
    }

    pub fn create_packet_for(
        &self,
        connection: ConnectionId,
        direction: Direction,
        category: CategoryId,
    ) -> Result<MessageInstance> {
        self.coordinator.create_packet_for(connection, direction, category)
    }

    /// Uninject every connection and log final metrics
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Vec<DrainReport> {
        let reports: Vec<DrainReport> = self
            .injector
            .contexts()
            .into_iter()
            .filter_map(|context| match self.injector.uninject(context.id()) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(connection = %context.id(), error = %e, "Uninject during shutdown failed");
                    None
                }
            })
            .collect();
        self.metrics.log_metrics();
        info!(connections = reports.len(), "Interception engine shut down");
        reports
    }
}
