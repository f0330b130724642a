//! Synthetic sends.
//!
//! A synthetic message enters its connection's lane through the pending queue, so it is
//! ordered with genuine traffic of the same direction. Without bypass it runs through the
//! same listener chain as a peer message (the container reports `is_synthetic()`); with
//! bypass it is forwarded directly. Either way it leaves the engine tagged as filtered and
//! is never dispatched again.

use crate::core::descriptor::MessageDescriptor;
use crate::core::instance::MessageInstance;
use crate::core::types::{CategoryId, ConnectionId, Direction, SchemaVersion};
use crate::core::value::FieldValue;
use crate::error::{constants, InterceptError, Result};
use crate::transport::connection::{ConnectionContext, PendingSend};
use crate::transport::injector::{current_synthetic_depth, PipelineInjector};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Entry point for engine-originated messages
pub struct InjectionCoordinator {
    injector: Arc<PipelineInjector>,
}

impl InjectionCoordinator {
    pub fn new(injector: Arc<PipelineInjector>) -> Self {
        Self { injector }
    }

    /// Build an instance from `values` and send it.
    ///
    /// Fails with `DescriptorMismatch` when the values do not conform to `descriptor`.
    #[instrument(skip(self, descriptor, values), fields(descriptor = %descriptor))]
    pub fn send(
        &self,
        connection: ConnectionId,
        direction: Direction,
        descriptor: &Arc<MessageDescriptor>,
        values: Vec<FieldValue>,
        bypass: bool,
    ) -> Result<()> {
        let instance = MessageInstance::from_values(Arc::clone(descriptor), values)?;
        self.send_instance(connection, direction, instance, bypass)
    }

    /// Send a pre-built instance.
    ///
    /// Fails with `NotConnected` for an unknown or closed connection, `DescriptorMismatch`
    /// when the descriptor's direction or version does not match the target or its layout
    /// differs from the registered one, `UnknownType` when no descriptor is registered under
    /// its key, and `SyntheticLoop` when nested synthetic sends exceed the configured depth.
    pub fn send_instance(
        &self,
        connection: ConnectionId,
        direction: Direction,
        instance: MessageInstance,
        bypass: bool,
    ) -> Result<()> {
        let context = self
            .injector
            .context(connection)
            .filter(|context| !context.is_closed())
            .ok_or_else(|| {
                InterceptError::NotConnected(format!(
                    "{connection}: {}",
                    constants::ERR_CONNECTION_UNKNOWN
                ))
            })?;
        check_target(&context, direction, instance.descriptor())?;
        self.check_registered(&instance)?;

        let depth = current_synthetic_depth() + 1;
        let limit = self.injector.config().max_synthetic_depth;
        if depth > limit {
            warn!(%connection, %direction, depth, limit, "Synthetic send loop detected");
            return Err(InterceptError::SyntheticLoop(depth));
        }

        debug!(%connection, %direction, bypass, depth, "Synthetic send");
        self.injector.submit(
            &context,
            direction,
            PendingSend {
                instance,
                bypass,
                depth,
            },
        )
    }

    /// Send a copy of `instance` to every live connection negotiated on its version.
    ///
    /// Returns how many connections accepted the message; per-connection failures are
    /// logged and skipped.
    pub fn broadcast(&self, direction: Direction, instance: &MessageInstance, bypass: bool) -> usize {
        let version = instance.descriptor().version();
        let mut sent = 0;
        for context in self.injector.contexts() {
            if context.is_closed() || context.schema_version() != Some(version) {
                continue;
            }
            match self.send_instance(context.id(), direction, instance.deep_clone(), bypass) {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(connection = %context.id(), error = %e, "Broadcast send failed")
                }
            }
        }
        debug!(%direction, sent, "Broadcast complete");
        sent
    }

    /// Default-valued instance of a registered message type
    pub fn create_packet(
        &self,
        direction: Direction,
        category: CategoryId,
        version: SchemaVersion,
    ) -> Result<MessageInstance> {
        let descriptor = self.injector.registry().resolve(direction, category, version)?;
        Ok(MessageInstance::new(descriptor))
    }

    /// Default-valued instance for the version a connection negotiated
    pub fn create_packet_for(
        &self,
        connection: ConnectionId,
        direction: Direction,
        category: CategoryId,
    ) -> Result<MessageInstance> {
        let context = self.injector.context(connection).ok_or_else(|| {
            InterceptError::NotConnected(format!("{connection}: {}", constants::ERR_CONNECTION_UNKNOWN))
        })?;
        let version = context.schema_version().ok_or_else(|| {
            InterceptError::NotConnected(format!("{connection}: {}", constants::ERR_NO_SCHEMA_VERSION))
        })?;
        self.create_packet(direction, category, version)
    }

    /// The instance must carry the registered descriptor for its key
    fn check_registered(&self, instance: &MessageInstance) -> Result<()> {
        let descriptor = instance.descriptor();
        let registered = self.injector.registry().resolve(
            descriptor.direction(),
            descriptor.category(),
            descriptor.version(),
        )?;
        if !instance.same_descriptor(&registered) {
            return Err(InterceptError::descriptor_mismatch(
                registered.as_ref(),
                descriptor.as_ref(),
            ));
        }
        Ok(())
    }
}

fn check_target(
    context: &ConnectionContext,
    direction: Direction,
    descriptor: &MessageDescriptor,
) -> Result<()> {
    if descriptor.direction() != direction {
        return Err(InterceptError::descriptor_mismatch(
            format!("{} ({direction})", constants::ERR_DIRECTION_MISMATCH),
            descriptor,
        ));
    }
    if let Some(version) = context.schema_version() {
        if descriptor.version() != version {
            return Err(InterceptError::descriptor_mismatch(
                format!("{} ({version})", constants::ERR_VERSION_MISMATCH),
                descriptor,
            ));
        }
    }
    Ok(())
}
