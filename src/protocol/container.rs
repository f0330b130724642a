//! The unit handed to listeners during one dispatch pass.

use crate::core::descriptor::MessageDescriptor;
use crate::core::instance::MessageInstance;
use crate::core::modifier::{FieldPath, StructureModifier, TypedModifier};
use crate::core::serialization::PacketSnapshot;
use crate::core::types::{CategoryId, ConnectionId, Direction};
use crate::core::value::{FieldType, FieldValue};
use crate::error::{InterceptError, Result};
use std::sync::Arc;

/// A classified message in flight.
///
/// The container exclusively owns its instance for the duration of a pass. Every mutation
/// is immediately visible to the listeners that run after the one that made it. While a
/// monitor listener runs the container is read-only and every mutation fails with
/// [`InterceptError::ReadOnlyPacket`].
#[derive(Debug)]
pub struct PacketContainer {
    connection: ConnectionId,
    direction: Direction,
    instance: MessageInstance,
    modifier: StructureModifier,
    cancelled: bool,
    synthetic: bool,
    read_only: bool,
}

impl PacketContainer {
    pub fn new(connection: ConnectionId, direction: Direction, instance: MessageInstance) -> Self {
        let modifier = StructureModifier::of(&instance);
        Self {
            connection,
            direction,
            instance,
            modifier,
            cancelled: false,
            synthetic: false,
            read_only: false,
        }
    }

    /// Mark the container as carrying an engine-originated message
    pub fn synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Category id of the packet
    pub fn packet_type(&self) -> CategoryId {
        self.instance.descriptor().category()
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        self.instance.descriptor()
    }

    pub fn instance(&self) -> &MessageInstance {
        &self.instance
    }

    /// Field accessor bound to this packet's descriptor
    pub fn modifier(&self) -> &StructureModifier {
        &self.modifier
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            Err(InterceptError::ReadOnlyPacket)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancel the packet; calling it again has no further effect
    pub fn cancel(&mut self) -> Result<()> {
        self.set_cancelled(true)
    }

    pub fn set_cancelled(&mut self, cancelled: bool) -> Result<()> {
        self.ensure_writable()?;
        self.cancelled = cancelled;
        Ok(())
    }

    pub fn get_field<P: Into<FieldPath>>(&self, path: P) -> Result<&FieldValue> {
        self.modifier.get(&self.instance, path)
    }

    pub fn read<T: FieldType, P: Into<FieldPath>>(&self, path: P) -> Result<T> {
        self.modifier.read(&self.instance, path)
    }

    pub fn set_field<P: Into<FieldPath>>(&mut self, path: P, value: FieldValue) -> Result<()> {
        self.ensure_writable()?;
        self.modifier.set(&mut self.instance, path, value)
    }

    pub fn write<T: FieldType, P: Into<FieldPath>>(&mut self, path: P, value: T) -> Result<()> {
        self.ensure_writable()?;
        self.modifier.write(&mut self.instance, path, value)
    }

    pub fn enum_name<P: Into<FieldPath>>(&self, path: P) -> Result<&str> {
        self.modifier.enum_name(&self.instance, path)
    }

    pub fn set_enum_by_name<P: Into<FieldPath>>(&mut self, path: P, variant: &str) -> Result<()> {
        self.ensure_writable()?;
        self.modifier.set_enum_by_name(&mut self.instance, path, variant)
    }

    /// Swap the carried instance for another one of the same descriptor.
    ///
    /// On mismatch the container keeps its current instance.
    pub fn replace(&mut self, instance: MessageInstance) -> Result<()> {
        self.ensure_writable()?;
        if !instance.same_descriptor(self.instance.descriptor()) {
            return Err(InterceptError::descriptor_mismatch(
                self.instance.descriptor(),
                instance.descriptor(),
            ));
        }
        self.instance = instance;
        Ok(())
    }

    /// Deep copy of the current instance, independent of the container
    pub fn clone_instance(&self) -> MessageInstance {
        self.instance.deep_clone()
    }

    /// Point-in-time copy for export or logging
    pub fn snapshot(&self) -> PacketSnapshot {
        let descriptor = self.instance.descriptor();
        PacketSnapshot {
            connection: self.connection,
            direction: self.direction,
            category: descriptor.category(),
            version: descriptor.version(),
            name: descriptor.name().to_string(),
            cancelled: self.cancelled,
            synthetic: self.synthetic,
            fields: self.instance.fields().to_vec(),
        }
    }

    /// Release the instance at the end of the pass
    pub fn into_instance(self) -> MessageInstance {
        self.instance
    }

    /// Typed view over the n-th top-level field accepted by `T`
    pub fn fields<T: FieldType>(&mut self) -> TypedFields<'_, T> {
        let view = self.modifier.with_type::<T>();
        TypedFields {
            container: self,
            view,
        }
    }

    /// 32-bit integers, including varints
    pub fn integers(&mut self) -> TypedFields<'_, i32> {
        self.fields()
    }

    /// 64-bit integers, including varlongs
    pub fn longs(&mut self) -> TypedFields<'_, i64> {
        self.fields()
    }

    pub fn shorts(&mut self) -> TypedFields<'_, i16> {
        self.fields()
    }

    pub fn bytes(&mut self) -> TypedFields<'_, i8> {
        self.fields()
    }

    pub fn booleans(&mut self) -> TypedFields<'_, bool> {
        self.fields()
    }

    pub fn floats(&mut self) -> TypedFields<'_, f32> {
        self.fields()
    }

    pub fn doubles(&mut self) -> TypedFields<'_, f64> {
        self.fields()
    }

    pub fn strings(&mut self) -> TypedFields<'_, String> {
        self.fields()
    }

    pub fn byte_arrays(&mut self) -> TypedFields<'_, Vec<u8>> {
        self.fields()
    }

    pub fn uuids(&mut self) -> TypedFields<'_, u128> {
        self.fields()
    }
}

/// Typed view over a container, created by [`PacketContainer::integers`] and friends
pub struct TypedFields<'c, T> {
    container: &'c mut PacketContainer,
    view: TypedModifier<T>,
}

impl<T: FieldType> TypedFields<'_, T> {
    pub fn size(&self) -> usize {
        self.view.size()
    }

    pub fn read(&self, nth: usize) -> Result<T> {
        self.view.read(&self.container.instance, nth)
    }

    pub fn write(&mut self, nth: usize, value: T) -> Result<()> {
        self.container.ensure_writable()?;
        self.view.write(&mut self.container.instance, nth, value)
    }

    pub fn values(&self) -> Result<Vec<T>> {
        self.view.values(&self.container.instance)
    }
}
