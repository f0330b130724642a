//! Concrete message values bound to exactly one descriptor.

use crate::core::descriptor::MessageDescriptor;
use crate::core::types::DescriptorKey;
use crate::core::value::FieldValue;
use crate::error::{constants, InterceptError, Result};
use std::sync::Arc;

/// A decoded message conforming to one [`MessageDescriptor`].
///
/// Instances own all of their field data, so `Clone` is a deep copy: a clone never
/// shares mutable state with the original. The descriptor itself is immutable and shared.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageInstance {
    descriptor: Arc<MessageDescriptor>,
    fields: Vec<FieldValue>,
}

impl MessageInstance {
    /// Instance with every required field at its kind's default and optional fields absent
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        let fields = descriptor.layout().default_values();
        Self { descriptor, fields }
    }

    /// Build an instance from top-level values, rejecting values that do not conform
    pub fn from_values(descriptor: Arc<MessageDescriptor>, fields: Vec<FieldValue>) -> Result<Self> {
        descriptor
            .validate(&fields)
            .map_err(|e| {
                InterceptError::descriptor_mismatch(
                    &descriptor,
                    format!("{}: {e}", constants::ERR_VALUES_MISMATCH),
                )
            })?;
        Ok(Self { descriptor, fields })
    }

    /// Pair values that were already validated against `descriptor`
    pub(crate) fn from_validated(descriptor: Arc<MessageDescriptor>, fields: Vec<FieldValue>) -> Self {
        Self { descriptor, fields }
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    pub fn key(&self) -> DescriptorKey {
        self.descriptor.key()
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// Release the field values, e.g. to hand them back to the transport
    pub fn into_fields(self) -> Vec<FieldValue> {
        self.fields
    }

    /// Whether this instance conforms to `other`: same identity and same layout
    pub fn same_descriptor(&self, other: &MessageDescriptor) -> bool {
        std::ptr::eq(self.descriptor.as_ref(), other) || *self.descriptor == *other
    }

    /// Deep, independent copy
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Vec<FieldValue> {
        &mut self.fields
    }
}
