//! # Structure Modifier
//!
//! Descriptor-driven field access over [`MessageInstance`] values.
//!
//! A modifier is a cheap view (one `Arc` clone) derived from a descriptor. It never owns
//! the instance; every call borrows the instance for its own duration.
//!
//! ## Addressing
//! - **Paths**: index sequences through composites and lists (`[2, 0]`), or dotted names
//!   (`"item.count"`, `"lore.1"`)
//! - **Typed views**: the n-th top-level field accepted by a Rust type
//!   (`with_type::<i32>().read(&msg, 0)`)
//!
//! ## Guarantees
//! - Writes are validated against the descriptor before anything is assigned, so a
//!   rejected write leaves the instance unchanged
//! - Numeric widths and enum ordinals are preserved exactly; strings and byte arrays are
//!   stored verbatim

use crate::core::descriptor::{FieldDescriptor, FieldKind, MessageDescriptor, StructDescriptor};
use crate::core::instance::MessageInstance;
use crate::core::value::{validate_kind, FieldType, FieldValue};
use crate::error::{InterceptError, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Index(usize),
    Name(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Name(n) => f.write_str(n),
        }
    }
}

/// Address of a (possibly nested) field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// Parse a dotted path; numeric segments become indices
    pub fn parse(dotted: &str) -> Self {
        FieldPath(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(|s| match s.parse::<usize>() {
                    Ok(i) => PathSegment::Index(i),
                    Err(_) => PathSegment::Name(s.to_string()),
                })
                .collect(),
        )
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn push(mut self, segment: PathSegment) -> Self {
        self.0.push(segment);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<usize> for FieldPath {
    fn from(index: usize) -> Self {
        FieldPath(vec![PathSegment::Index(index)])
    }
}

impl From<&[usize]> for FieldPath {
    fn from(indices: &[usize]) -> Self {
        FieldPath(indices.iter().copied().map(PathSegment::Index).collect())
    }
}

impl<const N: usize> From<[usize; N]> for FieldPath {
    fn from(indices: [usize; N]) -> Self {
        FieldPath(indices.into_iter().map(PathSegment::Index).collect())
    }
}

impl From<Vec<usize>> for FieldPath {
    fn from(indices: Vec<usize>) -> Self {
        FieldPath(indices.into_iter().map(PathSegment::Index).collect())
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        FieldPath::parse(dotted)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(path: &FieldPath) -> Self {
        path.clone()
    }
}

/// Descriptor slot a path resolved to
#[derive(Debug, Clone, Copy)]
enum Slot<'d> {
    Field(&'d FieldDescriptor),
    Element(&'d FieldKind),
}

impl<'d> Slot<'d> {
    fn kind(&self) -> &'d FieldKind {
        match self {
            Slot::Field(field) => &field.kind,
            Slot::Element(kind) => kind,
        }
    }

    fn optional(&self) -> bool {
        match self {
            Slot::Field(field) => field.optional,
            Slot::Element(_) => false,
        }
    }
}

fn struct_index(layout: &StructDescriptor, segment: &PathSegment, path: &FieldPath) -> Result<usize> {
    let index = match segment {
        PathSegment::Index(i) => *i,
        PathSegment::Name(name) => layout
            .index_of(name)
            .ok_or_else(|| InterceptError::MissingField(format!("{path} ({} has no {name})", layout.name())))?,
    };
    if index >= layout.len() {
        return Err(InterceptError::MissingField(format!(
            "{path} ({} has {} fields)",
            layout.name(),
            layout.len()
        )));
    }
    Ok(index)
}

fn list_index(segment: &PathSegment, path: &FieldPath) -> Result<usize> {
    match segment {
        PathSegment::Index(i) => Ok(*i),
        PathSegment::Name(name) => Err(InterceptError::FieldTypeMismatch {
            path: path.to_string(),
            expected: "list index".to_string(),
            found: format!("name {name}"),
        }),
    }
}

fn not_a_container(kind: &FieldKind, path: &FieldPath) -> InterceptError {
    InterceptError::FieldTypeMismatch {
        path: path.to_string(),
        expected: "composite or list".to_string(),
        found: kind.to_string(),
    }
}

fn locate<'v, 'd>(
    layout: &'d StructDescriptor,
    values: &'v [FieldValue],
    segments: &[PathSegment],
    path: &FieldPath,
) -> Result<(&'v FieldValue, Slot<'d>)> {
    let (first, rest) = segments
        .split_first()
        .ok_or_else(|| InterceptError::MissingField("<empty path>".to_string()))?;
    let index = struct_index(layout, first, path)?;
    let field = &layout.fields()[index];
    let value = values
        .get(index)
        .ok_or_else(|| InterceptError::MissingField(path.to_string()))?;
    if rest.is_empty() {
        return Ok((value, Slot::Field(field)));
    }
    descend(&field.kind, value, rest, path)
}

fn descend<'v, 'd>(
    kind: &'d FieldKind,
    value: &'v FieldValue,
    segments: &[PathSegment],
    path: &FieldPath,
) -> Result<(&'v FieldValue, Slot<'d>)> {
    match (kind, value) {
        (FieldKind::Composite(layout), FieldValue::Composite(values)) => {
            locate(layout, values, segments, path)
        }
        (FieldKind::List(element), FieldValue::List(items)) => {
            let (first, rest) = segments
                .split_first()
                .ok_or_else(|| InterceptError::MissingField(path.to_string()))?;
            let index = list_index(first, path)?;
            let item = items
                .get(index)
                .ok_or_else(|| InterceptError::MissingField(format!("{path} (list has {})", items.len())))?;
            if rest.is_empty() {
                Ok((item, Slot::Element(element.as_ref())))
            } else {
                descend(element, item, rest, path)
            }
        }
        (kind, FieldValue::Absent) if kind.is_container() => {
            Err(InterceptError::MissingField(path.to_string()))
        }
        (kind, _) => Err(not_a_container(kind, path)),
    }
}

fn locate_mut<'v, 'd>(
    layout: &'d StructDescriptor,
    values: &'v mut [FieldValue],
    segments: &[PathSegment],
    path: &FieldPath,
) -> Result<(&'v mut FieldValue, Slot<'d>)> {
    let (first, rest) = segments
        .split_first()
        .ok_or_else(|| InterceptError::MissingField("<empty path>".to_string()))?;
    let index = struct_index(layout, first, path)?;
    let field = &layout.fields()[index];
    let value = values
        .get_mut(index)
        .ok_or_else(|| InterceptError::MissingField(path.to_string()))?;
    if rest.is_empty() {
        return Ok((value, Slot::Field(field)));
    }
    descend_mut(&field.kind, value, rest, path)
}

fn descend_mut<'v, 'd>(
    kind: &'d FieldKind,
    value: &'v mut FieldValue,
    segments: &[PathSegment],
    path: &FieldPath,
) -> Result<(&'v mut FieldValue, Slot<'d>)> {
    match (kind, value) {
        (FieldKind::Composite(layout), FieldValue::Composite(values)) => {
            locate_mut(layout, values, segments, path)
        }
        (FieldKind::List(element), FieldValue::List(items)) => {
            let (first, rest) = segments
                .split_first()
                .ok_or_else(|| InterceptError::MissingField(path.to_string()))?;
            let index = list_index(first, path)?;
            let len = items.len();
            let item = items
                .get_mut(index)
                .ok_or_else(|| InterceptError::MissingField(format!("{path} (list has {len})")))?;
            if rest.is_empty() {
                Ok((item, Slot::Element(element.as_ref())))
            } else {
                descend_mut(element, item, rest, path)
            }
        }
        (kind, FieldValue::Absent) if kind.is_container() => {
            Err(InterceptError::MissingField(path.to_string()))
        }
        (kind, _) => Err(not_a_container(kind, path)),
    }
}

/// Indexed and typed accessor over instances of one descriptor
#[derive(Debug, Clone)]
pub struct StructureModifier {
    descriptor: Arc<MessageDescriptor>,
}

impl StructureModifier {
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        Self { descriptor }
    }

    /// Modifier for the descriptor an instance is bound to
    pub fn of(instance: &MessageInstance) -> Self {
        Self::new(Arc::clone(instance.descriptor()))
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    /// Number of top-level fields
    pub fn size(&self) -> usize {
        self.descriptor.layout().len()
    }

    fn check(&self, instance: &MessageInstance) -> Result<()> {
        if instance.same_descriptor(&self.descriptor) {
            Ok(())
        } else {
            Err(InterceptError::descriptor_mismatch(
                &self.descriptor,
                instance.descriptor(),
            ))
        }
    }

    /// Borrow the value at `path`
    pub fn get<'i, P: Into<FieldPath>>(
        &self,
        instance: &'i MessageInstance,
        path: P,
    ) -> Result<&'i FieldValue> {
        self.check(instance)?;
        let path = path.into();
        let (value, _) = locate(self.descriptor.layout(), instance.fields(), path.segments(), &path)?;
        Ok(value)
    }

    /// Typed read; an absent optional value reads as `MissingField`
    pub fn read<T: FieldType, P: Into<FieldPath>>(
        &self,
        instance: &MessageInstance,
        path: P,
    ) -> Result<T> {
        self.check(instance)?;
        let path = path.into();
        let (value, slot) = locate(self.descriptor.layout(), instance.fields(), path.segments(), &path)?;
        if !T::accepts(slot.kind()) {
            return Err(InterceptError::FieldTypeMismatch {
                path: path.to_string(),
                expected: T::NAME.to_string(),
                found: slot.kind().to_string(),
            });
        }
        if value.is_absent() {
            return Err(InterceptError::MissingField(path.to_string()));
        }
        T::from_value(value).ok_or_else(|| InterceptError::FieldTypeMismatch {
            path: path.to_string(),
            expected: T::NAME.to_string(),
            found: value.kind_name().to_string(),
        })
    }

    /// Replace the value at `path`. The value must conform to the slot's kind.
    pub fn set<P: Into<FieldPath>>(
        &self,
        instance: &mut MessageInstance,
        path: P,
        value: FieldValue,
    ) -> Result<()> {
        self.check(instance)?;
        let path = path.into();
        let descriptor = Arc::clone(&self.descriptor);
        let (slot_value, slot) =
            locate_mut(descriptor.layout(), instance.fields_mut(), path.segments(), &path)?;
        if value.is_absent() {
            if !slot.optional() {
                return Err(InterceptError::FieldTypeMismatch {
                    path: path.to_string(),
                    expected: slot.kind().to_string(),
                    found: "absent".to_string(),
                });
            }
        } else {
            validate_kind(slot.kind(), &value, &path.to_string())?;
        }
        *slot_value = value;
        Ok(())
    }

    /// Typed write, converted to the exact variant the slot requires
    pub fn write<T: FieldType, P: Into<FieldPath>>(
        &self,
        instance: &mut MessageInstance,
        path: P,
        value: T,
    ) -> Result<()> {
        let path = path.into();
        let kind = self.slot_kind(&path)?;
        let converted = value
            .into_value(&kind)
            .ok_or_else(|| InterceptError::FieldTypeMismatch {
                path: path.to_string(),
                expected: kind.to_string(),
                found: T::NAME.to_string(),
            })?;
        self.set(instance, path, converted)
    }

    /// Variant name of an enum field
    pub fn enum_name<'i, P: Into<FieldPath>>(
        &self,
        instance: &'i MessageInstance,
        path: P,
    ) -> Result<&'i str> {
        self.check(instance)?;
        let path = path.into();
        let layout: &'i StructDescriptor = instance.descriptor().layout();
        let (value, slot) = locate(layout, instance.fields(), path.segments(), &path)?;
        let table = match slot.kind() {
            FieldKind::Enum(table) => table,
            other => {
                return Err(InterceptError::FieldTypeMismatch {
                    path: path.to_string(),
                    expected: "enum".to_string(),
                    found: other.to_string(),
                })
            }
        };
        match value {
            FieldValue::Enum(ordinal) => table
                .variant(*ordinal)
                .ok_or_else(|| InterceptError::MissingField(format!("{path} ordinal {ordinal}"))),
            FieldValue::Absent => Err(InterceptError::MissingField(path.to_string())),
            other => Err(InterceptError::FieldTypeMismatch {
                path: path.to_string(),
                expected: "enum".to_string(),
                found: other.kind_name().to_string(),
            }),
        }
    }

    /// Set an enum field by variant name
    pub fn set_enum_by_name<P: Into<FieldPath>>(
        &self,
        instance: &mut MessageInstance,
        path: P,
        variant: &str,
    ) -> Result<()> {
        let path = path.into();
        let ordinal = match self.slot_kind(&path)? {
            FieldKind::Enum(table) => table.ordinal_of(variant).ok_or_else(|| {
                InterceptError::FieldTypeMismatch {
                    path: path.to_string(),
                    expected: format!("variant of {}", table.name()),
                    found: variant.to_string(),
                }
            })?,
            other => {
                return Err(InterceptError::FieldTypeMismatch {
                    path: path.to_string(),
                    expected: "enum".to_string(),
                    found: other.to_string(),
                })
            }
        };
        self.set(instance, path, FieldValue::Enum(ordinal))
    }

    /// Deep, independent copy of `instance`
    pub fn clone_instance(&self, instance: &MessageInstance) -> Result<MessageInstance> {
        self.check(instance)?;
        Ok(instance.deep_clone())
    }

    /// Typed view over the top-level fields accepted by `T`
    pub fn with_type<T: FieldType>(&self) -> TypedModifier<T> {
        let indices = self
            .descriptor
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| T::accepts(&field.kind))
            .map(|(i, _)| i)
            .collect();
        TypedModifier {
            indices,
            _marker: PhantomData,
        }
    }

    /// Kind of the slot at `path`, resolved from the descriptor alone (list paths
    /// resolve to the element kind)
    fn slot_kind(&self, path: &FieldPath) -> Result<FieldKind> {
        let mut layout: &StructDescriptor = self.descriptor.layout();
        let mut current: Option<&FieldKind> = None;
        for segment in path.segments() {
            match current {
                None => {
                    let index = struct_index(layout, segment, path)?;
                    current = Some(&layout.fields()[index].kind);
                }
                Some(FieldKind::Composite(inner)) => {
                    layout = inner.as_ref();
                    let index = struct_index(layout, segment, path)?;
                    current = Some(&layout.fields()[index].kind);
                }
                Some(FieldKind::List(element)) => {
                    list_index(segment, path)?;
                    current = Some(element.as_ref());
                }
                Some(kind) => return Err(not_a_container(kind, path)),
            }
        }
        current
            .cloned()
            .ok_or_else(|| InterceptError::MissingField("<empty path>".to_string()))
    }
}

/// The n-th top-level field of a kind accepted by `T`
#[derive(Debug, Clone)]
pub struct TypedModifier<T> {
    indices: Vec<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FieldType> TypedModifier<T> {
    /// Number of fields this view addresses
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    /// Top-level index of the n-th matching field
    pub fn field_index(&self, nth: usize) -> Result<usize> {
        self.indices
            .get(nth)
            .copied()
            .ok_or_else(|| InterceptError::MissingField(format!("{} #{nth}", T::NAME)))
    }

    pub fn read(&self, instance: &MessageInstance, nth: usize) -> Result<T> {
        let index = self.field_index(nth)?;
        StructureModifier::of(instance).read::<T, _>(instance, index)
    }

    pub fn write(&self, instance: &mut MessageInstance, nth: usize, value: T) -> Result<()> {
        let index = self.field_index(nth)?;
        StructureModifier::of(instance).write(instance, index, value)
    }

    /// Read every addressed field in order
    pub fn values(&self, instance: &MessageInstance) -> Result<Vec<T>> {
        (0..self.size()).map(|nth| self.read(instance, nth)).collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::descriptor::{EnumDescriptor, FieldDescriptor};
    use crate::core::types::Direction;

    fn descriptor() -> Arc<MessageDescriptor> {
        let item = Arc::new(
            StructDescriptor::new(
                "Item",
                vec![
                    FieldDescriptor::required("id", FieldKind::VarInt),
                    FieldDescriptor::required("count", FieldKind::U8),
                ],
            )
            .unwrap(),
        );
        let hand = Arc::new(EnumDescriptor::new("Hand", vec!["MAIN".into(), "OFF".into()]).unwrap());
        Arc::new(
            MessageDescriptor::builder(Direction::Inbound, 0x2Au32, 1u32, "SetSlot")
                .field("window", FieldKind::U8)
                .field("slot", FieldKind::I16)
                .field("item", FieldKind::Composite(item))
                .field("hand", FieldKind::Enum(hand))
                .field("amount", FieldKind::I32)
                .field("state", FieldKind::VarInt)
                .optional("lore", FieldKind::List(Box::new(FieldKind::String)))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_get_and_set_by_index_and_name() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut msg = MessageInstance::new(d);

        m.set(&mut msg, "slot", FieldValue::I16(36)).unwrap();
        assert_eq!(m.get(&msg, 1).unwrap(), &FieldValue::I16(36));

        m.write(&mut msg, [2, 1], 64u8).unwrap();
        assert_eq!(m.read::<u8, _>(&msg, "item.count").unwrap(), 64);
    }

    #[test]
    fn test_wrong_width_rejected_and_instance_untouched() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut msg = MessageInstance::new(d);
        let before = msg.clone();

        let err = m.set(&mut msg, "slot", FieldValue::I32(1)).unwrap_err();
        assert!(matches!(err, InterceptError::FieldTypeMismatch { .. }));
        let err = m.set(&mut msg, "item", FieldValue::Composite(vec![FieldValue::VarInt(1)])).unwrap_err();
        assert!(matches!(err, InterceptError::FieldTypeMismatch { .. }));
        assert_eq!(msg, before);
    }

    #[test]
    fn test_missing_and_non_container_paths() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let msg = MessageInstance::new(d);

        assert!(matches!(m.get(&msg, 99), Err(InterceptError::MissingField(_))));
        assert!(matches!(m.get(&msg, "nope"), Err(InterceptError::MissingField(_))));
        assert!(matches!(
            m.get(&msg, "slot.0"),
            Err(InterceptError::FieldTypeMismatch { .. })
        ));
        // optional list is absent by default
        assert!(matches!(m.get(&msg, "lore.0"), Err(InterceptError::MissingField(_))));
        assert!(matches!(
            m.read::<String, _>(&msg, "lore"),
            Err(InterceptError::FieldTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_list_elements_addressable() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut msg = MessageInstance::new(d);
        m.set(
            &mut msg,
            "lore",
            FieldValue::List(vec![FieldValue::String("a".into()), FieldValue::String("b".into())]),
        )
        .unwrap();
        m.write(&mut msg, "lore.1", "β".to_string()).unwrap();
        assert_eq!(m.read::<String, _>(&msg, "lore.1").unwrap(), "β");
        m.set(&mut msg, "lore", FieldValue::Absent).unwrap();
        assert!(m.set(&mut msg, "slot", FieldValue::Absent).is_err());
    }

    #[test]
    fn test_enum_by_name() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut msg = MessageInstance::new(d);
        assert_eq!(m.enum_name(&msg, "hand").unwrap(), "MAIN");
        m.set_enum_by_name(&mut msg, "hand", "OFF").unwrap();
        assert_eq!(m.get(&msg, "hand").unwrap(), &FieldValue::Enum(1));
        assert!(m.set_enum_by_name(&mut msg, "hand", "THIRD").is_err());
        assert!(m.set(&mut msg, "hand", FieldValue::Enum(5)).is_err());
    }

    #[test]
    fn test_typed_view_counts_varint_as_integer() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut msg = MessageInstance::new(d);
        let ints = m.with_type::<i32>();
        assert_eq!(ints.size(), 2);
        ints.write(&mut msg, 1, 7).unwrap();
        assert_eq!(m.get(&msg, "state").unwrap(), &FieldValue::VarInt(7));
        assert_eq!(ints.values(&msg).unwrap(), vec![0, 7]);
        assert!(matches!(ints.read(&msg, 2), Err(InterceptError::MissingField(_))));
    }

    #[test]
    fn test_clone_is_independent() {
        let d = descriptor();
        let m = StructureModifier::new(d.clone());
        let mut original = MessageInstance::new(d);
        m.write(&mut original, "amount", 50).unwrap();

        let mut copy = m.clone_instance(&original).unwrap();
        m.write(&mut copy, "amount", 0).unwrap();
        m.write(&mut copy, "item.count", 3u8).unwrap();

        assert_eq!(m.read::<i32, _>(&original, "amount").unwrap(), 50);
        assert_eq!(m.read::<u8, _>(&original, "item.count").unwrap(), 0);
    }

    #[test]
    fn test_foreign_instance_rejected() {
        let m = StructureModifier::new(descriptor());
        let other = Arc::new(
            MessageDescriptor::builder(Direction::Inbound, 0x01u32, 1u32, "Other")
                .field("x", FieldKind::Bool)
                .build()
                .unwrap(),
        );
        let msg = MessageInstance::new(other);
        assert!(matches!(
            m.get(&msg, 0),
            Err(InterceptError::DescriptorMismatch { .. })
        ));
    }
}
