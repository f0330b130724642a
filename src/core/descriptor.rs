//! # Message Descriptors
//!
//! Structural layout of message categories. A descriptor is published once per schema
//! version and never edited afterwards; schema evolution produces a new version.
//!
//! ```text
//! MessageDescriptor (inbound/0x2A@v763 "SetSlot")
//!   0 window_id : u8
//!   1 slot      : i16
//!   2 item      : composite ItemStack
//!        0 id    : varint
//!        1 count : u8
//!   3 lore      : list<string> (optional)
//! ```

use crate::core::types::{CategoryId, DescriptorKey, Direction, SchemaVersion};
use crate::core::value::FieldValue;
use crate::error::{InterceptError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Semantic kind of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    F32,
    F64,
    /// Variable-length encoded 32-bit integer
    VarInt,
    /// Variable-length encoded 64-bit integer
    VarLong,
    String,
    Bytes,
    Uuid,
    Enum(Arc<EnumDescriptor>),
    Composite(Arc<StructDescriptor>),
    List(Box<FieldKind>),
}

impl FieldKind {
    /// Value a freshly created message carries for a required field of this kind
    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldKind::Bool => FieldValue::Bool(false),
            FieldKind::I8 => FieldValue::I8(0),
            FieldKind::I16 => FieldValue::I16(0),
            FieldKind::I32 => FieldValue::I32(0),
            FieldKind::I64 => FieldValue::I64(0),
            FieldKind::U8 => FieldValue::U8(0),
            FieldKind::U16 => FieldValue::U16(0),
            FieldKind::F32 => FieldValue::F32(0.0),
            FieldKind::F64 => FieldValue::F64(0.0),
            FieldKind::VarInt => FieldValue::VarInt(0),
            FieldKind::VarLong => FieldValue::VarLong(0),
            FieldKind::String => FieldValue::String(String::new()),
            FieldKind::Bytes => FieldValue::Bytes(Vec::new()),
            FieldKind::Uuid => FieldValue::Uuid(0),
            FieldKind::Enum(_) => FieldValue::Enum(0),
            FieldKind::Composite(layout) => FieldValue::Composite(layout.default_values()),
            FieldKind::List(_) => FieldValue::List(Vec::new()),
        }
    }

    /// Whether paths may descend into values of this kind
    pub fn is_container(&self) -> bool {
        matches!(self, FieldKind::Composite(_) | FieldKind::List(_))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => f.write_str("bool"),
            FieldKind::I8 => f.write_str("i8"),
            FieldKind::I16 => f.write_str("i16"),
            FieldKind::I32 => f.write_str("i32"),
            FieldKind::I64 => f.write_str("i64"),
            FieldKind::U8 => f.write_str("u8"),
            FieldKind::U16 => f.write_str("u16"),
            FieldKind::F32 => f.write_str("f32"),
            FieldKind::F64 => f.write_str("f64"),
            FieldKind::VarInt => f.write_str("varint"),
            FieldKind::VarLong => f.write_str("varlong"),
            FieldKind::String => f.write_str("string"),
            FieldKind::Bytes => f.write_str("bytes"),
            FieldKind::Uuid => f.write_str("uuid"),
            FieldKind::Enum(e) => write!(f, "enum {}", e.name()),
            FieldKind::Composite(s) => write!(f, "composite {}", s.name()),
            FieldKind::List(element) => write!(f, "list<{element}>"),
        }
    }
}

/// Ordered variant table of an enumerated field. Values are stored as ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    name: String,
    variants: Vec<String>,
}

impl EnumDescriptor {
    pub fn new<S: Into<String>>(name: S, variants: Vec<String>) -> Result<Self> {
        let name = name.into();
        if variants.is_empty() {
            return Err(InterceptError::InvalidSchema(format!(
                "enum {name} has no variants"
            )));
        }
        for (i, variant) in variants.iter().enumerate() {
            if variants[..i].contains(variant) {
                return Err(InterceptError::InvalidSchema(format!(
                    "enum {name} declares variant {variant} twice"
                )));
            }
        }
        Ok(Self { name, variants })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn variant(&self, ordinal: u32) -> Option<&str> {
        self.variants.get(ordinal as usize).map(String::as_str)
    }

    pub fn ordinal_of(&self, variant: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|v| v == variant)
            .map(|i| i as u32)
    }
}

/// One field of a message or composite structure
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Optional fields may hold [`FieldValue::Absent`]
    pub optional: bool,
}

impl FieldDescriptor {
    pub fn required<S: Into<String>>(name: S, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    pub fn optional<S: Into<String>>(name: S, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }

    pub(crate) fn default_value(&self) -> FieldValue {
        if self.optional {
            FieldValue::Absent
        } else {
            self.kind.default_value()
        }
    }
}

/// Ordered field table with a name index, shared by messages and composite fields
#[derive(Debug, Clone)]
pub struct StructDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
}

impl StructDescriptor {
    pub fn new<S: Into<String>>(name: S, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let name = name.into();
        let mut by_name = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(InterceptError::InvalidSchema(format!(
                    "{name}: field #{index} has an empty name"
                )));
            }
            // Dotted paths split on '.' and read digit-only segments as indices
            if field.name.contains('.') || field.name.bytes().all(|b| b.is_ascii_digit()) {
                return Err(InterceptError::InvalidSchema(format!(
                    "{name}: field name {:?} is not addressable by path",
                    field.name
                )));
            }
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(InterceptError::InvalidSchema(format!(
                    "{name}: duplicate field name {}",
                    field.name
                )));
            }
        }
        Ok(Self {
            name,
            fields,
            by_name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn default_values(&self) -> Vec<FieldValue> {
        self.fields.iter().map(FieldDescriptor::default_value).collect()
    }
}

impl PartialEq for StructDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

/// Layout of one message category in one schema version
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    key: DescriptorKey,
    layout: StructDescriptor,
}

impl MessageDescriptor {
    pub fn new<S: Into<String>>(
        key: DescriptorKey,
        name: S,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self> {
        Ok(Self {
            key,
            layout: StructDescriptor::new(name, fields)?,
        })
    }

    /// Start a descriptor with the fluent builder
    pub fn builder<S: Into<String>>(
        direction: Direction,
        category: impl Into<CategoryId>,
        version: impl Into<SchemaVersion>,
        name: S,
    ) -> DescriptorBuilder {
        DescriptorBuilder {
            key: DescriptorKey::new(direction, category.into(), version.into()),
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn key(&self) -> DescriptorKey {
        self.key
    }

    pub fn direction(&self) -> Direction {
        self.key.direction
    }

    pub fn category(&self) -> CategoryId {
        self.key.category
    }

    pub fn version(&self) -> SchemaVersion {
        self.key.version
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    pub fn layout(&self) -> &StructDescriptor {
        &self.layout
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        self.layout.fields()
    }

    /// Check a complete top-level value list against this layout
    pub fn validate(&self, values: &[FieldValue]) -> Result<()> {
        crate::core::value::validate_struct(&self.layout, values, "")
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.layout.name(), self.key)
    }
}

/// Fluent construction of a [`MessageDescriptor`]
#[derive(Debug)]
pub struct DescriptorBuilder {
    key: DescriptorKey,
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl DescriptorBuilder {
    pub fn field<S: Into<String>>(mut self, name: S, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::required(name, kind));
        self
    }

    pub fn optional<S: Into<String>>(mut self, name: S, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::optional(name, kind));
        self
    }

    pub fn build(self) -> Result<MessageDescriptor> {
        MessageDescriptor::new(self.key, self.name, self.fields)
    }
}
