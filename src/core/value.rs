//! Field values and the typed conversion layer used by the structure modifier.

use crate::core::descriptor::{FieldKind, StructDescriptor};
use crate::error::{InterceptError, Result};
use serde::{Deserialize, Serialize};

/// A decoded protocol field. Widths mirror the descriptor kinds exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Value of an optional field that is not present
    Absent,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    F32(f32),
    F64(f64),
    VarInt(i32),
    VarLong(i64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(u128),
    /// Ordinal into the field's enum descriptor
    Enum(u32),
    Composite(Vec<FieldValue>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Short kind label used in mismatch errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Absent => "absent",
            FieldValue::Bool(_) => "bool",
            FieldValue::I8(_) => "i8",
            FieldValue::I16(_) => "i16",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::F32(_) => "f32",
            FieldValue::F64(_) => "f64",
            FieldValue::VarInt(_) => "varint",
            FieldValue::VarLong(_) => "varlong",
            FieldValue::String(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Uuid(_) => "uuid",
            FieldValue::Enum(_) => "enum",
            FieldValue::Composite(_) => "composite",
            FieldValue::List(_) => "list",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

fn mismatch(path: &str, expected: impl ToString, found: impl ToString) -> InterceptError {
    InterceptError::FieldTypeMismatch {
        path: if path.is_empty() {
            "<root>".to_string()
        } else {
            path.to_string()
        },
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn join(path: &str, segment: impl std::fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

/// Check that `value` conforms to `kind`, recursing through composites and lists.
///
/// `Absent` never conforms here; optionality is decided by the enclosing field.
pub(crate) fn validate_kind(kind: &FieldKind, value: &FieldValue, path: &str) -> Result<()> {
    match (kind, value) {
        (FieldKind::Bool, FieldValue::Bool(_))
        | (FieldKind::I8, FieldValue::I8(_))
        | (FieldKind::I16, FieldValue::I16(_))
        | (FieldKind::I32, FieldValue::I32(_))
        | (FieldKind::I64, FieldValue::I64(_))
        | (FieldKind::U8, FieldValue::U8(_))
        | (FieldKind::U16, FieldValue::U16(_))
        | (FieldKind::F32, FieldValue::F32(_))
        | (FieldKind::F64, FieldValue::F64(_))
        | (FieldKind::VarInt, FieldValue::VarInt(_))
        | (FieldKind::VarLong, FieldValue::VarLong(_))
        | (FieldKind::String, FieldValue::String(_))
        | (FieldKind::Bytes, FieldValue::Bytes(_))
        | (FieldKind::Uuid, FieldValue::Uuid(_)) => Ok(()),
        (FieldKind::Enum(table), FieldValue::Enum(ordinal)) => {
            if (*ordinal as usize) < table.len() {
                Ok(())
            } else {
                Err(mismatch(
                    path,
                    format!("enum {} ordinal < {}", table.name(), table.len()),
                    format!("ordinal {ordinal}"),
                ))
            }
        }
        (FieldKind::Composite(layout), FieldValue::Composite(values)) => {
            validate_struct(layout, values, path)
        }
        (FieldKind::List(element), FieldValue::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_kind(element, item, &join(path, i))?;
            }
            Ok(())
        }
        (kind, value) => Err(mismatch(path, kind, value.kind_name())),
    }
}

/// Check a value list against a struct layout: arity, optionality and kinds.
pub(crate) fn validate_struct(
    layout: &StructDescriptor,
    values: &[FieldValue],
    path: &str,
) -> Result<()> {
    if values.len() != layout.len() {
        return Err(mismatch(
            path,
            format!("{} with {} fields", layout.name(), layout.len()),
            format!("{} values", values.len()),
        ));
    }
    for (field, value) in layout.fields().iter().zip(values) {
        let field_path = join(path, &field.name);
        if value.is_absent() {
            if field.optional {
                continue;
            }
            return Err(InterceptError::MissingField(field_path));
        }
        validate_kind(&field.kind, value, &field_path)?;
    }
    Ok(())
}

/// Rust types that map onto one or more field kinds.
///
/// Used for typed reads/writes and for typed views that address the n-th field of a
/// kind (`integers().read(0)`).
pub trait FieldType: Sized {
    /// Label used in error messages
    const NAME: &'static str;

    /// Whether fields of `kind` can be read as and written from this type
    fn accepts(kind: &FieldKind) -> bool;

    fn from_value(value: &FieldValue) -> Option<Self>;

    /// Wrap into the exact value variant required by `kind`
    fn into_value(self, kind: &FieldKind) -> Option<FieldValue>;
}

macro_rules! scalar_field_type {
    ($ty:ty, $name:literal, $kind:ident) => {
        impl FieldType for $ty {
            const NAME: &'static str = $name;

            fn accepts(kind: &FieldKind) -> bool {
                matches!(kind, FieldKind::$kind)
            }

            fn from_value(value: &FieldValue) -> Option<Self> {
                match value {
                    FieldValue::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn into_value(self, kind: &FieldKind) -> Option<FieldValue> {
                match kind {
                    FieldKind::$kind => Some(FieldValue::$kind(self)),
                    _ => None,
                }
            }
        }
    };
}

scalar_field_type!(bool, "bool", Bool);
scalar_field_type!(i8, "i8", I8);
scalar_field_type!(i16, "i16", I16);
scalar_field_type!(u8, "u8", U8);
scalar_field_type!(u16, "u16", U16);
scalar_field_type!(f32, "f32", F32);
scalar_field_type!(f64, "f64", F64);
scalar_field_type!(String, "string", String);
scalar_field_type!(Vec<u8>, "bytes", Bytes);
scalar_field_type!(u128, "uuid", Uuid);

impl FieldType for i32 {
    const NAME: &'static str = "i32";

    fn accepts(kind: &FieldKind) -> bool {
        matches!(kind, FieldKind::I32 | FieldKind::VarInt)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I32(v) | FieldValue::VarInt(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self, kind: &FieldKind) -> Option<FieldValue> {
        match kind {
            FieldKind::I32 => Some(FieldValue::I32(self)),
            FieldKind::VarInt => Some(FieldValue::VarInt(self)),
            _ => None,
        }
    }
}

impl FieldType for i64 {
    const NAME: &'static str = "i64";

    fn accepts(kind: &FieldKind) -> bool {
        matches!(kind, FieldKind::I64 | FieldKind::VarLong)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::I64(v) | FieldValue::VarLong(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self, kind: &FieldKind) -> Option<FieldValue> {
        match kind {
            FieldKind::I64 => Some(FieldValue::I64(self)),
            FieldKind::VarLong => Some(FieldValue::VarLong(self)),
            _ => None,
        }
    }
}

/// Rust types converted to and from a composite field.
///
/// The conversion is keyed on the composite's struct descriptor name: a field whose
/// kind is `Composite` with layout name [`CompositeType::LAYOUT`] can be read and
/// written as `Self`, and a `List` of such composites as `Vec<Self>`. Both work with
/// typed paths and with `with_type::<T>()` views.
///
/// ```
/// use packet_intercept::core::value::{CompositeType, FieldValue};
///
/// struct Position { x: i32, z: i32 }
///
/// impl CompositeType for Position {
///     const LAYOUT: &'static str = "Position";
///
///     fn from_fields(fields: &[FieldValue]) -> Option<Self> {
///         match fields {
///             [FieldValue::I32(x), FieldValue::I32(z)] => Some(Position { x: *x, z: *z }),
///             _ => None,
///         }
///     }
///
///     fn into_fields(self) -> Vec<FieldValue> {
///         vec![FieldValue::I32(self.x), FieldValue::I32(self.z)]
///     }
/// }
/// ```
pub trait CompositeType: Sized {
    /// Name of the struct descriptor this type converts
    const LAYOUT: &'static str;

    /// Build from the composite's values, in layout order. `None` when they do not fit.
    fn from_fields(fields: &[FieldValue]) -> Option<Self>;

    /// Values in layout order; checked against the layout on write
    fn into_fields(self) -> Vec<FieldValue>;
}

fn is_layout<T: CompositeType>(kind: &FieldKind) -> bool {
    matches!(kind, FieldKind::Composite(layout) if layout.name() == T::LAYOUT)
}

impl<T: CompositeType> FieldType for T {
    const NAME: &'static str = "composite";

    fn accepts(kind: &FieldKind) -> bool {
        is_layout::<T>(kind)
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Composite(fields) => T::from_fields(fields),
            _ => None,
        }
    }

    fn into_value(self, kind: &FieldKind) -> Option<FieldValue> {
        is_layout::<T>(kind).then(|| FieldValue::Composite(self.into_fields()))
    }
}

impl<T: CompositeType> FieldType for Vec<T> {
    const NAME: &'static str = "composite list";

    fn accepts(kind: &FieldKind) -> bool {
        matches!(kind, FieldKind::List(element) if is_layout::<T>(element))
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }

    fn into_value(self, kind: &FieldKind) -> Option<FieldValue> {
        Self::accepts(kind).then(|| {
            FieldValue::List(
                self.into_iter()
                    .map(|item| FieldValue::Composite(item.into_fields()))
                    .collect(),
            )
        })
    }
}
