//! # Schema Catalog
//!
//! Declarative, serde-friendly form of one protocol schema version, as supplied by the
//! host's protocol definitions. The catalog is converted into immutable
//! [`MessageDescriptor`]s and published through the registry.
//!
//! ## Example (TOML)
//! ```toml
//! version = 763
//!
//! [[messages]]
//! name = "SetCoins"
//! direction = "outbound"
//! category = 42
//!
//! [[messages.fields]]
//! name = "amount"
//! kind = { type = "i32" }
//! ```

use crate::core::descriptor::{
    EnumDescriptor, FieldDescriptor, FieldKind, MessageDescriptor, StructDescriptor,
};
use crate::core::types::{CategoryId, DescriptorKey, Direction, SchemaVersion};
use crate::error::{InterceptError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One schema version worth of message definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub version: SchemaVersion,
    #[serde(default)]
    pub messages: Vec<MessageSpec>,
}

/// Definition of one message category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSpec {
    pub name: String,
    pub direction: Direction,
    pub category: CategoryId,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Definition of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: KindSpec,
    #[serde(default)]
    pub optional: bool,
}

/// Serialized field kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindSpec {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    F32,
    F64,
    #[serde(rename = "varint")]
    VarInt,
    #[serde(rename = "varlong")]
    VarLong,
    String,
    Bytes,
    Uuid,
    Enum {
        name: String,
        variants: Vec<String>,
    },
    Composite {
        name: String,
        fields: Vec<FieldSpec>,
    },
    List {
        element: Box<KindSpec>,
    },
}

impl KindSpec {
    fn to_kind(&self) -> Result<FieldKind> {
        Ok(match self {
            KindSpec::Bool => FieldKind::Bool,
            KindSpec::I8 => FieldKind::I8,
            KindSpec::I16 => FieldKind::I16,
            KindSpec::I32 => FieldKind::I32,
            KindSpec::I64 => FieldKind::I64,
            KindSpec::U8 => FieldKind::U8,
            KindSpec::U16 => FieldKind::U16,
            KindSpec::F32 => FieldKind::F32,
            KindSpec::F64 => FieldKind::F64,
            KindSpec::VarInt => FieldKind::VarInt,
            KindSpec::VarLong => FieldKind::VarLong,
            KindSpec::String => FieldKind::String,
            KindSpec::Bytes => FieldKind::Bytes,
            KindSpec::Uuid => FieldKind::Uuid,
            KindSpec::Enum { name, variants } => {
                FieldKind::Enum(Arc::new(EnumDescriptor::new(name.clone(), variants.clone())?))
            }
            KindSpec::Composite { name, fields } => FieldKind::Composite(Arc::new(
                StructDescriptor::new(name.clone(), to_fields(fields)?)?,
            )),
            KindSpec::List { element } => FieldKind::List(Box::new(element.to_kind()?)),
        })
    }
}

fn to_fields(specs: &[FieldSpec]) -> Result<Vec<FieldDescriptor>> {
    specs
        .iter()
        .map(|spec| {
            Ok(FieldDescriptor {
                name: spec.name.clone(),
                kind: spec.kind.to_kind()?,
                optional: spec.optional,
            })
        })
        .collect()
}

impl SchemaCatalog {
    pub fn new(version: impl Into<SchemaVersion>) -> Self {
        Self {
            version: version.into(),
            messages: Vec::new(),
        }
    }

    /// Parse a catalog from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| InterceptError::InvalidSchema(format!("Failed to parse JSON catalog: {e}")))
    }

    /// Parse a catalog from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| InterceptError::InvalidSchema(format!("Failed to parse TOML catalog: {e}")))
    }

    /// Load a catalog file; `.toml` files are parsed as TOML, everything else as JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| InterceptError::SerializeError(e.to_string()))
    }

    /// Convert every message spec into a descriptor of this catalog's version
    pub fn to_descriptors(&self) -> Result<Vec<MessageDescriptor>> {
        self.messages
            .iter()
            .map(|spec| {
                let key = DescriptorKey::new(spec.direction, spec.category, self.version);
                MessageDescriptor::new(key, spec.name.clone(), to_fields(&spec.fields)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const CATALOG: &str = r#"{
        "version": 763,
        "messages": [
            {
                "name": "SetSlot",
                "direction": "inbound",
                "category": 42,
                "fields": [
                    { "name": "slot", "kind": { "type": "i16" } },
                    { "name": "hand", "kind": { "type": "enum", "name": "Hand", "variants": ["MAIN", "OFF"] } },
                    { "name": "item", "kind": { "type": "composite", "name": "Item", "fields": [
                        { "name": "id", "kind": { "type": "varint" } }
                    ] } },
                    { "name": "lore", "kind": { "type": "list", "element": { "type": "string" } }, "optional": true }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_json_catalog_to_descriptors() {
        let catalog = SchemaCatalog::from_json(CATALOG).unwrap();
        let descriptors = catalog.to_descriptors().unwrap();
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.version(), SchemaVersion(763));
        assert_eq!(d.category(), CategoryId(42));
        assert_eq!(d.fields().len(), 4);
        assert!(d.fields()[3].optional);
        assert_eq!(d.fields()[2].kind.to_string(), "composite Item");
    }

    #[test]
    fn test_toml_catalog() {
        let toml_src = r#"
            version = 5

            [[messages]]
            name = "SetCoins"
            direction = "outbound"
            category = 7

            [[messages.fields]]
            name = "amount"
            kind = { type = "i32" }
        "#;
        let catalog = SchemaCatalog::from_toml(toml_src).unwrap();
        assert_eq!(catalog.messages[0].fields[0].kind, KindSpec::I32);
    }

    #[test]
    fn test_invalid_catalog_rejected() {
        assert!(SchemaCatalog::from_json("{ not json").is_err());
        let bad = r#"{ "version": 1, "messages": [ { "name": "E", "direction": "inbound", "category": 1,
            "fields": [ { "name": "e", "kind": { "type": "enum", "name": "Empty", "variants": [] } } ] } ] }"#;
        let catalog = SchemaCatalog::from_json(bad).unwrap();
        assert!(matches!(
            catalog.to_descriptors(),
            Err(InterceptError::InvalidSchema(_))
        ));
    }
}
