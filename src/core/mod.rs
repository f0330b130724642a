//! # Core Schema Components
//!
//! Message type registry, descriptors and the structure modifier.
//!
//! This module knows nothing about connections or listeners. It describes what a message
//! looks like for a given schema version and how to read and write its fields.
//!
//! ## Components
//! - **Types**: direction, category, schema version and connection identifiers
//! - **Descriptor**: immutable per-version message layouts
//! - **Value / Instance**: decoded field values bound to one descriptor
//! - **Modifier**: path-based and typed field access, deep clone
//! - **Registry**: lock-free lookup of published descriptors
//! - **Catalog**: serde form of a schema version (JSON/TOML)
//! - **Serialization**: packet snapshot export
//!
//! ## Layout
//! ```text
//! (direction, category, version) -> MessageDescriptor -> [FieldDescriptor...]
//!                                                          |- kind (i32, enum, composite, list...)
//!                                                          '- optional
//! ```

pub mod catalog;
pub mod descriptor;
pub mod instance;
pub mod modifier;
pub mod registry;
pub mod serialization;
pub mod types;
pub mod value;
