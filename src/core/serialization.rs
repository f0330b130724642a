//! # Serialization Formats
//!
//! Export of intercepted packets for debugging and offline inspection.
//!
//! The engine itself never encodes wire bytes (that is the transport's job). What it can
//! serialize is a [`PacketSnapshot`]: the identity and decoded field values of a packet
//! at one point of its dispatch pass.
//!
//! ## Formats
//! - **Bincode**: compact binary, default
//! - **JSON**: human-readable, for logs and tooling
//!
//! ## Usage
//! ```ignore
//! use packet_intercept::core::serialization::{MultiFormat, SerializationFormat};
//!
//! let snapshot = container.snapshot();
//! let bytes = snapshot.serialize_with_header(SerializationFormat::Json)?;
//! let (restored, format) = PacketSnapshot::deserialize_with_header(&bytes)?;
//! ```

use crate::core::types::{CategoryId, ConnectionId, Direction, SchemaVersion};
use crate::core::value::FieldValue;
use crate::error::{InterceptError, Result};
use serde::{Deserialize, Serialize};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get the format identifier byte
    pub fn format_byte(self) -> u8 {
        match self {
            SerializationFormat::Bincode => 0x01,
            SerializationFormat::Json => 0x02,
        }
    }

    /// Detect format from identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationFormat::Bincode),
            0x02 => Some(SerializationFormat::Json),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
        }
    }
}

/// Trait for types that support multiple serialization formats
pub trait MultiFormat: Serialize + for<'de> Deserialize<'de> + Sized {
    /// Serialize to bytes using the specified format
    fn serialize_format(&self, format: SerializationFormat) -> Result<Vec<u8>> {
        match format {
            SerializationFormat::Bincode => {
                bincode::serialize(self).map_err(|e| InterceptError::SerializeError(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(self).map_err(|e| InterceptError::SerializeError(e.to_string()))
            }
        }
    }

    /// Serialize to bytes with format header
    fn serialize_with_header(&self, format: SerializationFormat) -> Result<Vec<u8>> {
        let mut data = vec![format.format_byte()];
        let mut payload = self.serialize_format(format)?;
        data.append(&mut payload);
        Ok(data)
    }

    /// Deserialize from bytes using the specified format
    fn deserialize_format(data: &[u8], format: SerializationFormat) -> Result<Self> {
        match format {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| InterceptError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| InterceptError::DeserializeError(e.to_string())),
        }
    }

    /// Deserialize from bytes with format header
    fn deserialize_with_header(data: &[u8]) -> Result<(Self, SerializationFormat)> {
        let (&first, rest) = data
            .split_first()
            .ok_or_else(|| InterceptError::DeserializeError("Empty data".to_string()))?;

        let format = SerializationFormat::from_byte(first).ok_or_else(|| {
            InterceptError::DeserializeError(format!("Unknown format byte: {first}"))
        })?;

        let value = Self::deserialize_format(rest, format)?;
        Ok((value, format))
    }
}

/// Point-in-time copy of an intercepted packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketSnapshot {
    pub connection: ConnectionId,
    pub direction: Direction,
    pub category: CategoryId,
    pub version: SchemaVersion,
    pub name: String,
    pub cancelled: bool,
    pub synthetic: bool,
    pub fields: Vec<FieldValue>,
}

impl MultiFormat for PacketSnapshot {}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    fn snapshot() -> PacketSnapshot {
        PacketSnapshot {
            connection: ConnectionId(3),
            direction: Direction::Outbound,
            category: CategoryId(0x2A),
            version: SchemaVersion(763),
            name: "SetSlot".into(),
            cancelled: false,
            synthetic: true,
            fields: vec![
                FieldValue::I16(36),
                FieldValue::Composite(vec![FieldValue::VarInt(1), FieldValue::Absent]),
                FieldValue::Bytes(vec![0, 255]),
            ],
        }
    }

    #[test]
    fn test_format_byte_roundtrip() {
        for format in &[SerializationFormat::Bincode, SerializationFormat::Json] {
            let byte = format.format_byte();
            let recovered = SerializationFormat::from_byte(byte).expect("valid format byte");
            assert_eq!(*format, recovered);
        }
        assert_eq!(SerializationFormat::from_byte(0x03), None);
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::Bincode);
    }

    #[test]
    fn test_snapshot_with_header() {
        let original = snapshot();
        for format in [SerializationFormat::Bincode, SerializationFormat::Json] {
            let bytes = original.serialize_with_header(format).expect("serialize");
            let (restored, detected) =
                PacketSnapshot::deserialize_with_header(&bytes).expect("deserialize");
            assert_eq!(detected, format);
            assert_eq!(restored, original);
        }
    }

    #[test]
    fn test_bad_header_rejected() {
        assert!(PacketSnapshot::deserialize_with_header(&[]).is_err());
        assert!(PacketSnapshot::deserialize_with_header(&[0x09, 1, 2]).is_err());
    }
}
