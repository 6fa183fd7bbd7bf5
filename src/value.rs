//! The typed value carried by a varbind, independent of its wire encoding.

use crate::oid::Oid;

/// AgentX/SNMP PDU type tags used on the wire (RFC 2741 §5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueKind {
    Integer = 2,
    OctetString = 4,
    Null = 5,
    ObjectIdentifier = 6,
    IpAddress = 64,
    Counter32 = 65,
    Gauge32 = 66,
    TimeTicks = 67,
    Opaque = 68,
    Counter64 = 70,
    NoSuchObject = 128,
    NoSuchInstance = 129,
    EndOfMibView = 130,
}

/// Clamp for a 32-bit gauge: saturates at `2^32 - 1` rather than wrapping.
pub fn clamp_gauge32(v: u64) -> u32 {
    if v > u32::MAX as u64 {
        u32::MAX
    } else {
        v as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::OctetString(_) => ValueKind::OctetString,
            Value::Null => ValueKind::Null,
            Value::ObjectIdentifier(_) => ValueKind::ObjectIdentifier,
            Value::IpAddress(_) => ValueKind::IpAddress,
            Value::Counter32(_) => ValueKind::Counter32,
            Value::Gauge32(_) => ValueKind::Gauge32,
            Value::TimeTicks(_) => ValueKind::TimeTicks,
            Value::Opaque(_) => ValueKind::Opaque,
            Value::Counter64(_) => ValueKind::Counter64,
            Value::NoSuchObject => ValueKind::NoSuchObject,
            Value::NoSuchInstance => ValueKind::NoSuchInstance,
            Value::EndOfMibView => ValueKind::EndOfMibView,
        }
    }

    pub fn octet_string(s: impl Into<String>) -> Self {
        Value::OctetString(s.into().into_bytes())
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge32_clamps() {
        assert_eq!(clamp_gauge32(10), 10);
        assert_eq!(clamp_gauge32(u32::MAX as u64), u32::MAX);
        assert_eq!(clamp_gauge32(u32::MAX as u64 + 100), u32::MAX);
    }

    #[test]
    fn exception_values() {
        assert!(Value::NoSuchObject.is_exception());
        assert!(Value::EndOfMibView.is_exception());
        assert!(!Value::Integer(1).is_exception());
    }
}
