//! Wire encodings shared by several PDU bodies: OIDs-as-map-keys, typed values, varbinds and
//! search ranges (RFC 2741 §5.1-§5.4).

use crate::oid::{
    decode_octet_string, encode_octet_string, pad4, push_u32, push_u64, read_u32, read_u64, Oid,
    WireOid,
};
use crate::value::{Value, ValueKind};
use anyhow::{anyhow, Result};
use std::convert::TryFrom;

/// The OID type used as a MIB-tree / cache key. A thin, `Ord`-friendly alias over [`Oid`].
pub type ID = Oid;

impl ID {
    pub fn is_null(&self) -> bool {
        self.is_empty()
    }
}

impl TryFrom<Vec<u32>> for ID {
    type Error = std::convert::Infallible;

    fn try_from(v: Vec<u32>) -> std::result::Result<Self, Self::Error> {
        Ok(Oid::new(v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub name: ID,
    pub data: Value,
}

impl VarBind {
    pub fn new(name: ID, data: Value) -> Self {
        VarBind { name, data }
    }

    pub fn encode(&self, big_endian: bool) -> Vec<u8> {
        let mut out = Vec::new();
        // type(2) + reserved(2)
        let kind = self.data.kind() as u16;
        if big_endian {
            out.extend_from_slice(&kind.to_be_bytes());
        } else {
            out.extend_from_slice(&kind.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out.extend(WireOid::new(self.name.as_slice().to_vec(), false).encode(big_endian));
        out.extend(encode_value(&self.data, big_endian));
        out
    }

    pub fn decode(buf: &[u8], big_endian: bool) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(anyhow!("varbind: truncated header"));
        }
        let kind_raw = if big_endian {
            u16::from_be_bytes([buf[0], buf[1]])
        } else {
            u16::from_le_bytes([buf[0], buf[1]])
        };
        let mut off = 4;
        let (wire_oid, used) = WireOid::decode(&buf[off..], big_endian)
            .ok_or_else(|| anyhow!("varbind: truncated name"))?;
        off += used;
        let (data, used) = decode_value(kind_raw, &buf[off..], big_endian)?;
        off += used;
        Ok((
            VarBind {
                name: wire_oid.to_oid(),
                data,
            },
            off,
        ))
    }
}

pub type VarBindList = Vec<VarBind>;

pub fn encode_varbind_list(vbs: &[VarBind], big_endian: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for vb in vbs {
        out.extend(vb.encode(big_endian));
    }
    out
}

pub fn decode_varbind_list(buf: &[u8], big_endian: bool) -> Result<VarBindList> {
    let mut out = Vec::new();
    let mut off = 0;
    while off < buf.len() {
        let (vb, used) = VarBind::decode(&buf[off..], big_endian)?;
        out.push(vb);
        off += used;
    }
    Ok(out)
}

/// One `(start, end)` operand of a GetNext/GetBulk request. `start.include` marks the range as
/// inclusive of its own OID (RFC 2741 §5.2).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRange {
    pub start: ID,
    pub start_include: bool,
    pub end: ID,
}

pub type SearchRangeList = Vec<SearchRange>;

pub fn encode_search_range_list(ranges: &[SearchRange], big_endian: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for r in ranges {
        out.extend(WireOid::new(r.start.as_slice().to_vec(), r.start_include).encode(big_endian));
        out.extend(WireOid::new(r.end.as_slice().to_vec(), false).encode(big_endian));
    }
    out
}

pub fn decode_search_range_list(buf: &[u8], big_endian: bool) -> Result<SearchRangeList> {
    let mut out = Vec::new();
    let mut off = 0;
    while off < buf.len() {
        let (start, used) =
            WireOid::decode(&buf[off..], big_endian).ok_or_else(|| anyhow!("range: truncated start"))?;
        off += used;
        let (end, used) =
            WireOid::decode(&buf[off..], big_endian).ok_or_else(|| anyhow!("range: truncated end"))?;
        off += used;
        out.push(SearchRange {
            start: start.to_oid(),
            start_include: start.include,
            end: end.to_oid(),
        });
    }
    Ok(out)
}

fn encode_value(v: &Value, big_endian: bool) -> Vec<u8> {
    match v {
        Value::Integer(i) => {
            let mut out = Vec::new();
            push_u32(&mut out, *i as u32, big_endian);
            out
        }
        Value::Counter32(n) | Value::Gauge32(n) | Value::TimeTicks(n) => {
            let mut out = Vec::new();
            push_u32(&mut out, *n, big_endian);
            out
        }
        Value::Counter64(n) => {
            let mut out = Vec::new();
            push_u64(&mut out, *n, big_endian);
            out
        }
        Value::OctetString(s) | Value::Opaque(s) => encode_octet_string(s, big_endian),
        Value::IpAddress(a) => encode_octet_string(a, big_endian),
        Value::ObjectIdentifier(oid) => {
            WireOid::new(oid.as_slice().to_vec(), false).encode(big_endian)
        }
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {
            Vec::new()
        }
    }
}

fn decode_value(kind_raw: u16, buf: &[u8], big_endian: bool) -> Result<(Value, usize)> {
    let kind = kind_raw;
    match kind {
        k if k == ValueKind::Integer as u16 => {
            require(buf, 4)?;
            Ok((Value::Integer(read_u32(&buf[..4], big_endian) as i32), 4))
        }
        k if k == ValueKind::Counter32 as u16 => {
            require(buf, 4)?;
            Ok((Value::Counter32(read_u32(&buf[..4], big_endian)), 4))
        }
        k if k == ValueKind::Gauge32 as u16 => {
            require(buf, 4)?;
            Ok((Value::Gauge32(read_u32(&buf[..4], big_endian)), 4))
        }
        k if k == ValueKind::TimeTicks as u16 => {
            require(buf, 4)?;
            Ok((Value::TimeTicks(read_u32(&buf[..4], big_endian)), 4))
        }
        k if k == ValueKind::Counter64 as u16 => {
            require(buf, 8)?;
            Ok((Value::Counter64(read_u64(&buf[..8], big_endian)), 8))
        }
        k if k == ValueKind::OctetString as u16 => {
            let (bytes, used) =
                decode_octet_string(buf, big_endian).ok_or_else(|| anyhow!("octet string: truncated"))?;
            Ok((Value::OctetString(bytes), used))
        }
        k if k == ValueKind::Opaque as u16 => {
            let (bytes, used) =
                decode_octet_string(buf, big_endian).ok_or_else(|| anyhow!("opaque: truncated"))?;
            Ok((Value::Opaque(bytes), used))
        }
        k if k == ValueKind::IpAddress as u16 => {
            let (bytes, used) =
                decode_octet_string(buf, big_endian).ok_or_else(|| anyhow!("ipaddress: truncated"))?;
            let mut a = [0u8; 4];
            let n = bytes.len().min(4);
            a[..n].copy_from_slice(&bytes[..n]);
            Ok((Value::IpAddress(a), used))
        }
        k if k == ValueKind::ObjectIdentifier as u16 => {
            let (wire, used) =
                WireOid::decode(buf, big_endian).ok_or_else(|| anyhow!("oid value: truncated"))?;
            Ok((Value::ObjectIdentifier(wire.to_oid()), used))
        }
        k if k == ValueKind::Null as u16 => Ok((Value::Null, 0)),
        k if k == ValueKind::NoSuchObject as u16 => Ok((Value::NoSuchObject, 0)),
        k if k == ValueKind::NoSuchInstance as u16 => Ok((Value::NoSuchInstance, 0)),
        k if k == ValueKind::EndOfMibView as u16 => Ok((Value::EndOfMibView, 0)),
        other => Err(anyhow!("unknown value type tag {}", other)),
    }
}

fn require(buf: &[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        Err(anyhow!("buffer too short: need {} have {}", n, buf.len()))
    } else {
        Ok(())
    }
}

/// `(-n) mod 4`, re-exported here for call sites that only import `encodings::*`.
pub fn pad4_of(n: usize) -> usize {
    pad4(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varbind_round_trip_octet_string() {
        let vb = VarBind::new(Oid::new(vec![1, 2, 3]), Value::octet_string("hello"));
        let bytes = vb.encode(true);
        let (decoded, used) = VarBind::decode(&bytes, true).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, vb);
    }

    #[test]
    fn varbind_round_trip_counter64() {
        let vb = VarBind::new(Oid::new(vec![1]), Value::Counter64(u64::MAX));
        let bytes = vb.encode(false);
        let (decoded, _) = VarBind::decode(&bytes, false).unwrap();
        assert_eq!(decoded, vb);
    }

    #[test]
    fn search_range_round_trip() {
        let ranges = vec![SearchRange {
            start: Oid::new(vec![1, 3, 6, 1, 2, 1, 2, 2, 1]),
            start_include: false,
            end: Oid::new(vec![]),
        }];
        let bytes = encode_search_range_list(&ranges, true);
        let decoded = decode_search_range_list(&bytes, true).unwrap();
        assert_eq!(decoded, ranges);
    }
}
