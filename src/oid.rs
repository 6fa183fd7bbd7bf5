//! Object identifiers: the ordered-tuple type, textual parsing and the AgentX wire form.

use std::convert::TryFrom;
use std::fmt;

/// Internet prefix `1.3.6.1` every bare (no leading dot) textual OID is relative to.
pub const INTERNET_PREFIX: [u32; 4] = [1, 3, 6, 1];

/// An ordered tuple of sub-identifiers. Canonical ordering is lexicographic over the tuple,
/// which `Ord`/`PartialOrd` give us for free from `Vec<u32>`'s own lexicographic impl.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(pub Vec<u32>);

impl Oid {
    pub fn new(subids: Vec<u32>) -> Self {
        Oid(subids)
    }

    pub fn root() -> Self {
        Oid(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// `self` is a prefix of `other` (including `self == other`).
    pub fn is_prefix_of(&self, other: &Oid) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Returns a new OID with `extra` appended.
    pub fn child(&self, extra: &[u32]) -> Oid {
        let mut v = self.0.clone();
        v.extend_from_slice(extra);
        Oid(v)
    }

    /// Lexicographically-next OID with the same length, used only where a synthetic
    /// "just past this one" sentinel is needed (e.g. an empty range upper bound).
    pub fn successor_sentinel(&self) -> Oid {
        let mut v = self.0.clone();
        v.push(0);
        Oid(v)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl From<Vec<u32>> for Oid {
    fn from(v: Vec<u32>) -> Self {
        Oid(v)
    }
}

impl TryFrom<&[u32]> for Oid {
    type Error = std::convert::Infallible;

    fn try_from(v: &[u32]) -> Result<Self, Self::Error> {
        Ok(Oid(v.to_vec()))
    }
}

/// `pad4(n) = (-n) mod 4`: how many zero bytes must follow an `n`-byte octet string so the
/// total length is a multiple of 4.
pub fn pad4(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

/// Parses a textual OID into its tuple form.
///
/// A leading dot means the textual form is taken literally; without one, the internet prefix
/// `1.3.6.1` is prepended. `""` parses to the empty tuple. A trailing dot, or any empty group
/// other than the leading one, is invalid.
pub fn oid2tuple(text: &str, implicit_prefix: bool) -> Option<Vec<u32>> {
    if text.is_empty() {
        return Some(Vec::new());
    }

    let (body, had_leading_dot) = if let Some(rest) = text.strip_prefix('.') {
        (rest, true)
    } else {
        (text, false)
    };

    if body.is_empty() {
        // ".": a leading dot with nothing after it.
        return None;
    }
    if body.ends_with('.') {
        return None;
    }

    let mut subids = Vec::new();
    for group in body.split('.') {
        if group.is_empty() {
            return None;
        }
        let v: u32 = group.parse().ok()?;
        subids.push(v);
    }

    if !had_leading_dot && implicit_prefix {
        let mut full = INTERNET_PREFIX.to_vec();
        full.extend(subids);
        Some(full)
    } else {
        Some(subids)
    }
}

/// Validates a textual OID the same way `oid2tuple` would parse it, without building the tuple.
pub fn is_valid_oid(text: &str) -> bool {
    oid2tuple(text, false).is_some()
}

/// Wire form of an OID as it appears embedded in AgentX PDUs (RFC 2741 §5.1).
///
/// `prefix_byte != 0` is shorthand for the five-element prefix `1.3.6.1.prefix_byte`, saving
/// four bytes per OID for the overwhelmingly common "internet" subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireOid {
    pub include: bool,
    pub subids: Vec<u32>,
}

impl WireOid {
    pub fn new(subids: Vec<u32>, include: bool) -> Self {
        WireOid { include, subids }
    }

    /// Expands the `prefix_byte` shorthand, if any, into the full tuple.
    pub fn to_oid(&self) -> Oid {
        Oid(self.subids.clone())
    }

    /// Picks the most compact wire representation: `prefix_byte = subids[4]` when the OID
    /// starts with the internet prefix and has at least one sub-id after it, `0` otherwise.
    fn prefix_byte_and_rest(subids: &[u32]) -> (u8, &[u32]) {
        if subids.len() >= 5 && subids[..4] == INTERNET_PREFIX && subids[4] <= u32::from(u8::MAX) {
            (subids[4] as u8, &subids[5..])
        } else {
            (0, subids)
        }
    }

    pub fn encode(&self, big_endian: bool) -> Vec<u8> {
        let (prefix_byte, rest) = Self::prefix_byte_and_rest(&self.subids);
        let mut out = Vec::with_capacity(4 + rest.len() * 4);
        out.push(rest.len() as u8);
        out.push(prefix_byte);
        out.push(if self.include { 1 } else { 0 });
        out.push(0); // reserved
        for s in rest {
            push_u32(&mut out, *s, big_endian);
        }
        out
    }

    pub fn decode(buf: &[u8], big_endian: bool) -> Option<(Self, usize)> {
        if buf.len() < 4 {
            return None;
        }
        let n_subids = buf[0] as usize;
        let prefix_byte = buf[1];
        let include = buf[2] != 0;
        let needed = 4 + n_subids * 4;
        if buf.len() < needed {
            return None;
        }
        let mut subids = Vec::with_capacity(n_subids + 5);
        if prefix_byte != 0 {
            subids.extend_from_slice(&INTERNET_PREFIX);
            subids.push(prefix_byte as u32);
        }
        for i in 0..n_subids {
            let off = 4 + i * 4;
            subids.push(read_u32(&buf[off..off + 4], big_endian));
        }
        Some((WireOid { include, subids }, needed))
    }
}

pub fn push_u32(out: &mut Vec<u8>, v: u32, big_endian: bool) {
    if big_endian {
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn push_u64(out: &mut Vec<u8>, v: u64, big_endian: bool) {
    if big_endian {
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub fn read_u32(buf: &[u8], big_endian: bool) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&buf[..4]);
    if big_endian {
        u32::from_be_bytes(a)
    } else {
        u32::from_le_bytes(a)
    }
}

pub fn read_u64(buf: &[u8], big_endian: bool) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&buf[..8]);
    if big_endian {
        u64::from_be_bytes(a)
    } else {
        u64::from_le_bytes(a)
    }
}

/// Encodes an octet string: 4-byte length, bytes, then zero padding to a multiple of 4.
pub fn encode_octet_string(bytes: &[u8], big_endian: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + bytes.len() + pad4(bytes.len()));
    push_u32(&mut out, bytes.len() as u32, big_endian);
    out.extend_from_slice(bytes);
    out.extend(std::iter::repeat(0u8).take(pad4(bytes.len())));
    out
}

/// Decodes an octet string, returning the payload and the number of bytes consumed
/// (length field + payload + padding).
pub fn decode_octet_string(buf: &[u8], big_endian: bool) -> Option<(Vec<u8>, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let len = read_u32(&buf[..4], big_endian) as usize;
    let padded = pad4(len);
    let total = 4 + len + padded;
    if buf.len() < total {
        return None;
    }
    Some((buf[4..4 + len].to_vec(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad4_examples() {
        assert_eq!(pad4(9), 3);
        assert_eq!(pad4(20), 0);
        assert_eq!(pad4(0), 0);
        assert_eq!(pad4(1), 3);
        for n in 0..50 {
            assert_eq!((n + pad4(n)) % 4, 0);
            assert!(pad4(n) < 4);
        }
    }

    #[test]
    fn oid2tuple_boundary_cases() {
        assert_eq!(oid2tuple("", true), Some(vec![]));
        assert_eq!(oid2tuple(".", true), None);
        assert_eq!(
            oid2tuple("1.2.3.4", true),
            Some(vec![1, 3, 6, 1, 1, 2, 3, 4])
        );
        assert_eq!(oid2tuple("1.2.3.", true), None);
        assert_eq!(oid2tuple(".1.2.3.4", true), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn is_valid_oid_matches_oid2tuple() {
        assert!(is_valid_oid("1.2.3"));
        assert!(!is_valid_oid("1.2.3."));
        assert!(!is_valid_oid("."));
        assert!(is_valid_oid(""));
    }

    #[test]
    fn is_prefix_of() {
        let a = Oid::new(vec![1, 3, 6]);
        let b = Oid::new(vec![1, 3, 6, 1, 2]);
        assert!(a.is_prefix_of(&b));
        assert!(!b.is_prefix_of(&a));
        assert!(a.is_prefix_of(&a));
    }

    #[test]
    fn wire_oid_round_trip_with_prefix_byte() {
        let oid = WireOid::new(vec![1, 3, 6, 1, 2, 1, 2, 2, 1, 1], false);
        let bytes = oid.encode(true);
        let (decoded, consumed) = WireOid::decode(&bytes, true).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.to_oid(), oid.to_oid());
    }

    #[test]
    fn wire_oid_round_trip_without_prefix_byte() {
        let oid = WireOid::new(vec![1, 2, 3], true);
        let bytes = oid.encode(false);
        let (decoded, _) = WireOid::decode(&bytes, false).unwrap();
        assert_eq!(decoded.to_oid(), oid.to_oid());
        assert!(decoded.include);
    }

    #[test]
    fn octet_string_round_trip_including_empty() {
        for s in ["", "a", "abcd", "hello world"] {
            let enc = encode_octet_string(s.as_bytes(), true);
            let (dec, consumed) = decode_octet_string(&enc, true).unwrap();
            assert_eq!(consumed, enc.len());
            assert_eq!(dec, s.as_bytes());
            assert_eq!(enc.len() % 4, 0);
        }
    }
}
