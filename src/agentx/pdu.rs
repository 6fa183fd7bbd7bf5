//! AgentX PDU header and bodies (RFC 2741 §5, numeric tags and field layout per the wire
//! contract this subagent implements).

use super::encodings::{
    decode_search_range_list, decode_varbind_list, encode_search_range_list,
    encode_varbind_list, SearchRangeList, VarBindList, ID,
};
use crate::oid::{
    decode_octet_string, encode_octet_string, push_u32, read_u32, WireOid,
};
use anyhow::{anyhow, Result};
use std::convert::TryFrom;

pub const HEADER_LEN: usize = 20;
pub const VERSION: u8 = 1;

pub mod flags {
    pub const INSTANCE_REGISTRATION: u8 = 0x01;
    pub const NEW_INDEX: u8 = 0x02;
    pub const ANY_INDEX: u8 = 0x04;
    pub const NON_DEFAULT_CONTEXT: u8 = 0x08;
    pub const NETWORK_BYTE_ORDER: u8 = 0x10;
}

pub mod error {
    pub const NO_ERROR: u16 = 0;
    pub const GEN_ERR: u16 = 5;
    pub const NOT_WRITABLE: u16 = 17;
    pub const PARSE_ERROR: u16 = 19;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Open = 1,
    Close = 2,
    Register = 3,
    Unregister = 4,
    Get = 6,
    GetNext = 7,
    GetBulk = 8,
    TestSet = 9,
    CommitSet = 10,
    UndoSet = 11,
    CleanupSet = 12,
    Ping = 13,
    Response = 18,
}

impl TryFrom<u8> for Type {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Type::Open,
            2 => Type::Close,
            3 => Type::Register,
            4 => Type::Unregister,
            6 => Type::Get,
            7 => Type::GetNext,
            8 => Type::GetBulk,
            9 => Type::TestSet,
            10 => Type::CommitSet,
            11 => Type::UndoSet,
            12 => Type::CleanupSet,
            13 => Type::Ping,
            18 => Type::Response,
            other => return Err(anyhow!("unknown PDU type tag {}", other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub ty: u8,
    pub flags: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl Header {
    pub fn new(ty: Type) -> Self {
        Header {
            version: VERSION,
            ty: ty as u8,
            flags: flags::NETWORK_BYTE_ORDER,
            session_id: 0,
            transaction_id: 0,
            packet_id: 0,
            payload_length: 0,
        }
    }

    pub fn big_endian(&self) -> bool {
        self.flags & flags::NETWORK_BYTE_ORDER != 0
    }

    pub fn pdu_type(&self) -> Result<Type> {
        Type::try_from(self.ty)
    }

    /// Decodes the fixed 20-byte header. A version mismatch or unknown type is a malformed
    /// header, which the caller must treat as fatal (close the connection), not answer with a
    /// `parseError` response.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(anyhow!("header: need {} bytes, got {}", HEADER_LEN, buf.len()));
        }
        let version = buf[0];
        if version != VERSION {
            return Err(anyhow!("header: unsupported version {}", version));
        }
        let ty = buf[1];
        Type::try_from(ty)?;
        let flags = buf[2];
        let big_endian = flags & self::flags::NETWORK_BYTE_ORDER != 0;
        Ok(Header {
            version,
            ty,
            flags,
            session_id: read_u32(&buf[4..8], big_endian),
            transaction_id: read_u32(&buf[8..12], big_endian),
            packet_id: read_u32(&buf[12..16], big_endian),
            payload_length: read_u32(&buf[16..20], big_endian),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let big_endian = self.big_endian();
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.push(self.version);
        out.push(self.ty);
        out.push(self.flags);
        out.push(0); // reserved
        push_u32(&mut out, self.session_id, big_endian);
        push_u32(&mut out, self.transaction_id, big_endian);
        push_u32(&mut out, self.packet_id, big_endian);
        push_u32(&mut out, self.payload_length, big_endian);
        out
    }
}

fn finish(mut header: Header, body: Vec<u8>) -> Vec<u8> {
    header.payload_length = body.len() as u32;
    let mut out = header.to_bytes();
    out.extend(body);
    out
}

fn body_of<'a>(header: &Header, buf: &'a [u8]) -> Result<&'a [u8]> {
    let need = HEADER_LEN + header.payload_length as usize;
    if buf.len() < need {
        return Err(anyhow!(
            "body: need {} bytes total, got {}",
            need,
            buf.len()
        ));
    }
    Ok(&buf[HEADER_LEN..need])
}

#[derive(Debug, Clone)]
pub struct Open {
    pub header: Header,
    pub timeout: std::time::Duration,
    pub id: ID,
    pub descr: String,
}

impl Open {
    pub fn new(id: ID, descr: impl Into<String>) -> Self {
        Open {
            header: Header::new(Type::Open),
            timeout: std::time::Duration::from_secs(5),
            id,
            descr: descr.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let mut body = Vec::new();
        body.push(self.timeout.as_secs().min(255) as u8);
        body.extend_from_slice(&[0, 0, 0]);
        body.extend(WireOid::new(self.id.as_slice().to_vec(), false).encode(big_endian));
        body.extend(encode_octet_string(self.descr.as_bytes(), big_endian));
        Ok(finish(self.header.clone(), body))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        if body.len() < 4 {
            return Err(anyhow!("open: truncated"));
        }
        let timeout = std::time::Duration::from_secs(body[0] as u64);
        let mut off = 4;
        let (wire, used) =
            WireOid::decode(&body[off..], big_endian).ok_or_else(|| anyhow!("open: truncated oid"))?;
        off += used;
        let (descr, _) =
            decode_octet_string(&body[off..], big_endian).ok_or_else(|| anyhow!("open: truncated descr"))?;
        Ok(Open {
            header,
            timeout,
            id: wire.to_oid(),
            descr: String::from_utf8_lossy(&descr).into_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Close {
    pub header: Header,
    pub reason: u8,
}

impl Close {
    pub fn new(reason: u8) -> Self {
        Close {
            header: Header::new(Type::Close),
            reason,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = vec![self.reason, 0, 0, 0];
        Ok(finish(self.header.clone(), body))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        if body.is_empty() {
            return Err(anyhow!("close: truncated"));
        }
        Ok(Close {
            reason: body[0],
            header,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Register {
    pub header: Header,
    pub timeout: std::time::Duration,
    pub priority: u8,
    pub range_subid: u8,
    pub subtree: ID,
    pub upper_bound: Option<u32>,
}

impl Register {
    pub fn new(subtree: ID) -> Self {
        Register {
            header: Header::new(Type::Register),
            timeout: std::time::Duration::from_secs(0),
            priority: 127,
            range_subid: 0,
            subtree,
            upper_bound: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let mut body = Vec::new();
        body.push(self.timeout.as_secs().min(255) as u8);
        body.push(self.priority);
        body.push(self.range_subid);
        body.push(0); // reserved
        body.extend(WireOid::new(self.subtree.as_slice().to_vec(), false).encode(big_endian));
        if self.range_subid != 0 {
            push_u32(&mut body, self.upper_bound.unwrap_or(0), big_endian);
        }
        Ok(finish(self.header.clone(), body))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        if body.len() < 4 {
            return Err(anyhow!("register: truncated"));
        }
        let timeout = std::time::Duration::from_secs(body[0] as u64);
        let priority = body[1];
        let range_subid = body[2];
        let mut off = 4;
        let (wire, used) = WireOid::decode(&body[off..], big_endian)
            .ok_or_else(|| anyhow!("register: truncated subtree"))?;
        off += used;
        let upper_bound = if range_subid != 0 {
            if body.len() < off + 4 {
                return Err(anyhow!("register: truncated upper_bound"));
            }
            Some(read_u32(&body[off..off + 4], big_endian))
        } else {
            None
        };
        Ok(Register {
            header,
            timeout,
            priority,
            range_subid,
            subtree: wire.to_oid(),
            upper_bound,
        })
    }
}

pub type Unregister = Register;

#[derive(Debug, Clone)]
pub struct Get {
    pub header: Header,
    pub oids: Vec<ID>,
}

impl Get {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        let mut oids = Vec::new();
        let mut off = 0;
        while off < body.len() {
            let (wire, used) = WireOid::decode(&body[off..], big_endian)
                .ok_or_else(|| anyhow!("get: truncated oid list"))?;
            oids.push(wire.to_oid());
            off += used;
        }
        Ok(Get { header, oids })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let mut body = Vec::new();
        for oid in &self.oids {
            body.extend(WireOid::new(oid.as_slice().to_vec(), false).encode(big_endian));
        }
        Ok(finish(self.header.clone(), body))
    }
}

#[derive(Debug, Clone)]
pub struct GetNext {
    pub header: Header,
    pub sr: SearchRangeList,
}

impl GetNext {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        let sr = decode_search_range_list(body, big_endian)?;
        Ok(GetNext { header, sr })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let body = encode_search_range_list(&self.sr, big_endian);
        Ok(finish(self.header.clone(), body))
    }
}

#[derive(Debug, Clone)]
pub struct GetBulk {
    pub header: Header,
    pub non_repeaters: u16,
    pub max_repetitions: u16,
    pub sr: SearchRangeList,
}

impl GetBulk {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        if body.len() < 4 {
            return Err(anyhow!("getbulk: truncated"));
        }
        let (non_repeaters, max_repetitions) = if big_endian {
            (
                u16::from_be_bytes([body[0], body[1]]),
                u16::from_be_bytes([body[2], body[3]]),
            )
        } else {
            (
                u16::from_le_bytes([body[0], body[1]]),
                u16::from_le_bytes([body[2], body[3]]),
            )
        };
        let sr = decode_search_range_list(&body[4..], big_endian)?;
        Ok(GetBulk {
            header,
            non_repeaters,
            max_repetitions,
            sr,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let mut body = Vec::new();
        if big_endian {
            body.extend_from_slice(&self.non_repeaters.to_be_bytes());
            body.extend_from_slice(&self.max_repetitions.to_be_bytes());
        } else {
            body.extend_from_slice(&self.non_repeaters.to_le_bytes());
            body.extend_from_slice(&self.max_repetitions.to_le_bytes());
        }
        body.extend(encode_search_range_list(&self.sr, big_endian));
        Ok(finish(self.header.clone(), body))
    }
}

/// `TestSet`/`CommitSet`/`UndoSet`/`CleanupSet` share one shape: the core never implements
/// writes, so only enough of the body is parsed to find its extent; the dispatcher answers
/// every one of them with `notWritable` and no side effects.
#[derive(Debug, Clone)]
pub struct SetPdu {
    pub header: Header,
}

impl SetPdu {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        body_of(&header, buf)?;
        Ok(SetPdu { header })
    }
}

#[derive(Debug, Clone)]
pub struct Ping {
    pub header: Header,
}

impl Ping {
    pub fn new() -> Self {
        Ping {
            header: Header::new(Type::Ping),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(finish(self.header.clone(), Vec::new()))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        body_of(&header, buf)?;
        Ok(Ping { header })
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub header: Header,
    pub sys_up_time: u32,
    pub error: u16,
    pub index: u16,
    pub vb: Option<VarBindList>,
}

impl Response {
    pub fn from_header(req: &Header) -> Self {
        let mut header = Header::new(Type::Response);
        header.flags = req.flags;
        header.session_id = req.session_id;
        header.transaction_id = req.transaction_id;
        header.packet_id = req.packet_id;
        Response {
            header,
            sys_up_time: 0,
            error: error::NO_ERROR,
            index: 0,
            vb: None,
        }
    }

    pub fn parse_error(req: &Header) -> Self {
        let mut r = Response::from_header(req);
        r.error = error::PARSE_ERROR;
        r
    }

    pub fn not_writable(req: &Header) -> Self {
        let mut r = Response::from_header(req);
        r.error = error::NOT_WRITABLE;
        r
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let big_endian = self.header.big_endian();
        let mut body = Vec::new();
        push_u32(&mut body, self.sys_up_time, big_endian);
        if big_endian {
            body.extend_from_slice(&self.error.to_be_bytes());
            body.extend_from_slice(&self.index.to_be_bytes());
        } else {
            body.extend_from_slice(&self.error.to_le_bytes());
            body.extend_from_slice(&self.index.to_le_bytes());
        }
        if let Some(vb) = &self.vb {
            body.extend(encode_varbind_list(vb, big_endian));
        }
        Ok(finish(self.header.clone(), body))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(buf)?;
        let body = body_of(&header, buf)?;
        let big_endian = header.big_endian();
        if body.len() < 8 {
            return Err(anyhow!("response: truncated"));
        }
        let sys_up_time = read_u32(&body[0..4], big_endian);
        let (error, index) = if big_endian {
            (
                u16::from_be_bytes([body[4], body[5]]),
                u16::from_be_bytes([body[6], body[7]]),
            )
        } else {
            (
                u16::from_le_bytes([body[4], body[5]]),
                u16::from_le_bytes([body[6], body[7]]),
            )
        };
        let vb = if body.len() > 8 {
            Some(decode_varbind_list(&body[8..], big_endian)?)
        } else {
            None
        };
        Ok(Response {
            header,
            sys_up_time,
            error,
            index,
            vb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn oid(v: &[u32]) -> ID {
        ID::new(v.to_vec())
    }

    #[test]
    fn open_round_trip() {
        let mut open = Open::new(oid(&[1, 3, 6, 1, 4, 1, 99999]), "test subagent");
        open.header.session_id = 0;
        let bytes = open.to_bytes().unwrap();
        let decoded = Open::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.id, open.id);
        assert_eq!(decoded.descr, open.descr);
    }

    #[test]
    fn register_round_trip_with_upper_bound() {
        let mut reg = Register::new(oid(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 1]));
        reg.range_subid = 1;
        reg.upper_bound = Some(10);
        let bytes = reg.to_bytes().unwrap();
        let decoded = Register::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.subtree, reg.subtree);
        assert_eq!(decoded.upper_bound, Some(10));
    }

    #[test]
    fn get_round_trip() {
        let mut get = Get {
            header: Header::new(Type::Get),
            oids: vec![oid(&[1, 3, 6, 1, 2, 1, 1, 1, 0]), oid(&[1, 2, 3])],
        };
        get.header.packet_id = 42;
        let bytes = get.to_bytes().unwrap();
        let decoded = Get::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.oids, get.oids);
        assert_eq!(decoded.header.packet_id, 42);
    }

    #[test]
    fn response_round_trip_with_varbinds() {
        let req = Header::new(Type::Get);
        let mut resp = Response::from_header(&req);
        resp.vb = Some(vec![crate::agentx::encodings::VarBind::new(
            oid(&[1, 2]),
            Value::Integer(7),
        )]);
        let bytes = resp.to_bytes().unwrap();
        let decoded = Response::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.vb, resp.vb);
        assert_eq!(decoded.error, error::NO_ERROR);
    }

    #[test]
    fn getnext_round_trip_with_search_ranges() {
        let get_next = GetNext {
            header: Header::new(Type::GetNext),
            sr: vec![
                crate::agentx::encodings::SearchRange {
                    start: oid(&[1, 3, 6, 1, 2, 1, 2, 2, 1]),
                    start_include: false,
                    end: oid(&[1, 3, 6, 1, 2, 1, 2, 3]),
                },
                crate::agentx::encodings::SearchRange {
                    start: oid(&[1, 2]),
                    start_include: true,
                    end: ID::new(vec![]),
                },
            ],
        };
        let bytes = get_next.to_bytes().unwrap();
        let decoded = GetNext::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.sr, get_next.sr);
    }

    #[test]
    fn getbulk_round_trip_preserves_repeat_counts() {
        let bulk = GetBulk {
            header: Header::new(Type::GetBulk),
            non_repeaters: 1,
            max_repetitions: 3,
            sr: vec![crate::agentx::encodings::SearchRange {
                start: oid(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 3]),
                start_include: false,
                end: ID::new(vec![]),
            }],
        };
        let bytes = bulk.to_bytes().unwrap();
        let decoded = GetBulk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.non_repeaters, 1);
        assert_eq!(decoded.max_repetitions, 3);
        assert_eq!(decoded.sr, bulk.sr);
    }

    #[test]
    fn close_round_trip_preserves_reason() {
        let close = Close::new(3);
        let bytes = close.to_bytes().unwrap();
        let decoded = Close::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.reason, 3);
    }

    #[test]
    fn ping_round_trip_is_header_only() {
        let mut ping = Ping::new();
        ping.header.session_id = 5;
        let bytes = ping.to_bytes().unwrap();
        let decoded = Ping::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.header.session_id, 5);
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = 2; // bad version
        assert!(Header::from_bytes(&buf).is_err());
    }

    #[test]
    fn truncated_body_produces_decode_error_not_panic() {
        let get = Get {
            header: Header::new(Type::Get),
            oids: vec![oid(&[1, 3, 6, 1, 2, 1, 1, 1, 0])],
        };
        let mut bytes = get.to_bytes().unwrap();
        bytes.truncate(bytes.len() - 2); // chop the last OID short
        assert!(Get::from_bytes(&bytes).is_err());
    }
}
