//! The AgentX wire protocol: varbind/search-range encodings and PDU framing (RFC 2741).
//!
//! This is first-party code rather than a wrapper around an external crate: the OID and PDU
//! codec is the part of this subagent that must be owned outright (see DESIGN.md).

pub mod encodings;
pub mod pdu;
