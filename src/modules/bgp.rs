//! `bgpPeerTable`: fed not from a DB table but from a line-oriented CLI
//! transcript against the routing daemon's `vtysh`-style console, the way the original collector
//! talked to Quagga/FRRouting over a local socket.

use crate::error::{AgentError, Result};
use crate::mib::scheduler::Updater;
use crate::mib::{Column, Entry, IndexedCache};
use crate::oid::Oid;
use crate::value::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;

pub const BGP_PEER_TABLE: [u32; 9] = [1, 3, 6, 1, 2, 1, 15, 3, 1, 0];

fn peer_col(col: u32) -> Oid {
    let mut v = BGP_PEER_TABLE[..8].to_vec();
    v.push(col);
    Oid::new(v)
}

/// RFC 4273 `bgpPeerState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Idle = 1,
    Connect = 2,
    Active = 3,
    OpenSent = 4,
    OpenConfirm = 5,
    Established = 6,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub addr: PeerAddr,
    pub remote_as: u32,
    pub state: PeerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

fn sub_id(addr: &PeerAddr) -> Vec<u32> {
    match addr {
        PeerAddr::V4(o) => {
            let mut v = vec![1, 4];
            v.extend(o.iter().map(|b| *b as u32));
            v
        }
        PeerAddr::V6(o) => {
            let mut v = vec![2, 16];
            v.extend(o.iter().map(|b| *b as u32));
            v
        }
    }
}

/// Maps a state word from `show ip bgp summary` output to the RFC 4273 FSM state. A column of
/// digits (the established-prefix count Quagga/FRR print in place of a state word) always means
/// `Established`.
fn parse_state(word: &str) -> Option<PeerState> {
    if word.chars().all(|c| c.is_ascii_digit()) && !word.is_empty() {
        return Some(PeerState::Established);
    }
    match word {
        "Idle" | "Idle(Admin)" | "Idle (Admin)" => Some(PeerState::Idle),
        "Connect" => Some(PeerState::Connect),
        "Active" => Some(PeerState::Active),
        "OpenSent" => Some(PeerState::OpenSent),
        "OpenConfirm" => Some(PeerState::OpenConfirm),
        _ => None,
    }
}

fn parse_peer_addr(token: &str) -> Option<PeerAddr> {
    let token = token.strip_prefix('*').unwrap_or(token);
    if let Some(v4) = parse_ipv4(token) {
        return Some(PeerAddr::V4(v4));
    }
    parse_ipv6(token).map(PeerAddr::V6)
}

fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = s.split('.');
    for slot in out.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn parse_ipv6(s: &str) -> Option<[u8; 16]> {
    let ip: std::net::Ipv6Addr = s.parse().ok()?;
    Some(ip.octets())
}

/// Which routing daemon the CLI banner belongs to; only changes the prompt regex used to detect
/// end-of-output, the summary table format itself is shared. Per the open-question resolution in
/// DESIGN.md, a banner that matches neither known daemon is an error, not a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemon {
    Quagga,
    FrrRouting,
}

pub fn detect_daemon(banner: &str) -> Option<Daemon> {
    let lower = banner.to_lowercase();
    if lower.contains("frrouting") || lower.contains("frr") {
        Some(Daemon::FrrRouting)
    } else if lower.contains("quagga") {
        Some(Daemon::Quagga)
    } else {
        None
    }
}

/// Parses the body of `show ip bgp summary` (and its `show bgp ipv6 summary` counterpart): a
/// header line followed by one row per peer, whitespace-separated, third column remote-AS,
/// last column state-or-prefix-count.
pub fn parse_summary(body: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    for line in body.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        let addr = match parse_peer_addr(fields[0]) {
            Some(a) => a,
            None => continue,
        };
        let remote_as: u32 = match fields[2].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        // "Idle (Admin)" is two whitespace-separated tokens; try that combined form before
        // falling back to the single trailing token.
        let last = fields[fields.len() - 1];
        let state = if fields.len() >= 2 && last.eq_ignore_ascii_case("(admin)") {
            parse_state(&format!("{} {}", fields[fields.len() - 2], last))
        } else {
            None
        }
        .or_else(|| parse_state(last));
        let state = match state {
            Some(s) => s,
            None => continue,
        };
        rows.push(Row { addr, remote_as, state });
    }
    rows
}

/// A CLI session over a local TCP port to the routing daemon's management console. Kept
/// minimal: one command per call, reading until the daemon's own prompt reappears.
pub struct CliSession {
    stream: TcpStream,
    prompt: Regex,
    pub daemon: Daemon,
}

impl CliSession {
    /// Connects and reads the daemon's own banner line before issuing any command, so the
    /// session can be rejected up front if it belongs to neither known BGP implementation.
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| AgentError::backend_unavailable("bgpd", e.to_string()))?;
        stream
            .set_read_timeout(Some(std::time::Duration::from_secs(10)))
            .map_err(|e| AgentError::backend_unavailable("bgpd", e.to_string()))?;
        let prompt = Regex::new(r"[\w-]+[#>]\s*$").expect("static prompt regex");
        let mut banner_reader = BufReader::new(&stream);
        let mut banner = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = banner_reader
                .read_line(&mut line)
                .map_err(|e| AgentError::backend_unavailable("bgpd", e.to_string()))?;
            if n == 0 {
                break;
            }
            banner.push_str(&line);
            if prompt.is_match(&line) {
                break;
            }
        }
        let daemon = detect_daemon(&banner).ok_or_else(|| {
            AgentError::backend_unavailable(
                "bgpd",
                format!("unrecognized routing daemon banner: {:?}", banner.trim()),
            )
        })?;
        Ok(CliSession { stream, prompt, daemon })
    }

    pub fn run_command(&mut self, cmd: &str) -> Result<String> {
        writeln!(self.stream, "{}", cmd)
            .map_err(|e| AgentError::backend_unavailable("bgpd", e.to_string()))?;
        let mut reader = BufReader::new(&mut self.stream);
        let mut output = String::new();
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| AgentError::backend_unavailable("bgpd", e.to_string()))?;
            if n == 0 || self.prompt.is_match(&line) {
                break;
            }
            output.push_str(&line);
        }
        Ok(output)
    }
}

pub struct BgpUpdater {
    addr: String,
    cache: Arc<IndexedCache<Row>>,
}

impl BgpUpdater {
    pub fn new(addr: impl Into<String>, cache: Arc<IndexedCache<Row>>) -> Self {
        BgpUpdater { addr: addr.into(), cache }
    }
}

impl Updater for BgpUpdater {
    fn name(&self) -> &str {
        "bgp"
    }

    fn reinit(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self) -> Result<()> {
        let mut session = CliSession::connect(&self.addr)?;
        log::debug!("bgp: connected to {:?} at {}", session.daemon, self.addr);
        let v4_body = session.run_command("show ip bgp summary")?;
        let v6_body = session.run_command("show bgp ipv6 summary")?;

        let mut rows: BTreeMap<Vec<u32>, Row> = BTreeMap::new();
        for row in parse_summary(&v4_body).into_iter().chain(parse_summary(&v6_body)) {
            rows.insert(sub_id(&row.addr), row);
        }
        self.cache.publish(rows);
        Ok(())
    }
}

pub fn register(cache: Arc<IndexedCache<Row>>) -> Vec<Entry> {
    vec![
        Entry::subtree(
            peer_col(2),
            Arc::new(Column::new(cache.clone(), |r: &Row| Ok(Value::Integer(r.state as i32)))),
        ),
        Entry::subtree(
            peer_col(9),
            Arc::new(Column::new(cache, |r: &Row| Ok(Value::Integer(r.remote_as as i32)))),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_daemon_from_banner() {
        assert_eq!(
            detect_daemon("Hello, this is FRRouting (version 7.2)"),
            Some(Daemon::FrrRouting)
        );
        assert_eq!(
            detect_daemon("Hello, this is Quagga (version 1.2.4)"),
            Some(Daemon::Quagga)
        );
        assert_eq!(detect_daemon("Hello, this is some other daemon"), None);
    }

    #[test]
    fn parses_idle_admin_row_with_space() {
        let body = "Neighbor V AS MsgRcvd MsgSent TblVer InQ OutQ Up/Down State/PfxRcd\n\
                     10.0.0.3 4 65003 0 0 0 0 0 never Idle (Admin)\n";
        let rows = parse_summary(body);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, PeerState::Idle);
    }

    #[test]
    fn parses_established_row_with_prefix_count() {
        let body = "Neighbor V AS MsgRcvd MsgSent TblVer InQ OutQ Up/Down State/PfxRcd\n\
                     10.0.0.1 4 65001 100 100 0 0 0 01:02:03 15\n";
        let rows = parse_summary(body);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].addr, PeerAddr::V4([10, 0, 0, 1]));
        assert_eq!(rows[0].remote_as, 65001);
        assert_eq!(rows[0].state, PeerState::Established);
    }

    #[test]
    fn parses_idle_admin_row_and_strips_dynamic_neighbor_marker() {
        let body = "Neighbor V AS MsgRcvd MsgSent TblVer InQ OutQ Up/Down State/PfxRcd\n\
                     *10.0.0.2 4 65002 0 0 0 0 0 never Idle(Admin)\n";
        let rows = parse_summary(body);
        assert_eq!(rows[0].addr, PeerAddr::V4([10, 0, 0, 2]));
        assert_eq!(rows[0].state, PeerState::Idle);
    }

    #[test]
    fn ipv6_peer_sub_id_uses_16_octets() {
        let addr = PeerAddr::V6(std::net::Ipv6Addr::LOCALHOST.octets());
        let id = sub_id(&addr);
        assert_eq!(id[0], 2);
        assert_eq!(id[1], 16);
        assert_eq!(id.len(), 18);
    }

    #[test]
    fn connect_rejects_unrecognized_daemon_banner() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"Hello, this is SomeOtherDaemon (v1)\nrouter> ").unwrap();
        });
        let err = CliSession::connect(&addr.to_string()).unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable { .. }));
        accepted.join().unwrap();
    }

    #[test]
    fn connect_recognizes_frr_banner_and_stores_daemon() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"Hello, this is FRRouting (version 8.1)\nrouter# ").unwrap();
        });
        let session = CliSession::connect(&addr.to_string()).unwrap();
        assert_eq!(session.daemon, Daemon::FrrRouting);
        accepted.join().unwrap();
    }
}
