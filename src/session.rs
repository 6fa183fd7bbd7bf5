//! The AgentX session state machine: open, register, dispatch, close, reconnect — driven
//! over whatever stream a [`Connector`] hands back (a Unix-domain or loopback TCP socket in
//! production, a socket pair in tests).

use crate::agentx::encodings::{SearchRange, VarBind, ID};
use crate::agentx::pdu;
use crate::error::AgentError;
use crate::mib::{Lookup, MibTree, Successor};
use crate::oid::Oid;
use crate::value::Value;
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use rand::Rng;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Stream: Read + Write + Send {
    /// `None` blocks forever; used to arm/disarm the keepalive deadline in the established loop.
    fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()>;
}

impl Stream for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }
}

impl Stream for UnixStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        UnixStream::set_read_timeout(self, dur)
    }
}

/// How the session obtains (and re-obtains, on reconnect) its stream to the master agent.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Stream>, AgentError>;
    fn describe(&self) -> String;
}

pub struct TcpConnector {
    pub addr: String,
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Box<dyn Stream>, AgentError> {
        TcpStream::connect(&self.addr)
            .map(|s| Box::new(s) as Box<dyn Stream>)
            .map_err(|e| AgentError::TransportError(format!("connect {}: {}", self.addr, e)))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

pub struct UnixConnector {
    pub path: String,
}

impl Connector for UnixConnector {
    fn connect(&self) -> Result<Box<dyn Stream>, AgentError> {
        UnixStream::connect(&self.path)
            .map(|s| Box::new(s) as Box<dyn Stream>)
            .map_err(|e| AgentError::TransportError(format!("connect {}: {}", self.path, e)))
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Opening,
    Registering,
    Established,
    Closing,
}

/// Session-level state tracked across reconnects.
pub struct Session {
    pub state: SessionState,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub agent_timeout: Duration,
    pub registered_roots: Vec<Oid>,
}

impl Session {
    pub fn new(agent_timeout: Duration, roots: Vec<Oid>) -> Self {
        Session {
            state: SessionState::Disconnected,
            session_id: 0,
            transaction_id: 0,
            packet_id: 0,
            agent_timeout,
            registered_roots: roots,
        }
    }

    fn next_packet_id(&mut self) -> u32 {
        self.packet_id = self.packet_id.wrapping_add(1);
        self.packet_id
    }
}

fn within_range(oid: &Oid, end: &Oid) -> bool {
    end.is_empty() || oid < end
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn read_pdu(stream: &mut dyn Stream) -> Result<(pdu::Header, Vec<u8>), AgentError> {
    let mut buf = vec![0u8; pdu::HEADER_LEN];
    stream
        .read_exact(&mut buf)
        .map_err(|e| AgentError::TransportError(e.to_string()))?;
    let header =
        pdu::Header::from_bytes(&buf).map_err(|e| AgentError::ProtocolError(e.to_string()))?;
    buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
    stream
        .read_exact(&mut buf[pdu::HEADER_LEN..])
        .map_err(|e| AgentError::TransportError(e.to_string()))?;
    Ok((header, buf))
}

/// Like [`read_pdu`], but a read timeout (the stream's armed keepalive deadline) is reported as
/// `Ok(None)` rather than a transport error — the established loop uses that to decide whether to
/// ping, whereas a timeout partway through an already-started header/body read is still fatal.
fn read_pdu_or_timeout(
    stream: &mut dyn Stream,
) -> Result<Option<(pdu::Header, Vec<u8>)>, AgentError> {
    let mut buf = vec![0u8; pdu::HEADER_LEN];
    match stream.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if is_timeout(&e) => return Ok(None),
        Err(e) => return Err(AgentError::TransportError(e.to_string())),
    }
    let header =
        pdu::Header::from_bytes(&buf).map_err(|e| AgentError::ProtocolError(e.to_string()))?;
    buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
    stream
        .read_exact(&mut buf[pdu::HEADER_LEN..])
        .map_err(|e| AgentError::TransportError(e.to_string()))?;
    Ok(Some((header, buf)))
}

fn write_bytes(stream: &mut dyn Stream, bytes: &[u8]) -> Result<(), AgentError> {
    stream
        .write_all(bytes)
        .map_err(|e| AgentError::TransportError(e.to_string()))
}

/// Opens and registers a fresh session: `open` then one `register` per configured root. Returns
/// the master-assigned `session_id`.
fn open_and_register(
    stream: &mut dyn Stream,
    subagent_oid: &ID,
    descr: &str,
    session: &mut Session,
) -> Result<(), AgentError> {
    session.state = SessionState::Opening;
    let mut open = pdu::Open::new(subagent_oid.clone(), descr);
    open.timeout = session.agent_timeout;
    open.header.packet_id = session.next_packet_id();
    let bytes = open
        .to_bytes()
        .map_err(|e| AgentError::ProtocolError(e.to_string()))?;
    write_bytes(stream, &bytes)?;
    let (header, raw) = read_pdu(stream)?;
    let resp = pdu::Response::from_bytes(&raw).map_err(|e| AgentError::ProtocolError(e.to_string()))?;
    if resp.error != pdu::error::NO_ERROR {
        return Err(AgentError::TransportError(format!(
            "open rejected: error={}",
            resp.error
        )));
    }
    session.session_id = header.session_id;

    session.state = SessionState::Registering;
    for root in &session.registered_roots.clone() {
        let mut reg = pdu::Register::new(root.clone());
        reg.header.session_id = session.session_id;
        reg.header.packet_id = session.next_packet_id();
        let bytes = reg
            .to_bytes()
            .map_err(|e| AgentError::ProtocolError(e.to_string()))?;
        write_bytes(stream, &bytes)?;
        let (_h, raw) = read_pdu(stream)?;
        let resp =
            pdu::Response::from_bytes(&raw).map_err(|e| AgentError::ProtocolError(e.to_string()))?;
        if resp.error != pdu::error::NO_ERROR {
            return Err(AgentError::TransportError(format!(
                "register({}) rejected: error={}",
                root, resp.error
            )));
        }
    }

    session.state = SessionState::Established;
    Ok(())
}

fn one_getnext(range: &SearchRange, tree: &MibTree) -> (VarBind, Option<AgentError>) {
    match tree.successor(&range.start, range.start_include) {
        Successor::Found(oid, val) if within_range(&oid, &range.end) => (VarBind::new(oid, val), None),
        Successor::Found(_, _) => (
            VarBind::new(range.start.clone(), Value::EndOfMibView),
            None,
        ),
        Successor::EndOfMibView => (
            VarBind::new(range.start.clone(), Value::EndOfMibView),
            None,
        ),
        Successor::GetterError(oid, e) => (VarBind::new(oid, Value::Null), Some(e)),
    }
}

fn build_get_response(header: &pdu::Header, get: &pdu::Get, tree: &MibTree) -> pdu::Response {
    let mut resp = pdu::Response::from_header(header);
    let mut vb = Vec::with_capacity(get.oids.len());
    let mut first_error: Option<u16> = None;
    for (i, oid) in get.oids.iter().enumerate() {
        match tree.lookup(oid) {
            Lookup::NoSuchObject => vb.push(VarBind::new(oid.clone(), Value::NoSuchObject)),
            Lookup::NoSuchInstance => vb.push(VarBind::new(oid.clone(), Value::NoSuchInstance)),
            Lookup::Value(v) => vb.push(VarBind::new(oid.clone(), v)),
            Lookup::GetterError(e) => {
                warn!("get: getter failed for {}: {}", oid, e);
                vb.push(VarBind::new(oid.clone(), Value::Null));
                first_error.get_or_insert((i + 1) as u16);
            }
        }
    }
    if let Some(idx) = first_error {
        resp.error = pdu::error::GEN_ERR;
        resp.index = idx;
    }
    resp.vb = Some(vb);
    resp
}

fn build_getnext_response(header: &pdu::Header, gn: &pdu::GetNext, tree: &MibTree) -> pdu::Response {
    let mut resp = pdu::Response::from_header(header);
    let mut vb = Vec::with_capacity(gn.sr.len());
    let mut first_error: Option<u16> = None;
    for (i, range) in gn.sr.iter().enumerate() {
        let (varbind, err) = one_getnext(range, tree);
        if let Some(e) = err {
            warn!("getnext: getter failed for {}: {}", range.start, e);
            first_error.get_or_insert((i + 1) as u16);
        }
        vb.push(varbind);
    }
    if let Some(idx) = first_error {
        resp.error = pdu::error::GEN_ERR;
        resp.index = idx;
    }
    resp.vb = Some(vb);
    resp
}

fn build_getbulk_response(header: &pdu::Header, gb: &pdu::GetBulk, tree: &MibTree) -> pdu::Response {
    let mut resp = pdu::Response::from_header(header);
    let mut vb = Vec::new();
    let non_rep = gb.non_repeaters as usize;

    for range in gb.sr.iter().take(non_rep) {
        let (varbind, _err) = one_getnext(range, tree);
        vb.push(varbind);
    }

    struct Cursor {
        start: Oid,
        include: bool,
        end: Oid,
        done: bool,
    }
    let mut cursors: Vec<Cursor> = gb
        .sr
        .iter()
        .skip(non_rep)
        .map(|r| Cursor {
            start: r.start.clone(),
            include: r.start_include,
            end: r.end.clone(),
            done: false,
        })
        .collect();

    for _ in 0..gb.max_repetitions {
        for cur in cursors.iter_mut() {
            if cur.done {
                vb.push(VarBind::new(cur.start.clone(), Value::EndOfMibView));
                continue;
            }
            match tree.successor(&cur.start, cur.include) {
                Successor::Found(oid, val) if within_range(&oid, &cur.end) => {
                    vb.push(VarBind::new(oid.clone(), val));
                    cur.start = oid;
                    cur.include = false;
                }
                _ => {
                    vb.push(VarBind::new(cur.start.clone(), Value::EndOfMibView));
                    cur.done = true;
                }
            }
        }
    }

    resp.vb = Some(vb);
    resp
}

/// One request/response cycle in the `established` state. Only a malformed header or socket
/// failure propagates an error (fatal: the outer loop tears the session down); a malformed body
/// behind a good header is answered with `parseError` and the session stays up.
///
/// Returns `Ok(false)` if the read timed out with no PDU available (the caller's keepalive
/// deadline fired), `Ok(true)` if a PDU was read and handled.
fn process_one(stream: &mut dyn Stream, tree: &MibTree) -> Result<bool, AgentError> {
    let (header, raw) = match read_pdu_or_timeout(stream)? {
        Some(pair) => pair,
        None => return Ok(false),
    };
    let response = match header.pdu_type() {
        // A reply to a ping we sent ourselves: consume it as a liveness signal, nothing to send
        // back.
        Ok(pdu::Type::Response) => return Ok(true),
        Ok(pdu::Type::Get) => match pdu::Get::from_bytes(&raw) {
            Ok(get) => build_get_response(&header, &get, tree),
            Err(_) => pdu::Response::parse_error(&header),
        },
        Ok(pdu::Type::GetNext) => match pdu::GetNext::from_bytes(&raw) {
            Ok(gn) => build_getnext_response(&header, &gn, tree),
            Err(_) => pdu::Response::parse_error(&header),
        },
        Ok(pdu::Type::GetBulk) => match pdu::GetBulk::from_bytes(&raw) {
            Ok(gb) => build_getbulk_response(&header, &gb, tree),
            Err(_) => pdu::Response::parse_error(&header),
        },
        Ok(pdu::Type::TestSet)
        | Ok(pdu::Type::CommitSet)
        | Ok(pdu::Type::UndoSet)
        | Ok(pdu::Type::CleanupSet) => match pdu::SetPdu::from_bytes(&raw) {
            Ok(_) => pdu::Response::not_writable(&header),
            Err(_) => pdu::Response::parse_error(&header),
        },
        Ok(pdu::Type::Ping) => match pdu::Ping::from_bytes(&raw) {
            Ok(_) => pdu::Response::from_header(&header),
            Err(_) => pdu::Response::parse_error(&header),
        },
        _ => pdu::Response::parse_error(&header),
    };
    let mut response = response;
    let bytes = response
        .to_bytes()
        .map_err(|e| AgentError::ProtocolError(e.to_string()))?;
    write_bytes(stream, &bytes)?;
    Ok(true)
}

fn reconnect_delay(attempt: u32) -> Duration {
    let base = 1u64.checked_shl(attempt.min(5)).unwrap_or(32).min(30);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    Duration::from_secs(base) + Duration::from_millis(jitter_ms)
}

/// Drives the session FSM until `stop` fires: connect, open+register, then dispatch requests
/// forever (or until the connection drops), reconnecting with backoff+jitter on any failure.
/// Re-registers every root before serving any request on a fresh connection.
pub fn run(
    connector: &dyn Connector,
    subagent_oid: ID,
    descr: &str,
    tree: Arc<MibTree>,
    agent_timeout: Duration,
    roots: Vec<Oid>,
    stop: &Receiver<()>,
) {
    let mut attempt: u32 = 0;
    loop {
        if stop.try_recv().is_ok() {
            return;
        }
        let mut session = Session::new(agent_timeout, roots.clone());
        let mut stream = match connector.connect() {
            Ok(s) => s,
            Err(e) => {
                warn!("session: connect to {} failed: {}", connector.describe(), e);
                let d = reconnect_delay(attempt);
                attempt = attempt.saturating_add(1);
                if stop.recv_timeout(d).is_ok() {
                    return;
                }
                continue;
            }
        };

        if let Err(e) = open_and_register(&mut *stream, &subagent_oid, descr, &mut session) {
            warn!("session: open/register failed: {}", e);
            session.state = SessionState::Closing;
            let d = reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            if stop.recv_timeout(d).is_ok() {
                return;
            }
            continue;
        }
        attempt = 0;
        info!("session: established with {}", connector.describe());

        // Keepalive: a PDU from the master (request or ping reply) resets `last_seen`. If none
        // arrives within `agent_timeout` we probe with our own ping; if that isn't answered
        // within half the timeout, the master is silent or half-open and we tear the session down.
        let ping_after = session.agent_timeout;
        let pong_within = session.agent_timeout / 2;
        if let Err(e) = stream.set_read_timeout(Some(ping_after)) {
            warn!("session: failed to arm read timeout: {}", e);
        }
        let mut last_seen = Instant::now();
        let mut ping_sent_at: Option<Instant> = None;

        'established: loop {
            if stop.try_recv().is_ok() {
                session.state = SessionState::Closing;
                let mut close = pdu::Close::new(1);
                close.header.session_id = session.session_id;
                if let Ok(bytes) = close.to_bytes() {
                    let _ = write_bytes(&mut *stream, &bytes);
                }
                return;
            }
            match process_one(&mut *stream, &tree) {
                Ok(true) => {
                    last_seen = Instant::now();
                    ping_sent_at = None;
                    if let Err(e) = stream.set_read_timeout(Some(ping_after)) {
                        warn!("session: failed to rearm read timeout: {}", e);
                    }
                }
                Ok(false) => {
                    if let Some(sent_at) = ping_sent_at {
                        if sent_at.elapsed() >= pong_within {
                            warn!(
                                "session: no ping reply within {:?}, closing",
                                pong_within
                            );
                            session.state = SessionState::Closing;
                            break 'established;
                        }
                        let remaining = pong_within.saturating_sub(sent_at.elapsed());
                        let _ = stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1))));
                    } else if last_seen.elapsed() >= ping_after {
                        debug!("session: idle for {:?}, sending keepalive ping", ping_after);
                        let mut ping = pdu::Ping::new();
                        ping.header.session_id = session.session_id;
                        ping.header.packet_id = session.next_packet_id();
                        let sent = ping
                            .to_bytes()
                            .map_err(|e| AgentError::ProtocolError(e.to_string()))
                            .and_then(|bytes| write_bytes(&mut *stream, &bytes));
                        match sent {
                            Ok(()) => {
                                ping_sent_at = Some(Instant::now());
                                let _ = stream.set_read_timeout(Some(pong_within));
                            }
                            Err(e) => {
                                warn!("session: failed to send keepalive ping: {}", e);
                                session.state = SessionState::Closing;
                                break 'established;
                            }
                        }
                    } else {
                        let remaining = ping_after.saturating_sub(last_seen.elapsed());
                        let _ = stream.set_read_timeout(Some(remaining.max(Duration::from_millis(1))));
                    }
                }
                Err(e) => {
                    warn!("session: established loop ended: {}", e);
                    session.state = SessionState::Closing;
                    break 'established;
                }
            }
        }
        session.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib::{Entry, ScalarObject};
    use crate::oid::Oid;
    use std::thread;

    fn test_tree() -> Arc<MibTree> {
        let entry = Entry::scalar(
            Oid::new(vec![1, 3, 6, 1, 4, 1, 99999, 1]),
            Arc::new(ScalarObject::new(|| Ok(Value::Integer(42)))),
        );
        Arc::new(MibTree::build(vec![entry]).unwrap())
    }

    fn spawn_fake_master(mut peer: UnixStream) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            // open
            let mut buf = vec![0u8; pdu::HEADER_LEN];
            peer.read_exact(&mut buf).unwrap();
            let header = pdu::Header::from_bytes(&buf).unwrap();
            buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
            peer.read_exact(&mut buf[pdu::HEADER_LEN..]).unwrap();
            let mut resp = pdu::Response::from_header(&header);
            resp.header.session_id = 7;
            peer.write_all(&resp.to_bytes().unwrap()).unwrap();

            // register
            let mut buf = vec![0u8; pdu::HEADER_LEN];
            peer.read_exact(&mut buf).unwrap();
            let header = pdu::Header::from_bytes(&buf).unwrap();
            buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
            peer.read_exact(&mut buf[pdu::HEADER_LEN..]).unwrap();
            let mut resp = pdu::Response::from_header(&header);
            peer.write_all(&resp.to_bytes().unwrap()).unwrap();

            // one get request
            let mut get = pdu::Get {
                header: pdu::Header::new(pdu::Type::Get),
                oids: vec![Oid::new(vec![1, 3, 6, 1, 4, 1, 99999, 1, 0])],
            };
            get.header.session_id = 7;
            get.header.packet_id = 123;
            peer.write_all(&get.to_bytes().unwrap()).unwrap();

            let mut buf = vec![0u8; pdu::HEADER_LEN];
            peer.read_exact(&mut buf).unwrap();
            let header = pdu::Header::from_bytes(&buf).unwrap();
            buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
            peer.read_exact(&mut buf[pdu::HEADER_LEN..]).unwrap();
            buf
        })
    }

    #[test]
    fn open_register_and_dispatch_get_over_socketpair() {
        let (agent_side, peer) = UnixStream::pair().unwrap();
        let handle = spawn_fake_master(peer);

        let tree = test_tree();
        let oid = Oid::new(vec![1u32, 3, 6, 1, 4, 1, 99999]);
        let mut session = Session::new(Duration::from_secs(5), vec![oid.clone()]);
        let mut stream: Box<dyn Stream> = Box::new(agent_side);
        open_and_register(&mut *stream, &oid, "test subagent", &mut session).unwrap();
        assert_eq!(session.session_id, 7);
        assert_eq!(session.state, SessionState::Established);

        process_one(&mut *stream, &tree).unwrap();
        let raw = handle.join().unwrap();
        let resp = pdu::Response::from_bytes(&raw).unwrap();
        assert_eq!(resp.error, pdu::error::NO_ERROR);
        let vb = resp.vb.unwrap();
        assert_eq!(vb.len(), 1);
        assert_eq!(vb[0].data, Value::Integer(42));
    }

    #[test]
    fn malformed_body_gets_parse_error_session_survives() {
        let tree = test_tree();
        let mut get_header = pdu::Header::new(pdu::Type::Get);
        get_header.payload_length = 4;
        let mut bytes = get_header.to_bytes();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]); // bogus n_subids=255 but no payload

        let (mut a, mut b) = UnixStream::pair().unwrap();
        b.write_all(&bytes).unwrap();
        process_one(&mut a, &tree).unwrap();

        let mut resp_buf = vec![0u8; pdu::HEADER_LEN];
        b.read_exact(&mut resp_buf).unwrap();
        let h = pdu::Header::from_bytes(&resp_buf).unwrap();
        resp_buf.resize(pdu::HEADER_LEN + h.payload_length as usize, 0);
        b.read_exact(&mut resp_buf[pdu::HEADER_LEN..]).unwrap();
        let resp = pdu::Response::from_bytes(&resp_buf).unwrap();
        assert_eq!(resp.error, pdu::error::PARSE_ERROR);
    }

    #[test]
    fn getbulk_returns_exactly_max_repetitions_varbinds_in_order() {
        let cache: Arc<crate::mib::IndexedCache<i32>> = Arc::new(crate::mib::IndexedCache::new());
        let rows: std::collections::BTreeMap<Vec<u32>, i32> =
            [(vec![1], 10), (vec![2], 20), (vec![3], 30), (vec![4], 40)]
                .into_iter()
                .collect();
        cache.publish(rows);
        let entry = Entry::subtree(
            Oid::new(vec![1, 2]),
            Arc::new(crate::mib::Column::new(cache, |v: &i32| Ok(Value::Integer(*v)))),
        );
        let tree = MibTree::build(vec![entry]).unwrap();

        let gb = pdu::GetBulk {
            header: pdu::Header::new(pdu::Type::GetBulk),
            non_repeaters: 0,
            max_repetitions: 3,
            sr: vec![SearchRange {
                start: Oid::new(vec![1, 2]),
                start_include: false,
                end: Oid::new(vec![]),
            }],
        };
        let resp = build_getbulk_response(&gb.header, &gb, &tree);
        let vb = resp.vb.unwrap();
        assert_eq!(vb.len(), 3);
        assert_eq!(vb[0].data, Value::Integer(10));
        assert_eq!(vb[1].data, Value::Integer(20));
        assert_eq!(vb[2].data, Value::Integer(30));
        for pair in vb.windows(2) {
            assert!(pair[0].name < pair[1].name);
        }
    }

    #[test]
    fn reconnect_delay_stays_within_documented_backoff_envelope() {
        for attempt in 0..8 {
            let d = reconnect_delay(attempt);
            assert!(d >= Duration::from_secs(1u64.checked_shl(attempt.min(5)).unwrap_or(32).min(30)));
            assert!(d < Duration::from_secs(31));
        }
    }

    #[test]
    fn process_one_reports_timeout_as_no_pdu_without_erroring() {
        let tree = test_tree();
        let (mut a, _b) = UnixStream::pair().unwrap();
        a.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let got = process_one(&mut a, &tree).unwrap();
        assert!(!got, "no data was ever written, the read should have timed out");
    }

    #[test]
    fn process_one_absorbs_a_ping_reply_as_liveness_only() {
        let tree = test_tree();
        let (mut a, mut b) = UnixStream::pair().unwrap();

        let mut resp = pdu::Response::from_header(&pdu::Header::new(pdu::Type::Ping));
        resp.header.session_id = 7;
        resp.header.packet_id = 99;
        b.write_all(&resp.to_bytes().unwrap()).unwrap();

        let got = process_one(&mut a, &tree).unwrap();
        assert!(got, "the reply to our own ping still counts as a received PDU");

        // Nothing should have been written back for it.
        b.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut probe = [0u8; 1];
        assert!(b.read(&mut probe).is_err());
    }
}
