//! Crate-level behavioral test for session recovery: after a dropped connection,
//! the session must reconnect, replay open+register, and only then resume serving requests.

use crossbeam_channel::bounded;
use snmp_subagent::agentx::encodings::ID;
use snmp_subagent::agentx::pdu;
use snmp_subagent::error::AgentError;
use snmp_subagent::mib::{Entry, MibTree, ScalarObject};
use snmp_subagent::oid::Oid;
use snmp_subagent::session::{self, Connector, Stream};
use snmp_subagent::value::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Hands out pre-created socket pairs one at a time, so `session::run`'s reconnect loop drives
/// a fresh stream on each call the same way a real `Connector` would after a dropped TCP socket.
struct QueueConnector {
    streams: Mutex<Vec<UnixStream>>,
    connects: AtomicUsize,
}

impl Connector for QueueConnector {
    fn connect(&self) -> Result<Box<dyn Stream>, AgentError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut g = self.streams.lock().unwrap();
        if g.is_empty() {
            return Err(AgentError::TransportError("no more fake connections queued".into()));
        }
        Ok(Box::new(g.remove(0)))
    }

    fn describe(&self) -> String {
        "fake://queued".to_string()
    }
}

fn read_full_pdu(stream: &mut UnixStream) -> (pdu::Header, Vec<u8>) {
    let mut buf = vec![0u8; pdu::HEADER_LEN];
    stream.read_exact(&mut buf).unwrap();
    let header = pdu::Header::from_bytes(&buf).unwrap();
    buf.resize(pdu::HEADER_LEN + header.payload_length as usize, 0);
    stream.read_exact(&mut buf[pdu::HEADER_LEN..]).unwrap();
    (header, buf)
}

fn respond_ok(stream: &mut UnixStream, header: &pdu::Header, session_id: u32) {
    let mut resp = pdu::Response::from_header(header);
    resp.header.session_id = session_id;
    stream.write_all(&resp.to_bytes().unwrap()).unwrap();
}

fn test_tree() -> Arc<MibTree> {
    let entry = Entry::scalar(
        Oid::new(vec![1, 3, 6, 1, 4, 1, 99999, 1]),
        Arc::new(ScalarObject::new(|| Ok(Value::Integer(7)))),
    );
    Arc::new(MibTree::build(vec![entry]).unwrap())
}

#[test]
fn reconnect_replays_open_and_register_before_serving_a_request() {
    let (agent_a, mut master_a) = UnixStream::pair().unwrap();
    let (agent_b, mut master_b) = UnixStream::pair().unwrap();

    let connector = Arc::new(QueueConnector {
        streams: Mutex::new(vec![agent_a, agent_b]),
        connects: AtomicUsize::new(0),
    });

    let tree = test_tree();
    let roots = vec![Oid::new(vec![1, 3, 6, 1, 4, 1, 99999])];
    let subagent_oid = ID::new(vec![1, 3, 6, 1, 4, 1, 99999]);
    let (stop_tx, stop_rx) = bounded::<()>(0);

    let run_connector = connector.clone();
    let run_tree = tree.clone();
    let run_roots = roots.clone();
    let handle = thread::spawn(move || {
        session::run(
            run_connector.as_ref(),
            subagent_oid,
            "test subagent",
            run_tree,
            Duration::from_secs(5),
            run_roots,
            &stop_rx,
        );
    });

    // First generation connection: open + register, then the master just drops the socket to
    // simulate a lost connection without ever serving a request.
    let (open_header, _) = read_full_pdu(&mut master_a);
    respond_ok(&mut master_a, &open_header, 1);
    let (reg_header, _) = read_full_pdu(&mut master_a);
    respond_ok(&mut master_a, &reg_header, 1);
    drop(master_a);

    // Second generation connection: the session must replay open+register again before it will
    // serve anything — if it tried to reuse stale state this read would hang or see garbage.
    let (open_header, _) = read_full_pdu(&mut master_b);
    assert_eq!(open_header.pdu_type().unwrap(), pdu::Type::Open);
    respond_ok(&mut master_b, &open_header, 2);

    let (reg_header, _) = read_full_pdu(&mut master_b);
    assert_eq!(reg_header.pdu_type().unwrap(), pdu::Type::Register);
    respond_ok(&mut master_b, &reg_header, 2);

    let mut get = pdu::Get {
        header: pdu::Header::new(pdu::Type::Get),
        oids: vec![Oid::new(vec![1, 3, 6, 1, 4, 1, 99999, 1, 0])],
    };
    get.header.session_id = 2;
    get.header.packet_id = 1;
    master_b.write_all(&get.to_bytes().unwrap()).unwrap();

    let (_h, raw) = read_full_pdu(&mut master_b);
    let resp = pdu::Response::from_bytes(&raw).unwrap();
    assert_eq!(resp.error, pdu::error::NO_ERROR);
    assert_eq!(resp.vb.unwrap()[0].data, Value::Integer(7));

    stop_tx.send(()).unwrap();
    handle.join().unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}
