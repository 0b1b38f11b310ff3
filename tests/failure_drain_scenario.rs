//! Pipelined RUN/PULL_ALL where the server answers with FAILURE then
//! IGNORED, followed by a successful ACK_FAILURE and a subsequent RUN.

use std::sync::{Arc, Mutex};

use bolt_core::connection::request::RequestOutcome;
use bolt_core::connection::{ConnectionCore, ConnectionOptions, State};
use bolt_core::message::{signature, ClientMessage};
use bolt_core::test_utils::LoopbackStream;
use bolt_core::value_codec::encode_value;
use bolt_core::{Value, ValueMap};
use byteorder::{BigEndian, ByteOrder};

fn chunked_struct(signature: u8, fields: &[Value]) -> Vec<u8> {
    let mut raw = vec![0xB0 | fields.len() as u8, signature];
    for f in fields {
        encode_value(f, &mut raw).unwrap();
    }
    let mut out = Vec::new();
    let mut header = [0u8; 2];
    BigEndian::write_u16(&mut header, raw.len() as u16);
    out.extend(&header);
    out.extend(&raw);
    out.extend(&[0u8, 0u8]);
    out
}

fn success(meta: Vec<(&str, Value)>) -> Vec<u8> {
    let mut map = ValueMap::new();
    for (k, v) in meta {
        map.insert(k, v);
    }
    chunked_struct(signature::SUCCESS, &[Value::Map(map)])
}

fn options() -> ConnectionOptions {
    ConnectionOptions {
        client_id: "bolt-core/0.1".to_string(),
        username: Some("neo4j".to_string()),
        password: Some("secret".to_string()),
        max_pipelined_requests: 8,
        session_request_queue_size: 8,
        snd_min_chunk_size: 0,
        snd_max_chunk_size: 0xFFFF,
    }
}

#[test]
fn failure_then_ignored_then_ack_failure_returns_to_ready_and_takes_more_work() {
    let mut server = LoopbackStream::new();
    server.feed(&[0x00, 0x00, 0x00, 0x01]); // handshake
    server.feed(&success(vec![("server", Value::string("neo4j/3.5.0"))])); // INIT
    let mut failure_meta = ValueMap::new();
    failure_meta.insert("code", Value::string("Neo.ClientError.Statement.SyntaxError"));
    server.feed(&chunked_struct(signature::FAILURE, &[Value::Map(failure_meta)])); // RUN fails
    server.feed(&chunked_struct(signature::IGNORED, &[])); // PULL_ALL ignored
    server.feed(&success(vec![])); // ACK_FAILURE succeeds
    server.feed(&success(vec![])); // second RUN succeeds

    let mut core = ConnectionCore::open(1, server, &options()).unwrap();
    assert_eq!(core.state(), State::Ready);

    let outcomes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let o1 = outcomes.clone();
    let o2 = outcomes.clone();
    core.enqueue(
        ClientMessage::Run { statement: "bad syntax".to_string(), parameters: ValueMap::new() },
        Box::new(move |outcome| o1.lock().unwrap().push(format!("{:?}", outcome))),
    )
    .unwrap();
    core.enqueue(
        ClientMessage::PullAll,
        Box::new(move |outcome| o2.lock().unwrap().push(format!("{:?}", outcome))),
    )
    .unwrap();
    core.sync(2).unwrap();

    assert_eq!(core.state(), State::Ready);
    {
        let recorded = outcomes.lock().unwrap();
        assert!(recorded[0].starts_with("Failure"), "RUN outcome was {}", recorded[0]);
        assert!(recorded[1].starts_with("Failure"), "PULL_ALL outcome was {}", recorded[1]);
    }

    let subsequent: Arc<Mutex<Option<RequestOutcome>>> = Arc::new(Mutex::new(None));
    let s1 = subsequent.clone();
    core.enqueue(
        ClientMessage::Run { statement: "RETURN 1".to_string(), parameters: ValueMap::new() },
        Box::new(move |outcome| *s1.lock().unwrap() = Some(outcome)),
    )
    .unwrap();
    core.sync(1).unwrap();
    assert!(matches!(*subsequent.lock().unwrap(), Some(RequestOutcome::Success(_))));
    assert_eq!(core.state(), State::Ready);
}
