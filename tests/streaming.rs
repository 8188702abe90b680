//! End-to-end streaming protocol tests against a live listener
//!
//! Drives the real server with std TCP clients: snapshot frames at the
//! default cadence, filter updates, malformed-frame tolerance, and client
//! isolation.

use bmcmond::store::{NodeSnapshot, SensorCatalog, SensorKind, SensorReading, SensorStore};
use bmcmond::streaming::wire::{read_frame, write_frame};
use bmcmond::streaming::{spawn_consolidator, ClientSettings, StreamingServer};
use crossbeam_channel::unbounded;
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct TestServer {
    addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    publish: crossbeam_channel::Sender<HashMap<String, NodeSnapshot>>,
}

fn sample_batch() -> HashMap<String, NodeSnapshot> {
    let mut snapshot = NodeSnapshot::default();
    snapshot.sensors.insert(
        "ambient".to_string(),
        SensorReading {
            value: Some(45.0),
            scale: 1.0,
            kind: SensorKind::Temperature,
        },
    );
    snapshot.sensors.insert(
        "total_power".to_string(),
        SensorReading {
            value: Some(300.0),
            scale: 1e-6,
            kind: SensorKind::Power,
        },
    );
    snapshot.connected = Some(true);
    snapshot.node_state = Some("Running".to_string());
    snapshot.last_update = Some(1_700_000_000);

    let mut batch = HashMap::new();
    batch.insert("cn1".to_string(), snapshot);
    batch
}

fn start_server() -> TestServer {
    let store = Arc::new(SensorStore::new());
    let catalog = Arc::new(SensorCatalog::new(&[]));
    let shutdown = Arc::new(AtomicBool::new(false));
    let (publish_tx, publish_rx) = unbounded();

    spawn_consolidator(Arc::clone(&store), publish_rx, Arc::clone(&shutdown)).unwrap();
    publish_tx.send(sample_batch()).unwrap();

    let server = StreamingServer::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();
    server
        .spawn(
            store,
            catalog,
            ClientSettings {
                tick: Duration::from_millis(50),
                default_cadence: Duration::from_millis(100),
            },
            Arc::clone(&shutdown),
        )
        .unwrap();

    TestServer {
        addr,
        shutdown,
        publish: publish_tx,
    }
}

fn connect(server: &TestServer) -> TcpStream {
    let stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn next_snapshot(stream: &mut TcpStream) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(payload) = read_frame(stream).unwrap() {
            return serde_json::from_slice(&payload).unwrap();
        }
    }
    panic!("no snapshot frame within deadline");
}

/// Wait for a snapshot satisfying `predicate`, skipping frames that were
/// already in flight when a filter change was sent.
fn wait_for_snapshot(
    stream: &mut TcpStream,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut last = serde_json::Value::Null;
    while Instant::now() < deadline {
        last = next_snapshot(stream);
        if predicate(&last) {
            return last;
        }
    }
    panic!("expected snapshot never arrived, last: {}", last);
}

#[test]
fn test_unfiltered_snapshot_schema() {
    let server = start_server();
    let mut stream = connect(&server);

    let snapshot = next_snapshot(&mut stream);
    assert!(snapshot.get("Time_Sent").is_some());

    let node = &snapshot["cn1"];
    assert_eq!(node["Connected"], serde_json::json!(true));
    assert_eq!(node["NodeState"], serde_json::json!("Running"));
    assert_eq!(node["LastUpdateReceived"], serde_json::json!(1_700_000_000u64));
    assert_eq!(node["ambient"]["value"], serde_json::json!(45.0));
    assert_eq!(
        node["ambient"]["type"],
        serde_json::json!(["temperature", "DegreesC"])
    );
    assert_eq!(node["total_power"]["value"], serde_json::json!(300.0));

    server.shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn test_type_filter_narrows_snapshot() {
    let server = start_server();
    let mut stream = connect(&server);

    // Subscribe to temperatures only
    write_frame(
        &mut stream,
        br#"{"sensortypes": ["temperature"], "frequency": 1}"#,
    )
    .unwrap();

    let snapshot = wait_for_snapshot(&mut stream, |s| s["cn1"].get("total_power").is_none());
    let node = &snapshot["cn1"];
    assert_eq!(node["ambient"]["value"], serde_json::json!(45.0));
    // Status fields survive every filter
    assert!(node.get("Connected").is_some());
    assert!(node.get("NodeState").is_some());
    assert!(node.get("LastUpdateReceived").is_some());

    server.shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn test_name_filter_wins_over_type_filter() {
    let server = start_server();
    let mut stream = connect(&server);

    write_frame(
        &mut stream,
        br#"{"sensornames": ["total_power"], "sensortypes": ["temperature"]}"#,
    )
    .unwrap();

    let snapshot = wait_for_snapshot(&mut stream, |s| s["cn1"].get("ambient").is_none());
    assert!(snapshot["cn1"].get("total_power").is_some());

    server.shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn test_malformed_filter_leaves_subscription_intact() {
    let server = start_server();
    let mut stream = connect(&server);

    write_frame(&mut stream, br#"{"sensortypes": ["temperature"]}"#).unwrap();
    wait_for_snapshot(&mut stream, |s| s["cn1"].get("total_power").is_none());

    // Malformed: sensornames must be a list. The previous filter stays in
    // effect and the connection survives.
    write_frame(&mut stream, br#"{"sensornames": "not-a-list"}"#).unwrap();

    for _ in 0..3 {
        let snapshot = next_snapshot(&mut stream);
        assert!(snapshot["cn1"].get("ambient").is_some());
        assert!(snapshot["cn1"].get("total_power").is_none());
    }

    server.shutdown.store(true, Ordering::Relaxed);
}

#[test]
fn test_client_disconnect_does_not_affect_others() {
    let server = start_server();
    let mut keeper = connect(&server);
    next_snapshot(&mut keeper);

    // Second client connects, then drops mid-conversation
    {
        let mut dropper = connect(&server);
        next_snapshot(&mut dropper);
    }

    // New data still reaches the surviving client
    let mut batch = sample_batch();
    if let Some(node) = batch.get_mut("cn1") {
        if let Some(reading) = node.sensors.get_mut("ambient") {
            reading.value = Some(46.0);
        }
    }
    server.publish.send(batch).unwrap();

    let snapshot = wait_for_snapshot(&mut keeper, |s| {
        s["cn1"]["ambient"]["value"] == serde_json::json!(46.0)
    });
    assert_eq!(snapshot["cn1"]["total_power"]["value"], serde_json::json!(300.0));

    server.shutdown.store(true, Ordering::Relaxed);
}
