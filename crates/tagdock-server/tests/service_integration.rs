//! End-to-end tests: real TCP connections against a service backed by
//! the simulated reader bus.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tagdock_catalog::Catalog;
use tagdock_core::TagUid;
use tagdock_core::constants::{TAG_SIZE, USER_DATA_SIZE};
use tagdock_driver::mock::{MockBus, MockBusHandle, MockTag, mock_bus};
use tagdock_driver::{Pn532, RetryPolicy, WriteOptions};
use tagdock_server::Service;

/// Tag detection window for tests; long enough for several polls,
/// short enough to keep the suite quick.
const DETECT_TIMEOUT: Duration = Duration::from_millis(400);

fn seed_catalog(dir: &Path) {
    let mario = dir.join("Mario");
    std::fs::create_dir_all(&mario).unwrap();
    std::fs::write(mario.join("mario_classic.nfc"), vec![0x5A; USER_DATA_SIZE]).unwrap();
    let zelda = dir.join("Zelda");
    std::fs::create_dir_all(&zelda).unwrap();
    std::fs::write(zelda.join("link.nfc"), vec![0x33; TAG_SIZE]).unwrap();
}

async fn spawn_service(
    dir: &Path,
    lock_wait: Duration,
) -> (SocketAddr, MockBusHandle, Arc<Service<MockBus>>) {
    let catalog = Catalog::open(dir).unwrap();
    let (bus, handle) = mock_bus();
    let reader = Pn532::new(bus, RetryPolicy::default(), Duration::from_millis(500));
    let options = WriteOptions {
        detect_timeout: DETECT_TIMEOUT,
    };
    let service = Arc::new(Service::start(catalog, reader, options, lock_wait).await);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&service).serve(listener));
    (addr, handle, service)
}

/// Send one raw line and read the single response line.
async fn send_raw(addr: SocketAddr, line: &str) -> Value {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    serde_json::from_str(reply.lines().next().unwrap()).unwrap()
}

async fn send(addr: SocketAddr, request: Value) -> Value {
    send_raw(addr, &request.to_string()).await
}

fn uid() -> TagUid {
    TagUid::new(vec![0x04, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]).unwrap()
}

#[tokio::test]
async fn mario_example_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    let reply = send(addr, json!({"command": "list_categories"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"], json!(["Mario", "Zelda"]));

    let reply = send(addr, json!({"command": "list_payloads", "category": "Mario"})).await;
    assert_eq!(reply["data"], json!(["mario_classic"]));

    handle.insert_tag(MockTag::ntag215(uid()));
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["outcome"], "success");
    assert_eq!(reply["data"]["uid"], "04123456789ABC");

    // The user region landed on the tag.
    assert_eq!(handle.tag_page(4), Some([0x5A; 4]));
    assert_eq!(handle.tag_page(129), Some([0x5A; 4]));

    // No tag in the field: same request reports no_tag.
    handle.remove_tag();
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "no_tag");
}

#[tokio::test]
async fn corrupted_read_back_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    handle.insert_tag(MockTag::ntag215(uid()));
    handle.corrupt_reads_of(66);
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "verification_failed");
    assert_eq!(reply["data"]["page"], 66);
}

#[tokio::test]
async fn concurrent_writes_are_mutually_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    // Empty field: the first write holds the reader for the whole
    // detection window, guaranteeing the requests overlap.
    let (addr, _handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    let request = json!({"command": "write", "category": "Mario", "name": "mario_classic"});
    let first = tokio::spawn(send(addr, request.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = send(addr, request).await;
    let first = first.await.unwrap();

    let mut outcomes = [
        first["data"]["outcome"].as_str().unwrap().to_string(),
        second["data"]["outcome"].as_str().unwrap().to_string(),
    ];
    outcomes.sort();
    assert_eq!(outcomes, ["busy", "no_tag"]);
}

#[tokio::test]
async fn list_commands_answer_during_an_in_flight_write() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, _handle, service) = spawn_service(dir.path(), Duration::ZERO).await;

    let write = tokio::spawn(send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.is_writing());

    let reply = send(addr, json!({"command": "list_categories"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"], json!(["Mario", "Zelda"]));

    assert_eq!(write.await.unwrap()["data"]["outcome"], "no_tag");
}

#[tokio::test]
async fn wrong_tag_type_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    // NTAG213 capability container.
    handle.insert_tag(MockTag::with_cc(uid(), [0xE1, 0x10, 0x12, 0x00]));
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "wrong_tag_type");
    assert_eq!(handle.tag_page(4), Some([0x00; 4]));
}

#[tokio::test]
async fn rejected_page_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    handle.insert_tag(MockTag::ntag215(uid()));
    handle.reject_writes_to(50);
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "write_rejected");
    assert_eq!(reply["data"]["page"], 50);
}

#[tokio::test]
async fn silent_bus_reports_bus_fault() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    handle.insert_tag(MockTag::ntag215(uid()));
    handle.go_silent();
    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "bus_fault");
}

#[tokio::test]
async fn bad_requests_never_touch_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;
    let exchanges_after_startup = handle.exchanges();

    let reply = send_raw(addr, "this is not json").await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().contains("bad request"));

    let reply = send(addr, json!({"command": "eject_tag"})).await;
    assert_eq!(reply["status"], "error");

    let reply = send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "nonexistent"}),
    )
    .await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().contains("nonexistent"));

    assert_eq!(handle.exchanges(), exchanges_after_startup);
}

#[tokio::test]
async fn status_reports_cached_firmware() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, _handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    let reply = send(addr, json!({"command": "status"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["firmware_version"], "1.6");
    assert_eq!(reply["data"]["hardware_ready"], true);
}

#[tokio::test]
async fn reload_exposes_new_payloads() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::ZERO).await;

    let kirby = dir.path().join("Kirby");
    std::fs::create_dir_all(&kirby).unwrap();
    std::fs::write(kirby.join("kirby.nfc"), vec![0x77; TAG_SIZE]).unwrap();

    let reply = send(addr, json!({"command": "reload"})).await;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["data"]["categories"], 3);
    assert_eq!(reply["data"]["payloads"], 3);

    handle.insert_tag(MockTag::ntag215(uid()));
    let reply = send(
        addr,
        json!({"command": "write", "category": "Kirby", "name": "kirby"}),
    )
    .await;
    assert_eq!(reply["data"]["outcome"], "success");
    assert_eq!(handle.tag_page(4), Some([0x77; 4]));
}

#[tokio::test]
async fn bounded_lock_wait_queues_behind_the_holder() {
    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path());
    // Waiters may queue for up to 2s, longer than one detect window.
    let (addr, handle, _service) = spawn_service(dir.path(), Duration::from_secs(2)).await;

    let first = tokio::spawn(send(
        addr,
        json!({"command": "write", "category": "Mario", "name": "mario_classic"}),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.insert_tag(MockTag::ntag215(uid()));
    let second = send(
        addr,
        json!({"command": "write", "category": "Zelda", "name": "link"}),
    )
    .await;
    let first = first.await.unwrap();

    // The first write found the tag mid-poll or timed out; either way
    // the second queued instead of reporting busy.
    assert_ne!(second["data"]["outcome"], "busy");
    assert!(first["data"]["outcome"].is_string());
}
