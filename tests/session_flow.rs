#![allow(clippy::unwrap_used)]
//! Interactive session tests.
//!
//! Each test boots a real server, registers one or more clients over the
//! registration pipe exactly the way an external process would, and
//! drives the session protocol end to end: subscribe, publish, fanout,
//! disconnect, teardown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe::{Receiver, Sender};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use galena::config::Config;
use galena::pipe as fifo;
use galena::server::Server;

// ============================================================================
// Harness
// ============================================================================

fn base_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.registry_path = dir.join("registry");
    config.jobs.directory = dir.join("jobs");
    config.jobs.workers = 1;
    config.store.buckets = 8;
    std::fs::create_dir_all(&config.jobs.directory).unwrap();
    config
}

async fn boot(config: Config) -> (PathBuf, broadcast::Sender<()>, JoinHandle<galena::Result<()>>) {
    let registry_path = config.server.registry_path.clone();
    let server = Server::new(config).unwrap();
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.run());
    (registry_path, shutdown, handle)
}

async fn start_server(dir: &Path) -> (PathBuf, broadcast::Sender<()>, JoinHandle<galena::Result<()>>) {
    boot(base_config(dir)).await
}

/// Poll until `ready` holds or the deadline passes.
async fn wait_for(ready: impl Fn() -> bool, what: &str) {
    for _ in 0..200 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

/// A client process stand-in speaking the registration and session
/// protocol over real FIFOs.
///
/// The response and notification pipes are opened in read-write mode so
/// the reader never sees a spurious EOF before the server attaches.
struct TestClient {
    request: Sender,
    responses: BufReader<Receiver>,
    notifications: Option<BufReader<Receiver>>,
    request_path: PathBuf,
    response_path: PathBuf,
}

impl TestClient {
    /// Register using the bare `req;resp` announcement form.
    async fn connect(registry: &Path, dir: &Path, name: &str) -> Self {
        let request_path = dir.join(format!("{name}_req"));
        let response_path = dir.join(format!("{name}_resp"));
        fifo::create(&request_path).unwrap();
        fifo::create(&response_path).unwrap();

        let mut announce = fifo::open_sender(registry).await.unwrap();
        let line = format!("{};{}\n", request_path.display(), response_path.display());
        announce.write_all(line.as_bytes()).await.unwrap();

        let request = fifo::open_sender(&request_path).await.unwrap();
        let responses = BufReader::new(fifo::open_bus(&response_path).unwrap());
        Self {
            request,
            responses,
            notifications: None,
            request_path,
            response_path,
        }
    }

    /// Register using the `CONNECT|req|resp|notif` announcement form.
    async fn connect_with_notifications(registry: &Path, dir: &Path, name: &str) -> Self {
        let request_path = dir.join(format!("{name}_req"));
        let response_path = dir.join(format!("{name}_resp"));
        let notification_path = dir.join(format!("{name}_notif"));
        fifo::create(&request_path).unwrap();
        fifo::create(&response_path).unwrap();
        fifo::create(&notification_path).unwrap();

        let mut announce = fifo::open_sender(registry).await.unwrap();
        let line = format!(
            "CONNECT|{}|{}|{}\n",
            request_path.display(),
            response_path.display(),
            notification_path.display()
        );
        announce.write_all(line.as_bytes()).await.unwrap();

        let request = fifo::open_sender(&request_path).await.unwrap();
        let responses = BufReader::new(fifo::open_bus(&response_path).unwrap());
        let notifications = Some(BufReader::new(fifo::open_bus(&notification_path).unwrap()));
        Self {
            request,
            responses,
            notifications,
            request_path,
            response_path,
        }
    }

    async fn send(&mut self, line: &str) {
        let frame = format!("{line}\n");
        self.request.write_all(frame.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(2), self.responses.read_line(&mut line))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        line.trim_end().to_string()
    }

    async fn recv_notification(&mut self) -> String {
        let reader = self.notifications.as_mut().expect("no notification pipe");
        let mut line = String::new();
        timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a notification")
            .unwrap();
        line.trim_end().to_string()
    }

    /// Assert nothing arrives on the response pipe for a short while.
    async fn assert_silent(&mut self) {
        let mut line = String::new();
        let read = timeout(
            Duration::from_millis(300),
            self.responses.read_line(&mut line),
        )
        .await;
        assert!(read.is_err(), "unexpected delivery: {line:?}");
    }
}

// ============================================================================
// Session protocol
// ============================================================================

#[tokio::test]
async fn test_subscribe_publish_unsubscribe_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut listener = TestClient::connect(&registry, dir.path(), "listener").await;
    let mut reporter = TestClient::connect(&registry, dir.path(), "reporter").await;

    listener.send("SUBSCRIBE|news").await;
    assert_eq!(listener.recv().await, "SUBSCRIBED");

    reporter.send("PUBLISH news breaking story").await;
    assert_eq!(reporter.recv().await, "MESSAGE PUBLISHED");
    assert_eq!(listener.recv().await, "breaking story");

    listener.send("UNSUBSCRIBE|news").await;
    assert_eq!(listener.recv().await, "UNSUBSCRIBED");

    reporter.send("PUBLISH news old news").await;
    assert_eq!(reporter.recv().await, "MESSAGE PUBLISHED");
    listener.assert_silent().await;

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_publisher_excluded_from_own_fanout() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut solo = TestClient::connect(&registry, dir.path(), "solo").await;
    let mut other = TestClient::connect(&registry, dir.path(), "other").await;

    solo.send("SUBSCRIBE|echo").await;
    assert_eq!(solo.recv().await, "SUBSCRIBED");

    // Publishing on a key you subscribe to must not echo back.
    solo.send("PUBLISH echo my own words").await;
    assert_eq!(solo.recv().await, "MESSAGE PUBLISHED");
    solo.assert_silent().await;

    other.send("PUBLISH echo from elsewhere").await;
    assert_eq!(other.recv().await, "MESSAGE PUBLISHED");
    assert_eq!(solo.recv().await, "from elsewhere");

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dedicated_notification_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut sensor_panel =
        TestClient::connect_with_notifications(&registry, dir.path(), "panel").await;
    let mut sensor = TestClient::connect(&registry, dir.path(), "sensor").await;

    sensor_panel.send("SUBSCRIBE|temp").await;
    assert_eq!(sensor_panel.recv().await, "SUBSCRIBED");

    sensor.send("PUBLISH temp 31C").await;
    assert_eq!(sensor.recv().await, "MESSAGE PUBLISHED");

    // The message arrives on the notification pipe, not the response one.
    assert_eq!(sensor_panel.recv_notification().await, "31C");
    sensor_panel.assert_silent().await;

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_and_malformed_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut client = TestClient::connect(&registry, dir.path(), "odd").await;

    client.send("MAKE COFFEE").await;
    assert_eq!(client.recv().await, "UNKNOWN COMMAND");

    client.send("SUBSCRIBE|").await;
    assert_eq!(client.recv().await, "ERROR: malformed SUBSCRIBE command");

    client.send("PUBLISH|lonely").await;
    assert_eq!(client.recv().await, "ERROR: malformed PUBLISH command");

    // Space works as the separator too.
    client.send("SUBSCRIBE topic").await;
    assert_eq!(client.recv().await, "SUBSCRIBED");

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_acknowledged_and_pipes_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut client = TestClient::connect(&registry, dir.path(), "leaver").await;
    client.send("SUBSCRIBE|news").await;
    assert_eq!(client.recv().await, "SUBSCRIBED");

    client.send("DISCONNECT").await;
    assert_eq!(client.recv().await, "DISCONNECTED");

    let request_path = client.request_path.clone();
    let response_path = client.response_path.clone();
    wait_for(
        || !request_path.exists() && !response_path.exists(),
        "session pipes to be removed",
    )
    .await;
    // The registration pipe outlives individual sessions.
    assert!(registry.exists());

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!registry.exists());
}

#[tokio::test]
async fn test_server_shutdown_closes_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    let mut client = TestClient::connect(&registry, dir.path(), "bystander").await;
    client.send("SUBSCRIBE|anything").await;
    assert_eq!(client.recv().await, "SUBSCRIBED");

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();

    // Shutdown waited for the session to tear down before returning.
    assert!(!client.request_path.exists());
    assert!(!client.response_path.exists());
    assert!(!registry.exists());
}

#[tokio::test]
async fn test_shutdown_completes_with_backlogged_client() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    // A client that keeps both pipes open but never reads a reply.
    let request_path = dir.path().join("mute_req");
    let response_path = dir.path().join("mute_resp");
    fifo::create(&request_path).unwrap();
    fifo::create(&response_path).unwrap();
    let mut announce = fifo::open_sender(&registry).await.unwrap();
    let line = format!("{};{}\n", request_path.display(), response_path.display());
    announce.write_all(line.as_bytes()).await.unwrap();
    let mut request = fifo::open_sender(&request_path).await.unwrap();
    let _unread = fifo::open_bus(&response_path).unwrap();

    // Enough traffic to fill the response pipe and the outbox behind it,
    // leaving the session stuck mid-reply.
    let flood = "NOP\n".repeat(6000);
    request.write_all(flood.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    shutdown.send(()).unwrap();
    let done = timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown hung behind a non-reading client");
    done.unwrap().unwrap();
    assert!(!registry.exists());
}

#[tokio::test]
async fn test_bad_announcements_do_not_stop_the_listener() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, shutdown, handle) = start_server(dir.path()).await;

    // Garbage, then a well-formed line naming pipes that do not exist.
    let mut announce = fifo::open_sender(&registry).await.unwrap();
    announce.write_all(b"complete nonsense\n").await.unwrap();
    let ghost = format!(
        "{};{}\n",
        dir.path().join("ghost_req").display(),
        dir.path().join("ghost_resp").display()
    );
    announce.write_all(ghost.as_bytes()).await.unwrap();
    drop(announce);

    // Both lines are skipped and the next well-formed client connects.
    let mut client = TestClient::connect(&registry, dir.path(), "real").await;
    client.send("SUBSCRIBE|news").await;
    assert_eq!(client.recv().await, "SUBSCRIBED");

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_budget_delays_admission() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.server.max_sessions = 1;
    let (registry, shutdown, handle) = boot(config).await;

    let mut first = TestClient::connect(&registry, dir.path(), "first").await;
    first.send("SUBSCRIBE|slot").await;
    assert_eq!(first.recv().await, "SUBSCRIBED");

    // The budget is spent; the next registration must wait for a slot
    // instead of completing its handshake.
    let registry_path = registry.clone();
    let client_dir = dir.path().to_path_buf();
    let mut admission = tokio::spawn(async move {
        TestClient::connect(&registry_path, &client_dir, "second").await
    });
    let early = timeout(Duration::from_millis(300), &mut admission).await;
    assert!(early.is_err(), "second client admitted past the budget");

    first.send("DISCONNECT").await;
    assert_eq!(first.recv().await, "DISCONNECTED");

    let mut second = timeout(Duration::from_secs(5), &mut admission)
        .await
        .expect("second client never admitted after the slot freed")
        .unwrap();
    second.send("SUBSCRIBE|slot").await;
    assert_eq!(second.recv().await, "SUBSCRIBED");

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
