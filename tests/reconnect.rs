//! Subscription lifecycle against a scripted in-memory transport, on tokio's
//! paused clock so the flat reconnect delay elapses instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use runstream::config::Config;
use runstream::connection::{
    ConnState, ConnectionListener, ConnectionManager, MemoryTransport, ReconnectPolicy, Subject,
};
use tokio::time::sleep;

const DELAY: Duration = Duration::from_millis(3000);

#[derive(Default)]
struct Log(Mutex<Vec<String>>);

impl Log {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ConnectionListener for Log {
    fn on_open(&self, _subject: &Subject) {
        self.0.lock().unwrap().push("open".into());
    }
    fn on_message(&self, _subject: &Subject, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
    fn on_close(&self, _subject: &Subject) {
        self.0.lock().unwrap().push("close".into());
    }
    fn on_error(&self, _subject: &Subject, error: &str) {
        self.0.lock().unwrap().push(format!("error:{}", error));
    }
}

fn envelope(id: &str) -> String {
    serde_json::json!({
        "event_id": id,
        "run_id": "r1",
        "event_type": "activity",
        "timestamp": "2024-05-01T10:00:00Z",
        "payload": {"message": id},
    })
    .to_string()
}

async fn settle() {
    sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_reconnects_after_the_fixed_delay() {
    let transport = MemoryTransport::new();
    let first = transport.queue_connection();
    let second = transport.queue_connection();
    let mut mgr = ConnectionManager::new(Arc::new(transport.clone()), Config::default());
    let log = Arc::new(Log::default());
    let handle = mgr.open(Subject::run("r1"), log.clone()).unwrap();
    settle().await;

    assert!(first.send(envelope("a")));
    assert!(first.send(envelope("b")));
    settle().await;
    drop(first);
    settle().await;

    assert_eq!(log.take(), vec!["open".to_string(), envelope("a"), envelope("b"), "close".to_string()]);
    assert_eq!(mgr.status(&handle).unwrap().state, ConnState::BackoffWait);

    sleep(DELAY / 2).await;
    assert_eq!(transport.attempts().len(), 1, "no attempt before the delay elapses");

    sleep(DELAY / 2).await;
    settle().await;
    assert_eq!(transport.attempts().len(), 2);
    assert_eq!(log.take(), vec!["open"]);
    let status = mgr.status(&handle).unwrap();
    assert_eq!(status.state, ConnState::Open);
    assert_eq!(status.retry_count, 0);

    assert!(second.send(envelope("c")));
    settle().await;
    assert_eq!(log.take(), vec![envelope("c")]);
}

#[tokio::test(start_paused = true)]
async fn explicit_close_during_backoff_suppresses_the_retry() {
    let transport = MemoryTransport::new();
    let first = transport.queue_connection();
    let _second = transport.queue_connection();
    let mut mgr = ConnectionManager::new(Arc::new(transport.clone()), Config::default());
    let log = Arc::new(Log::default());
    let handle = mgr.open(Subject::run("r1"), log.clone()).unwrap();
    settle().await;

    drop(first);
    settle().await;
    assert!(mgr.close(&handle));
    log.take();

    sleep(DELAY * 3).await;
    assert_eq!(transport.attempts().len(), 1);
    assert!(log.take().is_empty(), "no callbacks after close");
    assert!(mgr.status(&handle).is_none());
    assert!(!mgr.is_live(&Subject::run("r1")));
}

#[tokio::test(start_paused = true)]
async fn bounded_policy_gives_up() {
    let transport = MemoryTransport::new();
    let policy = ReconnectPolicy {
        max_retries: Some(2),
        ..ReconnectPolicy::flat(Duration::from_millis(100))
    };
    let mut mgr = ConnectionManager::with_policy(Arc::new(transport.clone()), Config::default(), policy);
    let handle = mgr.open(Subject::run("r1"), Arc::new(Log::default())).unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.attempts().len(), 3);
    assert_eq!(mgr.status(&handle).unwrap().state, ConnState::Closed);
    assert!(!mgr.is_live(&Subject::run("r1")));
}

#[tokio::test(start_paused = true)]
async fn subjects_connect_to_their_own_endpoints() {
    let transport = MemoryTransport::new();
    let _run = transport.queue_connection();
    let _prices = transport.queue_connection();
    let mut mgr = ConnectionManager::new(Arc::new(transport.clone()), Config::default());
    mgr.open(Subject::run("r1"), Arc::new(Log::default())).unwrap();
    settle().await;
    mgr.open(Subject::channel("prices", vec!["AAPL".into()]), Arc::new(Log::default()))
        .unwrap();
    settle().await;

    let urls: Vec<String> = transport.attempts().iter().map(|u| u.to_string()).collect();
    assert_eq!(urls, vec!["ws://localhost:8000/ws/runs/r1", "ws://localhost:8000/ws/prices"]);
    assert_eq!(mgr.live_count(), 2);
    mgr.close_all();
    assert_eq!(mgr.live_count(), 0);
}
