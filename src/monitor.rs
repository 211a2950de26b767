//! Feature-level wiring: connection callbacks -> decode -> normalize -> state.
//!
//! A `RunMonitor` owns the step sequence for one run and a `TickerMonitor` owns the
//! price board for one channel. Both are the `ConnectionListener` for their
//! subscription and publish a version counter and a connected flag through
//! `tokio::sync::watch` so readers never poll the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::watch;

use crate::config::Config;
use crate::connection::{ConnectionListener, ConnectionManager, Subject, SubscriptionHandle, Transport};
use crate::envelope::{decode_envelope, RawEnvelope};
use crate::history::EventSource;
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::normalize::classify;
use crate::sequencer::{AppendOutcome, StepSequencer, StepSnapshot};
use crate::ticker::{normalize_tick, PriceTick, TickerBoard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub received: u64,
    pub appended: u64,
    pub replaced: u64,
    pub duplicates: u64,
    pub no_step: u64,
    pub malformed: u64,
    pub foreign_run: u64,
}

#[derive(Default)]
struct RunState {
    sequencer: StepSequencer,
    stats: FeedStats,
}

/// Step state for one run. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RunMonitor {
    run_id: String,
    state: Arc<Mutex<RunState>>,
    version: Arc<watch::Sender<u64>>,
    connected: Arc<watch::Sender<bool>>,
}

impl RunMonitor {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: Arc::new(Mutex::new(RunState::default())),
            version: Arc::new(watch::channel(0).0),
            connected: Arc::new(watch::channel(false).0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Decode and ingest one inbound frame. A bad frame is logged and dropped.
    pub fn ingest_text(&self, text: &str) -> AppendOutcome {
        match decode_envelope(text) {
            Ok(env) => self.ingest(&env),
            Err(e) => {
                self.with_state(|s| {
                    s.stats.received += 1;
                    s.stats.malformed += 1;
                });
                logging::warn(
                    Domain::Normalize,
                    "drop_malformed",
                    obj(&[("run_id", v_str(&self.run_id)), ("error", v_str(&e.to_string()))]),
                );
                AppendOutcome::Skipped
            }
        }
    }

    pub fn ingest(&self, env: &RawEnvelope) -> AppendOutcome {
        if env.run_id != self.run_id {
            self.with_state(|s| {
                s.stats.received += 1;
                s.stats.foreign_run += 1;
            });
            logging::debug(
                Domain::Normalize,
                "drop_foreign_run",
                obj(&[("run_id", v_str(&self.run_id)), ("event_id", v_str(&env.event_id))]),
            );
            return AppendOutcome::Skipped;
        }

        let step = match classify(env) {
            Ok(step) => step,
            Err(e) => {
                self.with_state(|s| {
                    s.stats.received += 1;
                    s.stats.malformed += 1;
                });
                logging::warn(
                    Domain::Normalize,
                    "drop_invalid_payload",
                    obj(&[("event_id", v_str(&env.event_id)), ("error", v_str(&e.to_string()))]),
                );
                return AppendOutcome::Skipped;
            }
        };

        let outcome = self.with_state(|s| {
            s.stats.received += 1;
            let outcome = s.sequencer.append(step);
            match outcome {
                AppendOutcome::Appended => s.stats.appended += 1,
                AppendOutcome::Replaced => s.stats.replaced += 1,
                AppendOutcome::Unchanged => s.stats.duplicates += 1,
                AppendOutcome::Skipped => s.stats.no_step += 1,
            }
            outcome
        });
        match outcome {
            AppendOutcome::Appended | AppendOutcome::Replaced => {
                self.version.send_modify(|v| *v += 1);
            }
            AppendOutcome::Unchanged => logging::debug(
                Domain::Sequence,
                "duplicate",
                obj(&[("event_id", v_str(&env.event_id))]),
            ),
            AppendOutcome::Skipped => {}
        }
        outcome
    }

    /// Ingest recorded events ahead of the live stream. Returns how many
    /// produced new steps.
    pub fn seed(&self, events: &[RawEnvelope]) -> usize {
        let added = events
            .iter()
            .filter(|env| self.ingest(env) == AppendOutcome::Appended)
            .count();
        logging::info(
            Domain::Sequence,
            "seeded",
            obj(&[
                ("run_id", v_str(&self.run_id)),
                ("events", v_num(events.len() as f64)),
                ("steps", v_num(added as f64)),
            ]),
        );
        added
    }

    pub fn snapshot(&self) -> StepSnapshot {
        self.with_state(|s| s.sequencer.snapshot())
    }

    /// Drop all steps, e.g. when monitoring of the run restarts.
    pub fn clear(&self) {
        self.with_state(|s| s.sequencer.clear());
        self.version.send_modify(|v| *v += 1);
    }

    pub fn stats(&self) -> FeedStats {
        self.with_state(|s| s.stats)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Bumped on every change to the step sequence.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl ConnectionListener for RunMonitor {
    fn on_open(&self, _subject: &Subject) {
        self.connected.send_replace(true);
    }

    fn on_message(&self, _subject: &Subject, text: &str) {
        self.ingest_text(text);
    }

    fn on_close(&self, _subject: &Subject) {
        self.connected.send_replace(false);
    }

    fn on_error(&self, _subject: &Subject, _error: &str) {
        self.connected.send_replace(false);
    }
}

/// Latest prices for one channel subscription.
#[derive(Clone)]
pub struct TickerMonitor {
    board: Arc<Mutex<TickerBoard>>,
    version: Arc<watch::Sender<u64>>,
    connected: Arc<watch::Sender<bool>>,
}

impl Default for TickerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TickerMonitor {
    pub fn new() -> Self {
        Self {
            board: Arc::new(Mutex::new(TickerBoard::new())),
            version: Arc::new(watch::channel(0).0),
            connected: Arc::new(watch::channel(false).0),
        }
    }

    pub fn ingest_text(&self, text: &str) -> bool {
        let Some(tick) = normalize_tick(text) else {
            return false;
        };
        let applied = match self.board.lock() {
            Ok(mut board) => board.apply(tick),
            Err(poisoned) => poisoned.into_inner().apply(tick),
        };
        if applied {
            self.version.send_modify(|v| *v += 1);
        }
        applied
    }

    pub fn snapshot(&self) -> Vec<PriceTick> {
        match self.board.lock() {
            Ok(board) => board.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn updates(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl ConnectionListener for TickerMonitor {
    fn on_open(&self, _subject: &Subject) {
        self.connected.send_replace(true);
    }

    fn on_message(&self, _subject: &Subject, text: &str) {
        self.ingest_text(text);
    }

    fn on_close(&self, _subject: &Subject) {
        self.connected.send_replace(false);
    }

    fn on_error(&self, _subject: &Subject, _error: &str) {
        self.connected.send_replace(false);
    }
}

/// Activates and deactivates monitors by subject over one connection manager.
pub struct Session {
    manager: ConnectionManager,
    handles: HashMap<String, SubscriptionHandle>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            manager: ConnectionManager::new(transport, config),
            handles: HashMap::new(),
        }
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            manager,
            handles: HashMap::new(),
        }
    }

    /// Seed from `history` when given, then open the live stream. A failed
    /// history fetch is logged and the stream still opens.
    pub async fn watch_run(&mut self, run_id: &str, history: Option<&dyn EventSource>) -> Result<RunMonitor> {
        let monitor = RunMonitor::new(run_id);
        if let Some(source) = history {
            match source.fetch_events(run_id).await {
                Ok(events) => {
                    monitor.seed(&events);
                }
                Err(e) => logging::warn(
                    Domain::History,
                    "seed_failed",
                    obj(&[("run_id", v_str(run_id)), ("error", v_str(&e.to_string()))]),
                ),
            }
        }
        let subject = Subject::run(run_id);
        let handle = self.manager.open(subject.clone(), Arc::new(monitor.clone()))?;
        self.handles.insert(subject.key(), handle);
        Ok(monitor)
    }

    pub fn watch_tickers(&mut self, channel: &str, tickers: Vec<String>) -> Result<TickerMonitor> {
        let monitor = TickerMonitor::new();
        let subject = Subject::channel(channel, tickers);
        let handle = self.manager.open(subject.clone(), Arc::new(monitor.clone()))?;
        self.handles.insert(subject.key(), handle);
        Ok(monitor)
    }

    /// Deactivate the monitor for a subject. Returns false if none was active.
    pub fn stop(&mut self, subject: &Subject) -> bool {
        match self.handles.remove(&subject.key()) {
            Some(handle) => self.manager.close(&handle),
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        self.handles.clear();
        self.manager.close_all();
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(id: &str, run: &str, event_type: &str, payload: serde_json::Value) -> String {
        json!({
            "event_id": id,
            "run_id": run,
            "event_type": event_type,
            "timestamp": "2024-05-01T10:00:00Z",
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn counts_every_drop_reason() {
        let monitor = RunMonitor::new("r1");
        monitor.ingest_text("{broken");
        monitor.ingest_text(&frame("a", "r2", "activity", json!({"message": "x"})));
        monitor.ingest_text(&frame("b", "r1", "activity", json!({})));
        monitor.ingest_text(&frame("c", "r1", "task_state", json!({"state": "done"})));
        monitor.ingest_text(&frame("d", "r1", "activity", json!({"message": "ok"})));
        monitor.ingest_text(&frame("d", "r1", "activity", json!({"message": "ok"})));

        let stats = monitor.stats();
        assert_eq!(
            stats,
            FeedStats {
                received: 6,
                appended: 1,
                replaced: 0,
                duplicates: 1,
                no_step: 1,
                malformed: 2,
                foreign_run: 1,
            }
        );
        assert_eq!(monitor.snapshot().ids(), vec!["d"]);
    }

    #[test]
    fn version_moves_only_on_sequence_changes() {
        let monitor = RunMonitor::new("r1");
        let rx = monitor.updates();
        monitor.ingest_text(&frame("a", "r1", "system", json!({})));
        assert_eq!(*rx.borrow(), 0);
        monitor.ingest_text(&frame("a", "r1", "activity", json!({"message": "x"})));
        assert_eq!(*rx.borrow(), 1);
        monitor.clear();
        assert_eq!(*rx.borrow(), 2);
        assert!(monitor.snapshot().is_empty());
    }

    #[test]
    fn connected_flag_follows_callbacks() {
        let monitor = RunMonitor::new("r1");
        let subject = Subject::run("r1");
        assert!(!monitor.is_connected());
        monitor.on_open(&subject);
        assert!(monitor.is_connected());
        monitor.on_error(&subject, "reset");
        assert!(!monitor.is_connected());
    }

    #[test]
    fn ticker_monitor_ignores_non_price_frames() {
        let monitor = TickerMonitor::new();
        assert!(!monitor.ingest_text(r#"{"type":"subscribed"}"#));
        assert!(monitor.ingest_text(r#"{"type":"price_update","ticker":"AAPL","price":1.0}"#));
        assert_eq!(monitor.snapshot().len(), 1);
        assert_eq!(*monitor.updates().borrow(), 1);
    }
}
