use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;

use super::state::{ConnState, Effect, ReconnectMachine, ReconnectPolicy, Transition};
use super::transport::{Connection, Transport};
use super::Subject;
use crate::config::Config;
use crate::logging::{self, obj, v_num, v_str, Domain};

/// Lifecycle callbacks for one subscription. Called from the subscription's
/// driver task, in arrival order, and never after `close` returns: `close`
/// waits for a callback already in progress. A callback must therefore not
/// close its own subscription.
pub trait ConnectionListener: Send + Sync {
    fn on_open(&self, _subject: &Subject) {}
    fn on_message(&self, subject: &Subject, text: &str);
    fn on_close(&self, _subject: &Subject) {}
    fn on_error(&self, _subject: &Subject, _error: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    subject: Subject,
    id: u64,
}

impl SubscriptionHandle {
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub state: ConnState,
    pub retry_count: u32,
}

struct Shared {
    closed: AtomicBool,
    /// Held for the closed-check and the callback together.
    delivery: Mutex<()>,
    state: Mutex<ConnState>,
    retry_count: AtomicU32,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Not closed by the caller and not given up by the reconnect policy.
    fn is_active(&self) -> bool {
        !self.is_closed() && self.status().state != ConnState::Closed
    }

    fn publish(&self, machine: &ReconnectMachine) {
        if let Ok(mut state) = self.state.lock() {
            *state = machine.state();
        }
        self.retry_count.store(machine.retry_count(), Ordering::SeqCst);
    }

    fn status(&self) -> SubscriptionStatus {
        let state = self.state.lock().map(|s| *s).unwrap_or(ConnState::Closed);
        SubscriptionStatus {
            state,
            retry_count: self.retry_count.load(Ordering::SeqCst),
        }
    }
}

struct LiveSubscription {
    handle: SubscriptionHandle,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    fn shutdown(self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        // Wait out a callback running on another worker.
        drop(self.shared.delivery.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        if let Ok(mut state) = self.shared.state.lock() {
            *state = ConnState::Closed;
        }
        // Cancels a pending reconnect timer or an in-flight read.
        self.task.abort();
    }
}

/// Owns at most one live subscription per subject.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: Config,
    policy: ReconnectPolicy,
    subs: HashMap<String, LiveSubscription>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        let policy = ReconnectPolicy::flat(std::time::Duration::from_millis(config.reconnect_delay_ms));
        Self::with_policy(transport, config, policy)
    }

    pub fn with_policy(transport: Arc<dyn Transport>, config: Config, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            config,
            policy,
            subs: HashMap::new(),
            next_id: 0,
        }
    }

    /// Start a subscription. A live subscription for the same subject is
    /// closed first. Must be called from within a tokio runtime.
    pub fn open(
        &mut self,
        subject: Subject,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<SubscriptionHandle> {
        let url = self.config.endpoint(&subject)?;
        let key = subject.key();
        if let Some(previous) = self.subs.remove(&key) {
            logging::info(
                Domain::Transport,
                "replace",
                obj(&[("subject", v_str(&key)), ("previous_id", v_num(previous.handle.id as f64))]),
            );
            previous.shutdown();
        }

        self.next_id += 1;
        let handle = SubscriptionHandle {
            subject: subject.clone(),
            id: self.next_id,
        };
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            delivery: Mutex::new(()),
            state: Mutex::new(ConnState::Connecting),
            retry_count: AtomicU32::new(0),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            transport: Arc::clone(&self.transport),
            url,
            subject,
            listener,
            shared: Arc::clone(&shared),
            outbound: outbound_rx,
        };
        let task = tokio::spawn(driver.run(ReconnectMachine::new(self.policy.clone())));

        self.subs.insert(
            key,
            LiveSubscription {
                handle: handle.clone(),
                shared,
                outbound,
                task,
            },
        );
        Ok(handle)
    }

    /// Caller-initiated close. Stops callbacks and any pending reconnect.
    /// Returns false when the handle is stale (already closed or replaced).
    pub fn close(&mut self, handle: &SubscriptionHandle) -> bool {
        let key = handle.subject.key();
        match self.subs.get(&key) {
            Some(live) if live.handle == *handle => {}
            _ => return false,
        }
        if let Some(live) = self.subs.remove(&key) {
            live.shutdown();
            logging::info(Domain::Transport, "close", obj(&[("subject", v_str(&key))]));
        }
        true
    }

    pub fn close_all(&mut self) {
        for (key, live) in self.subs.drain() {
            live.shutdown();
            logging::info(Domain::Transport, "close", obj(&[("subject", v_str(&key))]));
        }
    }

    /// Queue a control message. It is written on the current connection, or on
    /// the next one if the subscription is between connections.
    pub fn send(&self, handle: &SubscriptionHandle, text: impl Into<String>) -> bool {
        match self.subs.get(&handle.subject.key()) {
            Some(live) if live.handle == *handle => live.outbound.send(text.into()).is_ok(),
            _ => false,
        }
    }

    pub fn status(&self, handle: &SubscriptionHandle) -> Option<SubscriptionStatus> {
        self.subs
            .get(&handle.subject.key())
            .filter(|live| live.handle == *handle)
            .map(|live| live.shared.status())
    }

    /// False once the subscription was closed or its retry budget ran out.
    pub fn is_live(&self, subject: &Subject) -> bool {
        self.subs
            .get(&subject.key())
            .map_or(false, |live| live.shared.is_active())
    }

    pub fn live_count(&self) -> usize {
        self.subs.values().filter(|live| live.shared.is_active()).count()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for (_, live) in self.subs.drain() {
            live.shutdown();
        }
    }
}

enum PumpExit {
    PeerClosed,
    Failed(String),
    Cancelled,
}

struct Driver {
    transport: Arc<dyn Transport>,
    url: Url,
    subject: Subject,
    listener: Arc<dyn ConnectionListener>,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Driver {
    async fn run(mut self, mut machine: ReconnectMachine) {
        let key = self.subject.key();
        loop {
            self.shared.publish(&machine);
            logging::debug(
                Domain::Transport,
                "connecting",
                obj(&[
                    ("subject", v_str(&key)),
                    ("url", v_str(self.url.as_str())),
                    ("retry_count", v_num(machine.retry_count() as f64)),
                ]),
            );

            let effect = match self.transport.connect(&self.url).await {
                Ok(mut conn) => {
                    machine.on(Transition::Connected);
                    self.shared.publish(&machine);
                    if self.shared.is_closed() {
                        conn.close().await;
                        return;
                    }
                    logging::info(Domain::Transport, "open", obj(&[("subject", v_str(&key))]));
                    self.deliver(|l, s| l.on_open(s));

                    let exit = self.pump(conn.as_mut()).await;
                    match exit {
                        PumpExit::Cancelled => {
                            conn.close().await;
                            return;
                        }
                        PumpExit::Failed(err) => {
                            logging::warn(
                                Domain::Transport,
                                "stream_error",
                                obj(&[("subject", v_str(&key)), ("error", v_str(&err))]),
                            );
                            self.deliver(|l, s| l.on_error(s, &err));
                        }
                        PumpExit::PeerClosed => {}
                    }
                    logging::info(Domain::Transport, "dropped", obj(&[("subject", v_str(&key))]));
                    self.deliver(|l, s| l.on_close(s));
                    machine.on(Transition::Dropped)
                }
                Err(err) => {
                    let err = err.to_string();
                    logging::warn(
                        Domain::Transport,
                        "connect_failed",
                        obj(&[("subject", v_str(&key)), ("error", v_str(&err))]),
                    );
                    self.deliver(|l, s| l.on_error(s, &err));
                    machine.on(Transition::Failed)
                }
            };
            self.shared.publish(&machine);

            match effect {
                Effect::ScheduleReconnect(delay) => {
                    logging::info(
                        Domain::Transport,
                        "reconnect_scheduled",
                        obj(&[
                            ("subject", v_str(&key)),
                            ("delay_ms", v_num(delay.as_millis() as f64)),
                            ("retry_count", v_num(machine.retry_count() as f64)),
                        ]),
                    );
                    sleep(delay).await;
                    if self.shared.is_closed() {
                        return;
                    }
                    machine.on(Transition::TimerFired);
                }
                Effect::GiveUp => {
                    logging::error(Domain::Transport, "retries_exhausted", obj(&[("subject", v_str(&key))]));
                    return;
                }
                Effect::None | Effect::Connect | Effect::Teardown => return,
            }
        }
    }

    async fn pump(&mut self, conn: &mut dyn Connection) -> PumpExit {
        if let Some(msg) = self.subject.subscribe_message() {
            if let Err(e) = conn.send(msg).await {
                return PumpExit::Failed(e.to_string());
            }
        }
        loop {
            tokio::select! {
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => self.deliver(|l, s| l.on_message(s, &text)),
                    Some(Err(e)) => return PumpExit::Failed(e.to_string()),
                    None => return PumpExit::PeerClosed,
                },
                out = self.outbound.recv() => match out {
                    Some(text) => {
                        if let Err(e) = conn.send(text).await {
                            return PumpExit::Failed(e.to_string());
                        }
                    }
                    None => return PumpExit::Cancelled,
                },
            }
            if self.shared.is_closed() {
                return PumpExit::Cancelled;
            }
        }
    }

    fn deliver<F: FnOnce(&dyn ConnectionListener, &Subject)>(&self, f: F) {
        let _guard = self
            .shared
            .delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.shared.is_closed() {
            f(self.listener.as_ref(), &self.subject);
        }
    }
}
