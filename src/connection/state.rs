//! Reconnect lifecycle as an explicit state machine.
//!
//! The driver feeds transport outcomes and timer expiry in as `Transition`s and
//! acts on the returned `Effect`. No I/O happens here.

use rand::Rng;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    BackoffWait,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Transport handshake completed.
    Connected,
    /// Connect attempt failed.
    Failed,
    /// An open connection ended without the caller asking.
    Dropped,
    /// Backoff delay elapsed.
    TimerFired,
    /// Caller-initiated close.
    CloseRequested,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    None,
    Connect,
    ScheduleReconnect(Duration),
    /// Retry budget exhausted.
    GiveUp,
    Teardown,
}

#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    /// Spread of the delay as a fraction of it; 0.0 keeps the delay flat.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_retries: None,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn flat(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Jitter factors outside `0.0..=1.0` are clamped; non-finite ones disable jitter.
    pub fn delay(&self) -> Duration {
        if !self.jitter_factor.is_finite() || self.jitter_factor <= 0.0 {
            return self.delay;
        }
        let base = self.delay.as_millis() as f64;
        let range = base * self.jitter_factor.min(1.0);
        let jitter: f64 = rand::thread_rng().gen_range(-range..=range);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ConnState,
    retry_count: u32,
    policy: ReconnectPolicy,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnState::Connecting,
            retry_count: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn on(&mut self, transition: Transition) -> Effect {
        match (self.state, transition) {
            (ConnState::Closed, _) => Effect::None,
            (_, Transition::CloseRequested) => {
                self.state = ConnState::Closed;
                Effect::Teardown
            }
            (ConnState::Connecting, Transition::Connected) => {
                self.state = ConnState::Open;
                self.retry_count = 0;
                Effect::None
            }
            (ConnState::Connecting, Transition::Failed) | (ConnState::Open, Transition::Dropped) => {
                self.backoff()
            }
            (ConnState::BackoffWait, Transition::TimerFired) => {
                self.state = ConnState::Connecting;
                Effect::Connect
            }
            // Anything else is stale input for the current state.
            _ => Effect::None,
        }
    }

    fn backoff(&mut self) -> Effect {
        if let Some(max) = self.policy.max_retries {
            if self.retry_count >= max {
                self.state = ConnState::Closed;
                return Effect::GiveUp;
            }
        }
        self.retry_count += 1;
        self.state = ConnState::BackoffWait;
        Effect::ScheduleReconnect(self.policy.delay())
    }
}
