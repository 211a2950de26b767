//! Duplex stream subscriptions, one per subject.
//!
//! ```text
//! ConnectionManager::open(subject)
//!     └─ spawned driver ── Transport::connect ──► Connection::recv ──► listener.on_message
//!            ▲                                        │ drop / error
//!            └──────── ReconnectMachine (flat delay) ◄┘
//! ```

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::{ConnectionListener, ConnectionManager, SubscriptionHandle, SubscriptionStatus};
pub use state::{ConnState, Effect, ReconnectMachine, ReconnectPolicy, Transition};
pub use transport::{Connection, MemoryPeer, MemoryTransport, Transport, WsTransport};

use serde_json::json;

/// What a subscription is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Run(String),
    Channel { name: String, tickers: Vec<String> },
}

impl Subject {
    pub fn run(run_id: impl Into<String>) -> Self {
        Subject::Run(run_id.into())
    }

    pub fn channel(name: impl Into<String>, tickers: Vec<String>) -> Self {
        Subject::Channel {
            name: name.into(),
            tickers,
        }
    }

    /// Identity used for the one-live-subscription rule. Ticker lists do not
    /// take part: reopening a channel with new tickers replaces the old socket.
    pub fn key(&self) -> String {
        match self {
            Subject::Run(id) => format!("run:{}", id),
            Subject::Channel { name, .. } => format!("channel:{}", name),
        }
    }

    /// Control message to send each time the connection opens, if any.
    pub fn subscribe_message(&self) -> Option<String> {
        match self {
            Subject::Channel { tickers, .. } if !tickers.is_empty() => {
                Some(json!({"action": "subscribe", "tickers": tickers}).to_string())
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
