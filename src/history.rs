//! Recorded events for a run, used to seed state before the live stream
//! catches up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::envelope::{decode_envelope, RawEnvelope};
use crate::logging::{self, obj, v_num, v_str, Domain};
use crate::retry::{is_retryable_http_status, retry_async, RetryConfig};

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self, run_id: &str) -> Result<Vec<RawEnvelope>>;
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpHistory {
    client: Client,
    config: Config,
    retry: RetryConfig,
}

/// Outcome of one attempt: the outer error is retried, the inner one is not.
type Attempt = Result<Result<Value>>;

impl HttpHistory {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.history_timeout_secs))
            .build()?;
        let retry = RetryConfig::with_retries(config.history_retries);
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = anyhow!("history fetch failed ({}): {}", status, body);
            return if is_retryable_http_status(status.as_u16()) {
                Err(err)
            } else {
                Ok(Err(err))
            };
        }
        Ok(Ok(resp.json::<Value>().await?))
    }
}

#[async_trait]
impl EventSource for HttpHistory {
    async fn fetch_events(&self, run_id: &str) -> Result<Vec<RawEnvelope>> {
        let url = self.config.history_endpoint(run_id)?;
        let body = retry_async(&self.retry, "fetch_history", || self.attempt(url.as_str())).await??;
        let events = envelopes_from_body(body)?;
        logging::info(
            Domain::History,
            "fetched",
            obj(&[("run_id", v_str(run_id)), ("count", v_num(events.len() as f64))]),
        );
        Ok(events)
    }
}

/// Accepts a bare array or `{"events": [...]}`. Undecodable entries are skipped.
pub fn envelopes_from_body(body: Value) -> Result<Vec<RawEnvelope>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("history body has no events array")),
        },
        _ => return Err(anyhow!("history body is not a list of events")),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawEnvelope>(item) {
            Ok(env) => Some(env),
            Err(e) => {
                logging::warn(Domain::History, "skip_entry", obj(&[("error", v_str(&e.to_string()))]));
                None
            }
        })
        .collect())
}

// =============================================================================
// JSONL file
// =============================================================================

/// One envelope per line. Blank lines are ignored, malformed ones skipped.
pub fn read_jsonl(path: &Path) -> Result<Vec<RawEnvelope>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decode_envelope(line) {
            Ok(env) => out.push(env),
            Err(e) => logging::warn(
                Domain::History,
                "skip_line",
                obj(&[("line", v_num((idx + 1) as f64)), ("error", v_str(&e.to_string()))]),
            ),
        }
    }
    Ok(out)
}

pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventSource for JsonlHistory {
    async fn fetch_events(&self, run_id: &str) -> Result<Vec<RawEnvelope>> {
        let events = read_jsonl(&self.path)?;
        Ok(events.into_iter().filter(|e| e.run_id == run_id).collect())
    }
}
