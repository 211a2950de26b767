use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::connection::Subject;

#[derive(Debug, Clone)]
pub struct Config {
    pub stream_base: String,
    pub api_base: String,
    pub run_path_template: String,
    pub channel_path_template: String,
    pub history_path_template: String,
    pub reconnect_delay_ms: u64,
    pub history_retries: u32,
    pub history_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_base: "ws://localhost:8000".to_string(),
            api_base: "http://localhost:8000".to_string(),
            run_path_template: "/ws/runs/{run_id}".to_string(),
            channel_path_template: "/ws/{channel}".to_string(),
            history_path_template: "/api/runs/{run_id}/events".to_string(),
            reconnect_delay_ms: 3000,
            history_retries: 3,
            history_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stream_base: std::env::var("STREAM_BASE_URL").unwrap_or(d.stream_base),
            api_base: std::env::var("API_BASE_URL").unwrap_or(d.api_base),
            run_path_template: std::env::var("RUN_PATH_TEMPLATE").unwrap_or(d.run_path_template),
            channel_path_template: std::env::var("CHANNEL_PATH_TEMPLATE").unwrap_or(d.channel_path_template),
            history_path_template: std::env::var("HISTORY_PATH_TEMPLATE").unwrap_or(d.history_path_template),
            reconnect_delay_ms: std::env::var("RECONNECT_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_delay_ms),
            history_retries: std::env::var("HISTORY_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(d.history_retries),
            history_timeout_secs: std::env::var("HISTORY_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.history_timeout_secs),
        }
    }

    /// Stream endpoint for a subject: base address joined with the subject's path.
    pub fn endpoint(&self, subject: &Subject) -> Result<Url> {
        match subject {
            Subject::Run(run_id) => build(&self.stream_base, &self.run_path_template, "{run_id}", run_id),
            Subject::Channel { name, .. } => {
                build(&self.stream_base, &self.channel_path_template, "{channel}", name)
            }
        }
    }

    /// Request/response endpoint for the recorded events of a run.
    pub fn history_endpoint(&self, run_id: &str) -> Result<Url> {
        build(&self.api_base, &self.history_path_template, "{run_id}", run_id)
    }
}

/// Replace the base path with the template's segments. The parameter fills
/// whole segments and is percent-encoded, so it can never add segments, a
/// query or a fragment.
fn build(base: &str, template: &str, placeholder: &str, value: &str) -> Result<Url> {
    if value.is_empty() || value == "." || value == ".." {
        bail!("invalid path parameter {:?}", value);
    }
    let mut url = Url::parse(base).with_context(|| format!("invalid base url {}", base))?;
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("base url {} cannot carry a path", base))?;
        segments.clear();
        for segment in template.split('/').filter(|s| !s.is_empty()) {
            segments.push(&segment.replace(placeholder, value));
        }
    }
    Ok(url)
}
