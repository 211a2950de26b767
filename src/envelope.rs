//! Wire envelope received over a run stream, plus the typed view of its payload.
//!
//! Decoding is two-stage: the envelope itself (`decode_envelope`) and then the
//! payload for the envelope's tag (`RawEnvelope::typed_payload`). A failure in
//! either stage is a drop outcome for that one envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("envelope is malformed: {0}")]
    Malformed(String),
    #[error("payload for {event_type} is invalid: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Activity,
    ToolCall,
    ToolResult,
    LlmCall,
    TaskState,
    System,
    TaskOutput,
    /// Any tag this build does not know about yet.
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Activity => "activity",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
            EventType::LlmCall => "llm_call",
            EventType::TaskState => "task_state",
            EventType::System => "system",
            EventType::TaskOutput => "task_output",
            EventType::Other(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "activity" => EventType::Activity,
            "tool_call" => EventType::ToolCall,
            "tool_result" => EventType::ToolResult,
            "llm_call" => EventType::LlmCall,
            "task_state" => EventType::TaskState,
            "system" => EventType::System,
            "task_output" => EventType::TaskOutput,
            _ => EventType::Other(raw),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "warning" | "warn" => Severity::Warning,
            "error" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
        .to_string()
    }
}

/// Raw event as produced by the backend. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub event_id: String,
    pub run_id: String,
    pub event_type: EventType,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActivityPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallPayload {
    pub tool_name: String,
    #[serde(default)]
    pub input_data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolResultPayload {
    #[serde(default)]
    pub tool_name: Option<String>,
    pub output_data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmCallPayload {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskStatePayload {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskOutputPayload {
    #[serde(default)]
    pub output: Value,
}

/// Payload validated against the envelope's `event_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Activity(ActivityPayload),
    ToolCall(ToolCallPayload),
    ToolResult(ToolResultPayload),
    LlmCall(LlmCallPayload),
    TaskState(TaskStatePayload),
    System(SystemPayload),
    TaskOutput(TaskOutputPayload),
    Other(Value),
}

impl RawEnvelope {
    pub fn typed_payload(&self) -> Result<EventPayload, EnvelopeError> {
        let p = &self.payload;
        let typed = match &self.event_type {
            EventType::Activity => EventPayload::Activity(self.payload_as(p)?),
            EventType::ToolCall => EventPayload::ToolCall(self.payload_as(p)?),
            EventType::ToolResult => EventPayload::ToolResult(self.payload_as(p)?),
            EventType::LlmCall => EventPayload::LlmCall(self.payload_as(p)?),
            EventType::TaskState => EventPayload::TaskState(self.payload_as(p)?),
            EventType::System => EventPayload::System(self.payload_as(p)?),
            EventType::TaskOutput => EventPayload::TaskOutput(self.payload_as(p)?),
            EventType::Other(_) => EventPayload::Other(p.clone()),
        };
        Ok(typed)
    }

    fn payload_as<T: for<'de> Deserialize<'de>>(&self, payload: &Value) -> Result<T, EnvelopeError> {
        T::deserialize(payload).map_err(|e| EnvelopeError::InvalidPayload {
            event_type: self.event_type.as_str().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Decode one inbound text frame into an envelope.
pub fn decode_envelope(text: &str) -> Result<RawEnvelope, EnvelopeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(EnvelopeError::Malformed("expected a JSON object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}
