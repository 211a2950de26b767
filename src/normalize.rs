//! Envelope -> step classification.
//!
//! `normalize` is pure: no I/O, no mutation of the envelope. Callers that want
//! to log why an envelope produced nothing use `classify`, which keeps the
//! payload validation error.

use serde::Serialize;
use serde_json::Value;

use crate::envelope::{EnvelopeError, EventPayload, LlmCallPayload, RawEnvelope};

const FINAL_ANSWER_MARKER: &str = "final answer:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    ToolCall,
    Observation,
    FinalAnswer,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Thought => "thought",
            StepKind::ToolCall => "tool_call",
            StepKind::Observation => "observation",
            StepKind::FinalAnswer => "final_answer",
        }
    }
}

/// One renderable step. `id` is the originating `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub timestamp: String,
}

impl NormalizedStep {
    fn from_envelope(env: &RawEnvelope, kind: StepKind) -> Self {
        Self {
            id: env.event_id.clone(),
            kind,
            content: None,
            // Top-level agent_name is authoritative; payload copies are ignored.
            agent_name: env.agent_name.clone(),
            tool_name: None,
            input: None,
            timestamp: env.timestamp.clone(),
        }
    }
}

/// Map an envelope to at most one step. Anything that is not a step is `None`.
pub fn normalize(env: &RawEnvelope) -> Option<NormalizedStep> {
    classify(env).ok().flatten()
}

/// Like `normalize`, but keeps the reason a payload failed validation.
pub fn classify(env: &RawEnvelope) -> Result<Option<NormalizedStep>, EnvelopeError> {
    let step = match env.typed_payload()? {
        EventPayload::Activity(p) => NormalizedStep {
            content: Some(p.message),
            ..NormalizedStep::from_envelope(env, StepKind::Thought)
        },
        EventPayload::ToolCall(p) => NormalizedStep {
            tool_name: Some(p.tool_name),
            input: Some(pretty(&p.input_data)),
            ..NormalizedStep::from_envelope(env, StepKind::ToolCall)
        },
        EventPayload::ToolResult(p) => NormalizedStep {
            content: Some(stringify(&p.output_data)),
            tool_name: p.tool_name,
            ..NormalizedStep::from_envelope(env, StepKind::Observation)
        },
        EventPayload::LlmCall(p) => llm_step(env, p),
        EventPayload::TaskState(_)
        | EventPayload::System(_)
        | EventPayload::TaskOutput(_)
        | EventPayload::Other(_) => return Ok(None),
    };
    Ok(Some(step))
}

fn llm_step(env: &RawEnvelope, p: LlmCallPayload) -> NormalizedStep {
    let succeeded = p.status.as_deref() == Some("success");
    let text = p.message.or(p.response);

    if succeeded {
        if let Some(answer) = text.as_deref().and_then(final_answer_text) {
            return NormalizedStep {
                content: Some(answer.to_string()),
                ..NormalizedStep::from_envelope(env, StepKind::FinalAnswer)
            };
        }
    }

    let content = text.unwrap_or_else(|| match p.model.as_deref() {
        Some(model) => format!("Calling {}", model),
        None => "Calling model".to_string(),
    });
    NormalizedStep {
        content: Some(content),
        ..NormalizedStep::from_envelope(env, StepKind::Thought)
    }
}

/// True when the content carries the final-answer marker.
pub fn is_final_answer(content: &str) -> bool {
    final_answer_text(content).is_some()
}

/// Text after the final-answer marker (case-insensitive), or the whole content
/// trimmed when nothing follows the marker.
pub fn final_answer_text(content: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `content`.
    let idx = content.to_ascii_lowercase().find(FINAL_ANSWER_MARKER)?;
    let rest = content[idx + FINAL_ANSWER_MARKER.len()..].trim();
    if rest.is_empty() {
        Some(content.trim())
    } else {
        Some(rest)
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(event_type: &str, agent: Option<&str>, payload: Value) -> RawEnvelope {
        let mut v = json!({
            "event_id": "evt-1",
            "run_id": "run-1",
            "event_type": event_type,
            "timestamp": "2024-05-01T10:00:00Z",
            "severity": "info",
            "payload": payload,
        });
        if let Some(a) = agent {
            v["agent_name"] = json!(a);
        }
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn activity_is_a_thought() {
        let step = normalize(&env("activity", Some("Planner"), json!({"message": "thinking"}))).unwrap();
        assert_eq!(step.kind, StepKind::Thought);
        assert_eq!(step.content.as_deref(), Some("thinking"));
        assert_eq!(step.agent_name.as_deref(), Some("Planner"));
        assert_eq!(step.id, "evt-1");
    }

    #[test]
    fn tool_call_pretty_prints_input() {
        let step = normalize(&env(
            "tool_call",
            Some("Researcher"),
            json!({"tool_name": "SearchNews", "input_data": {"query": "AAPL"}}),
        ))
        .unwrap();
        assert_eq!(step.kind, StepKind::ToolCall);
        assert_eq!(step.tool_name.as_deref(), Some("SearchNews"));
        assert_eq!(step.input.as_deref(), Some("{\n  \"query\": \"AAPL\"\n}"));
    }

    #[test]
    fn tool_result_stringifies_structured_output() {
        let step = normalize(&env("tool_result", None, json!({"output_data": {"price": 150}}))).unwrap();
        assert_eq!(step.kind, StepKind::Observation);
        assert_eq!(step.content.as_deref(), Some("{\"price\":150}"));
    }

    #[test]
    fn llm_success_with_marker_is_final_answer() {
        let step = normalize(&env(
            "llm_call",
            None,
            json!({"status": "success", "model": "gpt-4o", "message": "Thought: done\nFinal Answer: Buy AAPL"}),
        ))
        .unwrap();
        assert_eq!(step.kind, StepKind::FinalAnswer);
        assert_eq!(step.content.as_deref(), Some("Buy AAPL"));
    }

    #[test]
    fn llm_marker_without_success_stays_thought() {
        let step = normalize(&env(
            "llm_call",
            None,
            json!({"status": "started", "message": "Final Answer: maybe"}),
        ))
        .unwrap();
        assert_eq!(step.kind, StepKind::Thought);
        assert_eq!(step.content.as_deref(), Some("Final Answer: maybe"));
    }

    #[test]
    fn llm_without_message_synthesizes_label() {
        let step = normalize(&env("llm_call", None, json!({"model": "gpt-4o"}))).unwrap();
        assert_eq!(step.content.as_deref(), Some("Calling gpt-4o"));
        let step = normalize(&env("llm_call", None, json!({}))).unwrap();
        assert_eq!(step.content.as_deref(), Some("Calling model"));
    }

    #[test]
    fn llm_falls_back_to_response_text() {
        let step = normalize(&env(
            "llm_call",
            None,
            json!({"status": "success", "response": "final answer: 42"}),
        ))
        .unwrap();
        assert_eq!(step.kind, StepKind::FinalAnswer);
        assert_eq!(step.content.as_deref(), Some("42"));
    }

    #[test]
    fn non_step_types_drop() {
        for t in ["task_state", "system", "task_output", "mystery"] {
            assert!(normalize(&env(t, None, json!({}))).is_none(), "{}", t);
        }
    }

    #[test]
    fn invalid_payload_drops_but_classify_reports() {
        let e = env("activity", None, json!({"msg": "wrong key"}));
        assert!(normalize(&e).is_none());
        assert!(classify(&e).is_err());
    }

    #[test]
    fn payload_agent_name_is_ignored() {
        let step = normalize(&env(
            "activity",
            Some("TopLevel"),
            json!({"message": "m", "agent_name": "Inner"}),
        ))
        .unwrap();
        assert_eq!(step.agent_name.as_deref(), Some("TopLevel"));

        let step = normalize(&env("activity", None, json!({"message": "m", "agent_name": "Inner"}))).unwrap();
        assert_eq!(step.agent_name, None);
    }

    #[test]
    fn normalize_does_not_touch_input() {
        let e = env("tool_call", None, json!({"tool_name": "X", "input_data": [1, 2]}));
        let before = e.clone();
        let a = normalize(&e);
        let b = normalize(&e);
        assert_eq!(a, b);
        assert_eq!(e, before);
    }

    #[test]
    fn final_answer_heuristic() {
        assert!(is_final_answer("FINAL ANSWER: yes"));
        assert!(!is_final_answer("the final answer is pending"));
        assert_eq!(final_answer_text("Final Answer:   "), Some("Final Answer:"));
    }
}
