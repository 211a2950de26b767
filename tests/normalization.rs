//! Envelope -> step mapping across every event type the backend emits.

use runstream::envelope::{decode_envelope, RawEnvelope};
use runstream::normalize::{classify, normalize, StepKind};
use serde_json::{json, Value};

fn envelope(id: &str, event_type: &str, agent: Option<&str>, payload: Value) -> RawEnvelope {
    let mut raw = json!({
        "event_id": id,
        "run_id": "run-7",
        "event_type": event_type,
        "timestamp": "2024-05-01T10:00:00Z",
        "payload": payload,
    });
    if let Some(agent) = agent {
        raw["agent_name"] = json!(agent);
    }
    decode_envelope(&raw.to_string()).unwrap()
}

#[test]
fn tool_call_keeps_tool_and_agent() {
    let env = envelope(
        "e1",
        "tool_call",
        Some("Researcher"),
        json!({"tool_name": "SearchNews", "input_data": {"query": "AAPL"}}),
    );
    let step = normalize(&env).unwrap();
    assert_eq!(step.kind, StepKind::ToolCall);
    assert_eq!(step.tool_name.as_deref(), Some("SearchNews"));
    assert_eq!(step.agent_name.as_deref(), Some("Researcher"));
    assert!(step.input.unwrap().contains("\"query\": \"AAPL\""));

    let wire = serde_json::to_value(normalize(&env).unwrap()).unwrap();
    assert_eq!(wire["kind"], "tool_call");
    assert_eq!(wire["toolName"], "SearchNews");
    assert_eq!(wire["agentName"], "Researcher");
}

#[test]
fn tool_result_becomes_observation() {
    let env = envelope("e2", "tool_result", None, json!({"output_data": "Stock price is $150"}));
    let step = normalize(&env).unwrap();
    assert_eq!(step.kind, StepKind::Observation);
    assert_eq!(step.content.as_deref(), Some("Stock price is $150"));
    assert_eq!(step.id, "e2");
    assert_eq!(step.timestamp, "2024-05-01T10:00:00Z");
}

#[test]
fn llm_final_answer_requires_success_and_marker() {
    let done = envelope(
        "e3",
        "llm_call",
        Some("Analyst"),
        json!({"model": "m", "status": "success", "message": "Thinking... Final Answer: BUY"}),
    );
    let step = normalize(&done).unwrap();
    assert_eq!(step.kind, StepKind::FinalAnswer);
    assert_eq!(step.content.as_deref(), Some("BUY"));

    let pending = envelope("e4", "llm_call", None, json!({"model": "m", "status": "started"}));
    let step = normalize(&pending).unwrap();
    assert_eq!(step.kind, StepKind::Thought);
    assert_eq!(step.content.as_deref(), Some("Calling m"));
}

#[test]
fn non_step_events_produce_nothing() {
    for (event_type, payload) in [
        ("task_state", json!({"state": "running"})),
        ("system", json!({"message": "boot"})),
        ("task_output", json!({"output": {"rows": 3}})),
        ("something_new", json!({"anything": true})),
    ] {
        let env = envelope("e5", event_type, None, payload);
        assert!(normalize(&env).is_none(), "{} should not produce a step", event_type);
        assert!(classify(&env).unwrap().is_none());
    }
}

#[test]
fn unknown_types_never_fail_whatever_the_payload() {
    for payload in [json!(null), json!(1), json!("x"), json!([1, 2]), json!({"deep": {"er": []}})] {
        let env = envelope("e6", "future_event_kind", None, payload);
        assert_eq!(classify(&env).unwrap(), None);
    }
}

#[test]
fn payload_that_does_not_fit_its_tag_is_rejected() {
    let env = envelope("e7", "tool_result", None, json!({"tool_name": "x"}));
    assert!(classify(&env).is_err());
    assert!(normalize(&env).is_none());
}

#[test]
fn frames_missing_envelope_fields_do_not_decode() {
    assert!(decode_envelope(r#"{"event_type":"activity","payload":{"message":"hi"}}"#).is_err());
    assert!(decode_envelope("[1,2,3]").is_err());
    assert!(decode_envelope("not json").is_err());
}
