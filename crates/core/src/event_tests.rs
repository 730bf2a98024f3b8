// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::termination::DisconnectCode;
use serde_json::json;

#[test]
fn events_serialize_with_area_tags() {
    let event = Event::SessionTerminated {
        agent_id: AgentId::new("a1"),
        generation: 3,
        termination: Termination::of(DisconnectCode::RestartRequired),
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "session:terminated");
    assert_eq!(value["termination"]["code"], 515);
    assert_eq!(value["type"], event.name());

    let back: Event = serde_json::from_value(value).unwrap();
    assert_eq!(back, event);
}

#[test]
fn log_summary_omits_payloads() {
    let event = Event::CredentialsUpdated {
        agent_id: AgentId::new("a1"),
        generation: 1,
        credential: json!({ "noiseKey": { "private": "c2VjcmV0" } }),
    };
    let summary = event.log_summary();
    assert_eq!(summary, "session:creds agent=a1 gen=1");
    assert!(!summary.contains("c2VjcmV0"));
}

#[test]
fn system_events_have_no_agent() {
    assert_eq!(Event::Shutdown.agent_id(), None);
    assert_eq!(Event::TimerStart { id: TimerId::new("heartbeat:a1") }.generation(), None);
}
