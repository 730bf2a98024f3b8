// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_core::test_support::credential_value;

fn parse(text: &str) -> Frame {
    parse_frame(text, &AgentId::new("a1"), 4)
}

#[test]
fn qr_frame_becomes_session_qr() {
    assert_eq!(
        parse(r#"{"event":"qr","qr":"2@abc"}"#),
        Frame::Event(Box::new(Event::SessionQr {
            agent_id: AgentId::new("a1"),
            generation: 4,
            payload: "2@abc".to_string(),
        }))
    );
}

#[test]
fn close_frame_carries_code_and_reason() {
    let Frame::Event(event) = parse(r#"{"event":"close","code":515,"reason":"restart required"}"#)
    else {
        panic!("expected event");
    };
    let Event::SessionTerminated { termination, generation, .. } = *event else {
        panic!("expected termination");
    };
    assert_eq!(generation, 4);
    assert_eq!(termination.code, Some(515));
    assert_eq!(termination.reason.as_deref(), Some("restart required"));
}

#[test]
fn close_frame_without_details_is_unstructured() {
    let Frame::Event(event) = parse(r#"{"event":"close"}"#) else {
        panic!("expected event");
    };
    assert!(matches!(
        *event,
        Event::SessionTerminated { ref termination, .. } if termination.is_unstructured()
    ));
}

#[test]
fn creds_frame_passes_credential_through() {
    let frame = json!({ "event": "creds", "credential": credential_value(true) }).to_string();
    let Frame::Event(event) = parse(&frame) else {
        panic!("expected event");
    };
    assert!(matches!(
        *event,
        Event::CredentialsUpdated { ref credential, .. } if credential["registrationId"] == 4242
    ));
}

#[test]
fn result_frame_is_routed_by_request_id() {
    let frame = parse(r#"{"event":"result","request_id":"r1","ok":true,"native_id":"M1"}"#);
    let Frame::Reply { request_id, body } = frame else {
        panic!("expected reply");
    };
    assert_eq!(request_id, "r1");
    assert_eq!(body["native_id"], "M1");
}

#[test]
fn malformed_frames_are_ignored() {
    assert_eq!(parse("not json"), Frame::Ignored);
    assert_eq!(parse(r#"{"event":"presence"}"#), Frame::Ignored);
    assert_eq!(parse(r#"{"event":"qr"}"#), Frame::Ignored);
    assert_eq!(parse(r#"{"event":"message","message":"text"}"#), Frame::Ignored);
}

#[tokio::test]
async fn connect_to_unreachable_sidecar_fails() {
    let transport = SidecarTransport::new("ws://127.0.0.1:9/session", Duration::from_millis(100));
    let (tx, _rx) = mpsc::channel(4);
    let request = ConnectRequest { agent_id: AgentId::new("a1"), generation: 1, credential: None };
    let err = transport.connect(request, tx).await.err().unwrap();
    assert!(matches!(err, TransportError::Connect(_)));
}
