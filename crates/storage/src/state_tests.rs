// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_core::AgentStatus;

fn stamp(instance: &str, at: u64) -> OwnerStamp {
    OwnerStamp {
        instance_id: InstanceId::new(instance),
        host: "host-a".to_string(),
        process_id: 100,
        claimed_at_ms: at,
    }
}

fn state_with(agent: &str) -> (StoreState, AgentId) {
    let mut state = StoreState::default();
    let id = AgentId::new(agent);
    state.ensure_session(&id, 1);
    (state, id)
}

#[test]
fn ensure_session_is_idempotent() {
    let (mut state, id) = state_with("a1");
    state.update_session(&id, &SessionPatch::status(AgentStatus::Connected), 5);
    let again = state.ensure_session(&id, 9);
    assert_eq!(again.status, AgentStatus::Connected);
    assert_eq!(again.created_at_ms, 1);
}

#[test]
fn only_one_claim_from_unowned_wins() {
    let (mut state, id) = state_with("a1");
    let first = state.claim_owner(&id, None, stamp("ins-a", 10));
    let second = state.claim_owner(&id, None, stamp("ins-b", 11));
    assert!(matches!(first, ClaimOutcome::Claimed(_)));
    assert_eq!(second, ClaimOutcome::Conflict(Some(stamp("ins-a", 10))));
}

#[test]
fn reclaim_by_current_owner_keeps_original_stamp() {
    let (mut state, id) = state_with("a1");
    state.claim_owner(&id, None, stamp("ins-a", 10));
    let ClaimOutcome::Claimed(session) = state.claim_owner(&id, None, stamp("ins-a", 20)) else {
        panic!("expected claim");
    };
    assert_eq!(session.owner, Some(stamp("ins-a", 10)));
}

#[test]
fn supersede_requires_expected_owner() {
    let (mut state, id) = state_with("a1");
    state.claim_owner(&id, None, stamp("ins-a", 10));
    let wrong = state.claim_owner(&id, Some(&InstanceId::new("ins-x")), stamp("ins-b", 11));
    assert!(matches!(wrong, ClaimOutcome::Conflict(_)));
    let right = state.claim_owner(&id, Some(&InstanceId::new("ins-a")), stamp("ins-b", 12));
    assert!(matches!(right, ClaimOutcome::Claimed(s) if s.owner == Some(stamp("ins-b", 12))));
}

#[test]
fn release_is_conditional_on_owner() {
    let (mut state, id) = state_with("a1");
    state.claim_owner(&id, None, stamp("ins-a", 10));
    assert!(!state.release_owner(&id, &InstanceId::new("ins-b")));
    assert!(state.release_owner(&id, &InstanceId::new("ins-a")));
    assert!(state.sessions[&id].owner.is_none());
}

#[test]
fn claim_on_missing_agent_reports_missing() {
    let mut state = StoreState::default();
    assert_eq!(
        state.claim_owner(&AgentId::new("ghost"), None, stamp("ins-a", 1)),
        ClaimOutcome::Missing
    );
}

#[test]
fn duplicate_native_ids_are_skipped() {
    let (mut state, id) = state_with("a1");
    let m1 = MessageRecord::builder().agent_id(id.clone()).native_id("M1").build();
    let m2 = MessageRecord::builder().agent_id(id.clone()).native_id("M2").build();
    assert_eq!(state.insert_messages(vec![m1.clone(), m2]), 2);
    assert_eq!(state.insert_messages(vec![m1]), 0);
    assert_eq!(state.list_messages(&id).len(), 2);
}

#[test]
fn same_native_id_for_different_agents_is_distinct() {
    let mut state = StoreState::default();
    let a = MessageRecord::builder().agent_id("a1").native_id("M1").build();
    let b = MessageRecord::builder().agent_id("a2").native_id("M1").build();
    assert_eq!(state.insert_messages(vec![a, b]), 2);
}

#[test]
fn delete_removes_messages() {
    let (mut state, id) = state_with("a1");
    state.insert_messages(vec![MessageRecord::builder().agent_id(id.clone()).build()]);
    assert!(state.delete_session(&id));
    assert!(state.list_messages(&id).is_empty());
    assert!(!state.delete_session(&id));
}

#[test]
fn set_credential_on_missing_agent_fails() {
    let mut state = StoreState::default();
    let err = state.set_credential(&AgentId::new("ghost"), None, 1).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
