// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn record(last_heartbeat_ms: u64) -> InstanceRecord {
    InstanceRecord {
        instance_id: InstanceId::new("ins-a"),
        host: "host-a".to_string(),
        process_id: 10,
        started_at_ms: 0,
        last_heartbeat_ms,
        assigned: BTreeSet::new(),
        capacity: 2,
    }
}

#[test]
fn liveness_is_strictly_within_timeout() {
    let rec = record(1_000);
    assert!(rec.is_live(30_999, 30_000));
    assert!(!rec.is_live(31_000, 30_000));
}

#[test]
fn capacity_counts_assigned_agents() {
    let mut rec = record(0);
    rec.assigned.insert(AgentId::new("a1"));
    assert!(rec.has_capacity());
    rec.assigned.insert(AgentId::new("a2"));
    assert!(!rec.has_capacity());
    assert_eq!(rec.load(), 2);
}

#[test]
fn random_ids_carry_prefix() {
    assert!(InstanceId::random().as_str().starts_with(InstanceId::PREFIX));
}
