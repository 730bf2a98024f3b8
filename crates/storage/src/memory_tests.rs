// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn clones_share_state() {
    let store = MemoryStore::new();
    let other = store.clone();
    store.ensure_session(&AgentId::new("a1"), 1).await.unwrap();
    assert!(other.get_session(&AgentId::new("a1")).await.unwrap().is_some());
}

#[tokio::test]
async fn injected_message_failures_are_counted_down() {
    let store = MemoryStore::new();
    store.fail_message_writes(1);
    let msg = MessageRecord::builder().build();

    assert!(store.insert_messages(vec![msg.clone()]).await.is_err());
    assert_eq!(store.insert_messages(vec![msg]).await.unwrap(), 1);
}

#[tokio::test]
async fn outage_fails_every_operation() {
    let store = MemoryStore::new();
    store.set_unavailable(true);
    assert!(matches!(store.list_sessions().await, Err(StoreError::Unavailable(_))));
    store.set_unavailable(false);
    assert!(store.list_sessions().await.unwrap().is_empty());
}
