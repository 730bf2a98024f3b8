// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_adapters::MemorySharedCache;
use sb_core::test_support::{credential_value, PHONE_JID};
use sb_core::FakeClock;

fn tier(capacity: usize) -> LruTier<u32> {
    LruTier::new(capacity, Duration::from_secs(60))
}

#[test]
fn least_recently_used_entry_is_evicted() {
    let now = Instant::now();
    let mut lru = tier(2);
    lru.insert("a", 1, now);
    lru.insert("b", 2, now);
    // Touch "a" so "b" becomes the eviction candidate
    assert_eq!(lru.get("a", now), Some(1));
    lru.insert("c", 3, now);

    assert_eq!(lru.get("b", now), None);
    assert_eq!(lru.get("a", now), Some(1));
    assert_eq!(lru.get("c", now), Some(3));
    assert_eq!(lru.stats().evictions, 1);
}

#[test]
fn expired_entries_miss_and_count_as_evictions() {
    let now = Instant::now();
    let mut lru = tier(4);
    lru.insert_with_ttl("a", 1, Duration::from_secs(5), now);
    assert_eq!(lru.get("a", now + Duration::from_secs(4)), Some(1));
    assert_eq!(lru.get("a", now + Duration::from_secs(5)), None);

    let stats = lru.stats();
    assert_eq!((stats.hits, stats.misses, stats.evictions, stats.size), (1, 1, 1, 0));
}

#[test]
fn reinsert_replaces_without_eviction() {
    let now = Instant::now();
    let mut lru = tier(2);
    lru.insert("a", 1, now);
    lru.insert("a", 2, now);
    assert_eq!(lru.len(), 1);
    assert_eq!(lru.get("a", now), Some(2));
    assert_eq!(lru.stats().evictions, 0);
}

#[test]
fn hit_rate_reports_fraction() {
    let stats = TierStats { hits: 3, misses: 1, ..TierStats::default() };
    assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    assert_eq!(TierStats::default().hit_rate(), 0.0);
}

fn session_cache(shared: MemorySharedCache, clock: FakeClock) -> SessionCache<FakeClock> {
    SessionCache::new(&CacheConfig::default(), Arc::new(shared), Duration::from_secs(1), clock)
}

#[tokio::test]
async fn validation_hits_fall_through_to_shared_tier() {
    let shared = MemorySharedCache::new();
    let writer = session_cache(shared.clone(), FakeClock::new());
    let reader = session_cache(shared, FakeClock::new());
    let result = ExistsResult { on_network: true, resolved: Some(PHONE_JID.to_string()) };

    writer.put_validation(PHONE_JID, &result).await;
    assert_eq!(reader.get_validation(PHONE_JID).await, Some(result));
    // Promoted into the reader's local tier
    assert_eq!(reader.stats().validation.size, 1);
}

#[tokio::test]
async fn shared_tier_lookups_are_counted_apart_from_local_tiers() {
    let shared = MemorySharedCache::new();
    let writer = session_cache(shared.clone(), FakeClock::new());
    let reader = session_cache(shared.clone(), FakeClock::new());
    let result = ExistsResult { on_network: true, resolved: Some(PHONE_JID.to_string()) };
    writer.put_validation(PHONE_JID, &result).await;

    // Served by the shared tier, then locally
    assert!(reader.get_validation(PHONE_JID).await.is_some());
    assert!(reader.get_validation(PHONE_JID).await.is_some());
    assert!(reader.get_validation("0000@s.whatsapp.net").await.is_none());
    shared.set_unavailable(true);
    assert!(reader.get_validation("1111@s.whatsapp.net").await.is_none());

    let stats = reader.stats();
    assert_eq!((stats.validation.hits, stats.validation.misses), (1, 3));
    assert_eq!(stats.shared, SharedStats { hits: 1, misses: 2, errors: 1 });
    assert!((stats.shared.hit_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
    assert_eq!(writer.stats().shared, SharedStats::default());
}

#[tokio::test]
async fn identity_mapping_is_shared_across_instances() {
    let shared = MemorySharedCache::new();
    let a = session_cache(shared.clone(), FakeClock::new());
    let b = session_cache(shared, FakeClock::new());
    a.put_identity("9988@lid", PHONE_JID).await;
    assert_eq!(b.get_identity("9988@lid").await.as_deref(), Some(PHONE_JID));
    assert_eq!(b.get_identity("1111@lid").await, None);
}

#[tokio::test]
async fn unavailable_shared_tier_degrades_to_miss() {
    let shared = MemorySharedCache::new();
    shared.set_unavailable(true);
    let cache = session_cache(shared, FakeClock::new());
    cache.put_identity("9988@lid", PHONE_JID).await;
    // Local tier still works
    assert_eq!(cache.get_identity("9988@lid").await.as_deref(), Some(PHONE_JID));
    assert_eq!(cache.get_identity("7777@lid").await, None);
}

#[tokio::test]
async fn local_credentials_expire_with_clock() {
    let clock = FakeClock::new();
    let cache = session_cache(MemorySharedCache::new(), clock.clone());
    let agent = AgentId::new("agent-1");
    let credential = Credential::from_value(&credential_value(true)).unwrap();

    cache.promote_credential(&agent, &credential);
    assert!(cache.local_credential(&agent).is_some());
    clock.advance(CacheConfig::default().credential_ttl);
    assert!(cache.local_credential(&agent).is_none());
}

#[tokio::test]
async fn invalidate_clears_both_tiers() {
    let shared = MemorySharedCache::new();
    let cache = session_cache(shared.clone(), FakeClock::new());
    let agent = AgentId::new("agent-1");
    let credential = Credential::from_value(&credential_value(true)).unwrap();
    let sealed = SealedCredential {
        algorithm: "aes-256-gcm".into(),
        version: 1,
        iv: String::new(),
        tag: String::new(),
        ciphertext: String::new(),
        sealed_at_ms: 0,
    };

    cache.put_credential(&agent, &credential, &sealed).await;
    assert_eq!(cache.shared_credential(&agent).await, Some(sealed));
    cache.invalidate_credential(&agent).await;
    assert!(cache.local_credential(&agent).is_none());
    assert!(cache.shared_credential(&agent).await.is_none());
    assert!(shared.is_empty());
}
