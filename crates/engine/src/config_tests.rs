// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use yare::parameterized;

fn valid() -> EngineConfig {
    EngineConfig::default().master_key(BASE64.encode([7u8; 32]))
}

#[test]
fn defaults_with_key_validate() {
    assert_eq!(valid().validate(), Ok(()));
}

#[test]
fn missing_master_key_is_rejected() {
    let err = EngineConfig::default().validate().unwrap_err();
    assert!(matches!(err, ConfigError::MasterKey(_)));
}

#[test]
fn short_master_key_reports_length() {
    let config = valid().master_key(BASE64.encode([1u8; 16]));
    assert_eq!(config.validate(), Err(ConfigError::MasterKey("got 16 bytes".to_string())));
}

#[parameterized(
    equal = { 10_000, 10_000 },
    one_millisecond_over = { 10_000, 10_001 },
    just_under_two_beats = { 10_000, 19_999 },
)]
fn liveness_must_cover_a_missed_beat(interval_ms: u64, timeout_ms: u64) {
    let config = valid()
        .heartbeat_interval(Duration::from_millis(interval_ms))
        .liveness_timeout(Duration::from_millis(timeout_ms));
    assert_eq!(config.validate(), Err(ConfigError::LivenessTooShort { interval_ms, timeout_ms }));
}

#[test]
fn liveness_of_two_beats_is_accepted() {
    let config = valid()
        .heartbeat_interval(Duration::from_secs(10))
        .liveness_timeout(Duration::from_secs(20));
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn zero_capacity_is_rejected() {
    assert_eq!(valid().capacity(0).validate(), Err(ConfigError::Zero { field: "capacity" }));
}

#[test]
fn backlog_smaller_than_batch_is_rejected() {
    let config = valid().batch_size(50).backlog_limit(10);
    assert_eq!(config.validate(), Err(ConfigError::BacklogTooSmall { batch: 50, backlog: 10 }));
}

#[test]
fn inverted_backoff_is_rejected() {
    let backoff = BackoffPolicy { base: Duration::from_secs(90), ..BackoffPolicy::default() };
    assert!(matches!(
        valid().backoff(backoff).validate(),
        Err(ConfigError::BackoffInverted { .. })
    ));
}

#[test]
fn key_bytes_decodes() {
    assert_eq!(valid().key_bytes().unwrap(), [7u8; 32]);
}
