// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    logged_out = { Classification::LoggedOut, "conflicts" },
    superseded = { Classification::Superseded, "conflicts" },
    corrupted = { Classification::Corrupted, "conflicts" },
    rejected = { Classification::Rejected, "conflicts" },
    restart = { Classification::PairingRestart, "reconnects" },
    transient = { Classification::Transient, "reconnects" },
    rate_limited = { Classification::RateLimited, "holds" },
)]
fn classification_lands_in_one_bucket(class: Classification, bucket: &str) {
    let counters = Counters::default();
    counters.record_classification(class);
    let stats = counters.snapshot();
    let value = serde_json::to_value(&stats).unwrap();
    assert_eq!(value[bucket], 1);
    let total: u64 = value.as_object().unwrap().values().filter_map(|v| v.as_u64()).sum();
    assert_eq!(total, 1);
}

#[test]
fn snapshot_reads_every_counter() {
    let counters = Counters::default();
    Counters::bump(&counters.dedup_drops);
    Counters::bump(&counters.dedup_drops);
    Counters::bump(&counters.effect_errors);
    let stats = counters.snapshot();
    assert_eq!(stats.dedup_drops, 2);
    assert_eq!(stats.effect_errors, 1);
    assert_eq!(stats.conflicts, 0);
}
