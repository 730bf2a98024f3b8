// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_epoch_is_after_2020() {
    assert!(SystemClock.epoch_ms() > 1_577_836_800_000);
}

#[test]
fn fake_clock_advances_both_clocks() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let e1 = clock.epoch_ms();
    clock.advance(Duration::from_secs(60));
    assert!(clock.now().duration_since(t1) >= Duration::from_secs(60));
    assert_eq!(clock.epoch_ms() - e1, 60_000);
}

#[test]
fn fake_clock_clones_share_time() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    let start = clock1.epoch_ms();
    clock2.advance_ms(1_500);
    assert_eq!(clock1.epoch_ms(), start + 1_500);
}

#[test]
fn ms_since_saturates() {
    let clock = FakeClock::new();
    let now = clock.epoch_ms();
    assert_eq!(clock.ms_since(now + 10_000), 0);
    clock.advance_ms(250);
    assert_eq!(clock.ms_since(now), 250);
}
