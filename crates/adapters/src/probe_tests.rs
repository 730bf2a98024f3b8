// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn own_process_is_running() {
    let probe = HostProcessProbe;
    assert!(probe.is_running(std::process::id()));
    assert!(!probe.host().is_empty());
}

#[test]
fn out_of_range_pid_is_not_running() {
    assert!(!HostProcessProbe.is_running(u32::MAX));
}

#[test]
fn fake_probe_reports_killed_pids() {
    let probe = FakeProcessProbe::new("host-a", 10);
    assert!(probe.is_running(20));
    probe.kill(20);
    assert!(!probe.is_running(20));
    assert_eq!(probe.process_id(), 10);
}
