//! Process launch and control against real children.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use std::path::Path;

use nix::sys::wait::WaitStatus;
use rift::os::launch::{spawn_traced, LaunchError, LaunchOptions};
use rift::process::Debuggee;

#[test]
fn launching_a_nonexistent_path_reports_the_os_reason() {
    let options = LaunchOptions::new("/nonexistent/rift-test-binary");
    match spawn_traced(&options) {
        Err(LaunchError::Exec { path, reason }) => {
            assert_eq!(path, Path::new("/nonexistent/rift-test-binary"));
            assert!(
                reason.contains("No such file"),
                "unexpected reason: {reason}"
            );
        }
        other => panic!("expected an exec failure, got {other:?}"),
    }
}

#[test]
fn launched_child_stops_with_readable_registers() {
    if !Path::new("/bin/true").exists() {
        return;
    }
    let mut debuggee = Debuggee::launch(&LaunchOptions::new("/bin/true")).unwrap();
    let snapshot = debuggee.refresh_state().unwrap();
    assert!(snapshot.instruction_pointer().is_present());
    assert!(snapshot.by_name("rsp").unwrap().is_present());
    debuggee.kill().unwrap();
}

#[test]
fn resumed_child_runs_to_a_clean_exit() {
    if !Path::new("/bin/true").exists() {
        return;
    }
    let mut debuggee = Debuggee::launch(&LaunchOptions::new("/bin/true")).unwrap();
    debuggee.resume(None).unwrap();
    loop {
        match debuggee.wait().unwrap() {
            WaitStatus::Exited(_, code) => {
                assert_eq!(code, 0);
                break;
            }
            WaitStatus::Stopped(_, _) => debuggee.resume(None).unwrap(),
            other => panic!("unexpected status {other:?}"),
        }
    }
}

#[test]
fn single_step_advances_the_instruction_pointer() {
    if !Path::new("/bin/true").exists() {
        return;
    }
    let mut debuggee = Debuggee::launch(&LaunchOptions::new("/bin/true")).unwrap();
    let before = debuggee
        .refresh_state()
        .unwrap()
        .instruction_pointer()
        .value;
    debuggee.step(None).unwrap();
    match debuggee.wait().unwrap() {
        WaitStatus::Stopped(_, _) => {}
        other => panic!("expected a stop after step, got {other:?}"),
    }
    let after = debuggee
        .refresh_state()
        .unwrap()
        .instruction_pointer()
        .value;
    assert_ne!(before, after);
    assert!(debuggee.tracker().changed("rip"));
    debuggee.kill().unwrap();
}
