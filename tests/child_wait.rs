//! Self-pipe child-wait strategy, exercised end to end in one test so the
//! phases cannot interleave: handler chaining, timeout behavior, the
//! check-then-wait race, and a real child event.

#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, raise, SaFlags, SigAction, SigHandler, SigSet, Signal};
use rift::os::unix::{ChildWaiter, WaitError};

static CHAINED: AtomicBool = AtomicBool::new(false);

extern "C" fn prior_handler(_sig: libc::c_int) {
    CHAINED.store(true, Ordering::SeqCst);
}

#[test]
fn self_pipe_waiter_observes_signals_and_chains_the_prior_handler() {
    // a handler someone else installed before the waiter existed
    let prior = SigAction::new(
        SigHandler::Handler(prior_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGCHLD, &prior) }.expect("install prior handler");

    let waiter = ChildWaiter::with_self_pipe().expect("set up self-pipe waiter");

    // nothing pending yet: the timeout elapses
    assert_eq!(waiter.wait_for_child_event(50).unwrap(), true);

    // the race case: the signal lands after the caller's status check but
    // before the wait begins; it must still be observed
    raise(Signal::SIGCHLD).unwrap();
    assert_eq!(waiter.wait_for_child_event(2000).unwrap(), false);
    assert!(
        CHAINED.load(Ordering::SeqCst),
        "previously installed handler was not chained"
    );

    // exactly one byte per notification was drained
    assert_eq!(waiter.wait_for_child_event(50).unwrap(), true);

    // a real child exit produces an observable event
    let mut child = std::process::Command::new("/bin/true")
        .spawn()
        .expect("spawn /bin/true");
    assert_eq!(waiter.wait_for_child_event(5000).unwrap(), false);
    child.wait().expect("reap child");

    // the handler slot is process-wide; a second installation is refused
    assert!(matches!(
        ChildWaiter::with_self_pipe(),
        Err(WaitError::AlreadyInstalled)
    ));
}
