//! Signal-safe Unix primitives.
//!
//! Blocking syscalls here transparently retry on EINTR so callers never see
//! spurious interruption. [`ChildWaiter`] is the race-free "wait until a
//! child changed state" primitive: a SIGCHLD arriving between a caller's
//! status check and the blocking wait is never lost, because the
//! notification is latched either in the kernel's pending-signal set
//! (sigtimedwait strategy) or in a self-pipe written by the handler.

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use thiserror::Error;

/// Child-wait errors
#[derive(Error, Debug)]
pub enum WaitError {
    #[error("failed to set up child-wait resources: {0}")]
    Setup(Errno),

    #[error("the self-pipe SIGCHLD handler is already installed")]
    AlreadyInstalled,

    #[error("wait failed: {0}")]
    Wait(Errno),
}

/// `read`, but handles being interrupted.
pub fn read_retry(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    loop {
        match unistd::read(fd, buf) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// `write`, but handles being interrupted.
pub fn write_retry<F: AsFd>(fd: F, buf: &[u8]) -> nix::Result<usize> {
    loop {
        match unistd::write(fd.as_fd(), buf) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// `poll` with the timeout as a quantity of milliseconds, handling
/// interruption. `msecs == 0` means wait forever.
pub fn poll_retry(fds: &mut [PollFd], msecs: u64) -> nix::Result<i32> {
    let timeout = if msecs == 0 {
        PollTimeout::NONE
    } else {
        PollTimeout::try_from(i32::try_from(msecs).unwrap_or(i32::MAX))
            .unwrap_or(PollTimeout::MAX)
    };
    loop {
        match poll(fds, timeout) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// `waitpid`, but handles being interrupted.
pub fn waitpid_retry(pid: Pid, options: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
    loop {
        match nix::sys::wait::waitpid(pid, options) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

// Self-pipe bookkeeping. The handler runs with almost nothing safely
// callable, so its inputs live in atomics rather than behind a lock. The
// previous handler is a tagged record: kind 0 = none, 1 = plain handler,
// 2 = siginfo-style action.
static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static OLD_HANDLER_KIND: AtomicU8 = AtomicU8::new(0);
static OLD_HANDLER_PTR: AtomicUsize = AtomicUsize::new(0);
static SELF_PIPE_INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn sigchld_pipe_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    if sig == libc::SIGCHLD {
        let fd = PIPE_WRITE_FD.load(Ordering::Relaxed);
        if fd >= 0 {
            // raw write is async-signal-safe; the pipe is non-blocking so a
            // full pipe drops the byte instead of deadlocking the handler
            unsafe {
                libc::write(fd, [b' '].as_ptr().cast(), 1);
            }
        }
    }

    // chain to whatever handler was installed before us, preserving the side
    // effects other subsystems may rely on
    let ptr = OLD_HANDLER_PTR.load(Ordering::Relaxed);
    match OLD_HANDLER_KIND.load(Ordering::Relaxed) {
        1 => {
            let handler: extern "C" fn(libc::c_int) = unsafe { std::mem::transmute(ptr) };
            handler(sig);
        }
        2 => {
            let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                unsafe { std::mem::transmute(ptr) };
            handler(sig, info, ctx);
        }
        _ => {}
    }
}

enum Inner {
    /// SIGCHLD is blocked on this thread and pulled synchronously.
    #[cfg(target_os = "linux")]
    SigTimedWait { mask: SigSet },
    /// The handler writes one byte per notification; the waiter multiplexes
    /// on the read end and drains exactly one byte per wake.
    SelfPipe {
        read_end: OwnedFd,
        _write_end: OwnedFd,
    },
}

/// Race-free waiter for child state-change notifications.
pub struct ChildWaiter {
    inner: Inner,
}

impl ChildWaiter {
    /// Platform-default strategy: synchronous signal wait where the kernel
    /// supports it, self-pipe everywhere else.
    pub fn new() -> Result<Self, WaitError> {
        #[cfg(target_os = "linux")]
        {
            Self::with_sigtimedwait()
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::with_self_pipe()
        }
    }

    /// Block SIGCHLD on the calling thread and consume notifications with
    /// `sigtimedwait`. The block must happen at construction: a signal
    /// raised before the first `wait` call stays pending and is still
    /// observed, which is what makes the check-then-wait sequence race-free.
    #[cfg(target_os = "linux")]
    pub fn with_sigtimedwait() -> Result<Self, WaitError> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.thread_block().map_err(WaitError::Setup)?;
        Ok(Self {
            inner: Inner::SigTimedWait { mask },
        })
    }

    /// Install the self-pipe SIGCHLD handler. Any previously installed
    /// handler is captured and chained after our own bookkeeping. Only one
    /// self-pipe waiter may exist per process.
    pub fn with_self_pipe() -> Result<Self, WaitError> {
        if SELF_PIPE_INSTALLED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WaitError::AlreadyInstalled);
        }

        let (read_end, write_end) = unistd::pipe().map_err(WaitError::Setup)?;
        for fd in [read_end.as_raw_fd(), write_end.as_raw_fd()] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(WaitError::Setup)?;
        }
        PIPE_WRITE_FD.store(write_end.as_raw_fd(), Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::SigAction(sigchld_pipe_handler),
            SaFlags::SA_RESTART | SaFlags::SA_SIGINFO,
            SigSet::empty(),
        );
        let old = unsafe { signal::sigaction(Signal::SIGCHLD, &action) }
            .map_err(WaitError::Setup)?;
        match old.handler() {
            SigHandler::Handler(f) => {
                OLD_HANDLER_PTR.store(f as usize, Ordering::SeqCst);
                OLD_HANDLER_KIND.store(1, Ordering::SeqCst);
            }
            SigHandler::SigAction(f) => {
                OLD_HANDLER_PTR.store(f as usize, Ordering::SeqCst);
                OLD_HANDLER_KIND.store(2, Ordering::SeqCst);
            }
            SigHandler::SigDfl | SigHandler::SigIgn => {
                OLD_HANDLER_KIND.store(0, Ordering::SeqCst);
            }
        }

        log::debug!("self-pipe SIGCHLD handler installed");
        Ok(Self {
            inner: Inner::SelfPipe {
                read_end,
                _write_end: write_end,
            },
        })
    }

    /// Block until a child process changes state or the timeout elapses.
    /// `msecs == 0` means wait forever. Returns true iff the timeout
    /// elapsed with no notification.
    pub fn wait_for_child_event(&self, msecs: u64) -> Result<bool, WaitError> {
        match &self.inner {
            #[cfg(target_os = "linux")]
            Inner::SigTimedWait { mask } => wait_sigtimedwait(mask, msecs),
            Inner::SelfPipe { read_end, .. } => {
                let mut fds = [PollFd::new(read_end.as_fd(), PollFlags::POLLIN)];
                let n = poll_retry(&mut fds, msecs).map_err(WaitError::Wait)?;
                if n == 0 {
                    return Ok(true);
                }
                let mut byte = [0u8; 1];
                if read_retry(read_end.as_raw_fd(), &mut byte).is_err() {
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }
}

impl Drop for ChildWaiter {
    fn drop(&mut self) {
        if let Inner::SelfPipe { .. } = self.inner {
            // handler stays installed (it still chains correctly), but must
            // stop writing once the pipe fds are closed
            PIPE_WRITE_FD.store(-1, Ordering::SeqCst);
        }
    }
}

#[cfg(target_os = "linux")]
fn wait_sigtimedwait(mask: &SigSet, msecs: u64) -> Result<bool, WaitError> {
    let ts = libc::timespec {
        tv_sec: (msecs / 1000) as libc::time_t,
        tv_nsec: ((msecs % 1000) * 1_000_000) as libc::c_long,
    };
    loop {
        let res = unsafe {
            if msecs == 0 {
                libc::sigwaitinfo(mask.as_ref(), std::ptr::null_mut())
            } else {
                libc::sigtimedwait(mask.as_ref(), std::ptr::null_mut(), &ts)
            }
        };
        if res >= 0 {
            // the mask only contains SIGCHLD
            return Ok(false);
        }
        match Errno::last() {
            Errno::EAGAIN => return Ok(true),
            Errno::EINTR => continue,
            e => return Err(WaitError::Wait(e)),
        }
    }
}
