//! Debuggee process control.
//!
//! Owns the ptrace relationship with one traced child: launch or attach,
//! resume/step/detach/kill, state capture into the snapshot tracker, and
//! debuggee memory reads for the annotator. Exactly one [`Debuggee`] owns
//! write access to a process's register state at a time.

use std::io::IoSliceMut;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use thiserror::Error;

use crate::annotate::{MemoryError, MemoryReader};
use crate::arch::state::{self, Snapshot, StateTracker};
use crate::os::launch::{spawn_traced, LaunchError, LaunchOptions};
use crate::os::unix::waitpid_retry;

/// Process-control errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("failed to launch: {0}")]
    LaunchFailed(#[from] LaunchError),

    #[error("failed to attach to process {pid}: {reason}")]
    AttachFailed { pid: i32, reason: String },

    #[error("failed to detach from process {pid}: {reason}")]
    DetachFailed { pid: i32, reason: String },

    #[error("failed to read registers of process {pid}: {reason}")]
    StateUnavailable { pid: i32, reason: String },

    #[error("failed to resume process {pid}: {reason}")]
    ResumeFailed { pid: i32, reason: String },

    #[error("wait on process {pid} failed: {reason}")]
    WaitFailed { pid: i32, reason: String },
}

/// A traced child process and its register-state tracker.
pub struct Debuggee {
    pid: Pid,
    attached: bool,
    tracker: StateTracker,
}

impl Debuggee {
    /// Launch a new process under trace, stopped at its initial exec trap.
    pub fn launch(options: &LaunchOptions) -> Result<Self, DebugError> {
        let pid = spawn_traced(options)?;
        Ok(Self {
            pid,
            attached: true,
            tracker: StateTracker::new(),
        })
    }

    /// Attach to an already running process. Waits for the attach stop
    /// before returning.
    pub fn attach(pid: i32) -> Result<Self, DebugError> {
        let pid = Pid::from_raw(pid);
        log::info!("attaching to process {pid}");
        ptrace::attach(pid).map_err(|e| DebugError::AttachFailed {
            pid: pid.as_raw(),
            reason: e.to_string(),
        })?;
        waitpid_retry(pid, None).map_err(|e| DebugError::AttachFailed {
            pid: pid.as_raw(),
            reason: format!("no stop after attach: {e}"),
        })?;
        Ok(Self {
            pid,
            attached: true,
            tracker: StateTracker::new(),
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// The most recently captured snapshot.
    pub fn state(&self) -> &Snapshot {
        self.tracker.current()
    }

    /// Pull the debuggee's current registers into the tracker and return
    /// the fresh snapshot. The process must be stopped.
    pub fn refresh_state(&mut self) -> Result<&Snapshot, DebugError> {
        let regs = ptrace::getregs(self.pid).map_err(|e| DebugError::StateUnavailable {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })?;

        // the FPU/SIMD block is best effort: GPRs are still useful when it
        // cannot be read
        let fpregs = self.read_fpregs();
        if fpregs.is_none() {
            log::debug!("FPU registers unavailable for process {}", self.pid);
        }

        self.tracker
            .refresh(state::from_user_regs(&regs, fpregs.as_ref()));
        Ok(self.tracker.current())
    }

    fn read_fpregs(&self) -> Option<libc::user_fpregs_struct> {
        let mut fpregs = std::mem::MaybeUninit::<libc::user_fpregs_struct>::uninit();
        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_GETFPREGS,
                self.pid.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                fpregs.as_mut_ptr(),
            )
        };
        if res == -1 {
            return None;
        }
        Some(unsafe { fpregs.assume_init() })
    }

    /// Continue execution, optionally delivering a signal.
    pub fn resume(&self, signal: Option<Signal>) -> Result<(), DebugError> {
        ptrace::cont(self.pid, signal).map_err(|e| DebugError::ResumeFailed {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })
    }

    /// Execute one instruction and stop again.
    pub fn step(&self, signal: Option<Signal>) -> Result<(), DebugError> {
        ptrace::step(self.pid, signal).map_err(|e| DebugError::ResumeFailed {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })
    }

    /// Block until the child changes state.
    pub fn wait(&self) -> Result<WaitStatus, DebugError> {
        waitpid_retry(self.pid, None).map_err(|e| DebugError::WaitFailed {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })
    }

    /// Non-blocking status poll; `None` when nothing has changed.
    pub fn poll_status(&self) -> Result<Option<WaitStatus>, DebugError> {
        match waitpid_retry(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => Ok(Some(status)),
            Err(e) => Err(DebugError::WaitFailed {
                pid: self.pid.as_raw(),
                reason: e.to_string(),
            }),
        }
    }

    /// Release the process and let it run free.
    pub fn detach(&mut self) -> Result<(), DebugError> {
        log::info!("detaching from process {}", self.pid);
        ptrace::detach(self.pid, None).map_err(|e| DebugError::DetachFailed {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })?;
        self.attached = false;
        Ok(())
    }

    /// Kill the process and reap it.
    pub fn kill(&mut self) -> Result<(), DebugError> {
        log::info!("killing process {}", self.pid);
        ptrace::kill(self.pid).map_err(|e| DebugError::DetachFailed {
            pid: self.pid.as_raw(),
            reason: e.to_string(),
        })?;
        let _ = waitpid_retry(self.pid, None);
        self.attached = false;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Word-sized PTRACE_PEEKDATA fallback for kernels or targets where the
    /// vectored read is unavailable.
    fn read_words(&self, address: u64, buf: &mut [u8]) -> Result<usize, MemoryError> {
        let word = std::mem::size_of::<libc::c_long>();
        let mut copied = 0;
        while copied < buf.len() {
            let addr = (address + copied as u64) as ptrace::AddressType;
            match ptrace::read(self.pid, addr) {
                Ok(value) => {
                    let bytes = value.to_ne_bytes();
                    let n = word.min(buf.len() - copied);
                    buf[copied..copied + n].copy_from_slice(&bytes[..n]);
                    copied += n;
                }
                Err(_) if copied > 0 => return Ok(copied),
                Err(_) => return Err(MemoryError::Unreadable { address }),
            }
        }
        Ok(copied)
    }
}

impl MemoryReader for Debuggee {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<usize, MemoryError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len();
        let mut local = [IoSliceMut::new(buf)];
        let remote = [RemoteIoVec {
            base: address as usize,
            len,
        }];
        match process_vm_readv(self.pid, &mut local, &remote) {
            Ok(n) if n > 0 => Ok(n),
            _ => self.read_words(address, buf),
        }
    }
}

impl Drop for Debuggee {
    fn drop(&mut self) {
        if self.attached {
            if let Err(e) = self.detach() {
                log::warn!("detach on drop failed: {e}");
            }
        }
    }
}
