//! Traced process launcher.
//!
//! Fork/exec with an error-reporting pipe: the pipe's write end is
//! close-on-exec, so a successful exec closes it silently and the parent
//! reads EOF. If the child fails anywhere between fork and exec it writes
//! the failure text into the pipe and exits, and the parent surfaces that
//! text as the launch error. This distinguishes "the debuggee could not be
//! started" from "the debuggee started and then died".

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, fork, ForkResult, Pid};
use thiserror::Error;

use super::unix::{read_retry, waitpid_retry};

/// Launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to create the error-reporting pipe: {0}")]
    Pipe(nix::errno::Errno),

    #[error("fork failed: {0}")]
    Fork(nix::errno::Errno),

    #[error("failed to execute '{path}': {reason}")]
    Exec { path: PathBuf, reason: String },

    #[error("child did not stop at the initial trap: {0:?}")]
    BadInitialStop(WaitStatus),
}

/// How to start a debuggee.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Executable to run.
    pub path: PathBuf,
    /// Working directory for the child; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Arguments after `argv[0]` (which is always `path`).
    pub args: Vec<String>,
    /// Run the child with address-space randomization disabled.
    pub disable_aslr: bool,
}

impl LaunchOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cwd: None,
            args: Vec::new(),
            disable_aslr: false,
        }
    }
}

/// Fork and exec a child under ptrace, returning once it is stopped at its
/// initial exec trap and ready to be controlled.
pub fn spawn_traced(options: &LaunchOptions) -> Result<Pid, LaunchError> {
    let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;

    match unsafe { fork() }.map_err(LaunchError::Fork)? {
        ForkResult::Parent { child } => {
            drop(write_end);
            wait_for_exec(child, read_end, options)
        }
        ForkResult::Child => {
            // Only returns if something failed before or during exec. The
            // parent learns the reason through the pipe; the exit code is
            // never inspected.
            let err = execute_debuggee(options);
            report_child_failure(&write_end, &err);
            std::process::exit(127);
        }
    }
}

fn wait_for_exec(
    child: Pid,
    read_end: OwnedFd,
    options: &LaunchOptions,
) -> Result<Pid, LaunchError> {
    let mut message = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match read_retry(read_end.as_raw_fd(), &mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => message.extend_from_slice(&chunk[..n]),
        }
    }

    if !message.is_empty() {
        // reap the failed child so it does not linger as a zombie
        let _ = waitpid_retry(child, None);
        return Err(LaunchError::Exec {
            path: options.path.clone(),
            reason: String::from_utf8_lossy(&message).into_owned(),
        });
    }

    match waitpid_retry(child, None) {
        Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {
            log::info!("launched '{}' as pid {}", options.path.display(), child);
            Ok(child)
        }
        Ok(status) => Err(LaunchError::BadInitialStop(status)),
        Err(e) => Err(LaunchError::Fork(e)),
    }
}

/// Child side of the launch. Runs after fork and never returns on success;
/// an `Err` means exec was not reached or failed.
fn execute_debuggee(options: &LaunchOptions) -> String {
    if options.disable_aslr {
        let current = unsafe { libc::personality(0xffff_ffff) };
        if current == -1
            || unsafe {
                libc::personality((current as libc::c_ulong) | libc::ADDR_NO_RANDOMIZE as libc::c_ulong)
            } == -1
        {
            return "failed to disable address-space randomization".to_string();
        }
    }

    if let Some(cwd) = &options.cwd {
        if let Err(e) = unistd::chdir(cwd) {
            return format!("failed to change directory to '{}': {}", cwd.display(), e);
        }
    }

    if let Err(e) = ptrace::traceme() {
        return format!("ptrace TRACEME failed: {e}");
    }

    let program = match CString::new(options.path.as_os_str().as_encoded_bytes()) {
        Ok(p) => p,
        Err(_) => return "executable path contains an interior NUL".to_string(),
    };
    let mut argv = vec![program.clone()];
    for arg in &options.args {
        match CString::new(arg.as_bytes()) {
            Ok(a) => argv.push(a),
            Err(_) => return format!("argument '{arg}' contains an interior NUL"),
        }
    }

    match unistd::execv(&program, &argv) {
        Ok(_) => unreachable!("execv returned Ok"),
        Err(e) => format!("exec failed: {e}"),
    }
}

fn report_child_failure(write_end: &OwnedFd, message: &str) {
    // raw write: the child is post-fork, so only async-signal-safe calls
    unsafe {
        libc::write(
            write_end.as_raw_fd(),
            message.as_ptr().cast(),
            message.len(),
        );
    }
}
