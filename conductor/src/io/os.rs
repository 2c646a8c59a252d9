//! Thin wrappers over the libc process, signal, and lock primitives.
//!
//! This is the only module that talks to libc directly; everything else goes
//! through these safe functions.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Outcome of sending a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NoSuchProcess,
}

/// Outcome of waiting on a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The child has not changed state yet (non-blocking wait only).
    Running,
    Exited(i32),
    Signaled(i32),
    /// The pid is not a child of this process, so it cannot be reaped here.
    NotChild,
}

/// Zero-signal probe: does a process with this pid exist?
///
/// A process we may not signal (`EPERM`) still exists. Zombies exist until
/// they are reaped.
pub fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

pub fn terminate(pid: i32) -> io::Result<Delivery> {
    send_signal(pid, libc::SIGTERM)
}

pub fn force_kill(pid: i32) -> io::Result<Delivery> {
    send_signal(pid, libc::SIGKILL)
}

fn send_signal(pid: i32, signal: libc::c_int) -> io::Result<Delivery> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(Delivery::Delivered);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(Delivery::NoSuchProcess);
    }
    Err(err)
}

/// `waitpid(pid, WNOHANG)`.
pub fn try_wait(pid: i32) -> io::Result<WaitStatus> {
    wait_pid(pid, libc::WNOHANG)
}

/// `waitpid(pid, 0)`: blocks until the child exits.
pub fn wait_blocking(pid: i32) -> io::Result<WaitStatus> {
    wait_pid(pid, 0)
}

/// `waitpid(-1, WNOHANG)` until no exited child is left. Returns the reaped
/// pids; children that are still running are left alone.
pub fn reap_any_exited() -> io::Result<Vec<i32>> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if rc > 0 {
            reaped.push(rc);
            continue;
        }
        if rc == 0 {
            return Ok(reaped);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => return Ok(reaped),
            _ => return Err(err),
        }
    }
}

fn wait_pid(pid: i32, flags: libc::c_int) -> io::Result<WaitStatus> {
    loop {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(pid, &mut status, flags) };
        if rc == 0 {
            return Ok(WaitStatus::Running);
        }
        if rc == pid {
            return Ok(decode_status(status));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::ECHILD) => return Ok(WaitStatus::NotChild),
            _ => return Err(err),
        }
    }
}

fn decode_status(status: libc::c_int) -> WaitStatus {
    if libc::WIFEXITED(status) {
        WaitStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        WaitStatus::Signaled(libc::WTERMSIG(status))
    } else {
        WaitStatus::Running
    }
}

/// Take an exclusive advisory lock on `file`, blocking until it is free.
///
/// The lock is released when the file is closed.
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// SIGINT and SIGTERM, blocked in the calling thread.
#[derive(Clone, Copy)]
pub struct TerminationSignals {
    set: libc::sigset_t,
}

/// Block SIGINT/SIGTERM in the calling thread so that a dedicated thread can
/// receive them with [`wait_for_signal`].
///
/// Must run before any other thread is spawned; threads inherit the mask.
pub fn block_termination_signals() -> io::Result<TerminationSignals> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
    }
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(TerminationSignals { set })
}

/// Block until one of the termination signals is pending, and consume it.
pub fn wait_for_signal(signals: &TerminationSignals) -> io::Result<i32> {
    let mut signal: libc::c_int = 0;
    let rc = unsafe { libc::sigwait(&signals.set, &mut signal) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(signal)
}

/// Make `cmd` start its child with an empty signal mask.
///
/// Children inherit the blocked termination signals otherwise, and would
/// ignore the graceful stop request.
pub fn reset_signal_mask(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            let mut empty: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut empty);
            libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn non_positive_pids_never_exist() {
        assert!(!process_exists(0));
        assert!(!process_exists(-1));
    }

    #[test]
    fn own_process_exists() {
        assert!(process_exists(std::process::id() as i32));
    }

    #[test]
    fn reaped_child_is_gone_and_exit_code_is_decoded() {
        let child = Command::new("sh")
            .args(["-c", "exit 3"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sh");
        let pid = child.id() as i32;

        assert_eq!(wait_blocking(pid).expect("wait"), WaitStatus::Exited(3));
        assert!(!process_exists(pid));
        assert_eq!(try_wait(pid).expect("wait again"), WaitStatus::NotChild);
        assert_eq!(terminate(pid).expect("signal"), Delivery::NoSuchProcess);
    }

    #[test]
    fn killed_child_reports_signal() {
        let child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id() as i32;

        assert_eq!(try_wait(pid).expect("poll"), WaitStatus::Running);
        assert_eq!(force_kill(pid).expect("kill"), Delivery::Delivered);
        assert_eq!(
            wait_blocking(pid).expect("wait"),
            WaitStatus::Signaled(libc::SIGKILL)
        );
    }
}
