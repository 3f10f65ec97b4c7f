/// Detaching the verifier from its controlling terminal
///
/// `daemonize` forks once. The launcher records the child's PID and hands it
/// back to the caller, which is expected to report it and exit. The worker
/// clears its umask, starts a new session, moves to `/` and points the three
/// standard streams at `/dev/null`.
///
/// Must be called before any threads (including an async runtime) exist.

use crate::artifacts::write_pid_file;
use crate::error::{DaemonError, VerifierError};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, close, dup2, fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::IntoRawFd;
use std::path::Path;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Which side of the fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemonized {
    /// The launching process; `child` is the background worker's PID
    Launcher { child: u32 },
    /// The detached background process
    Worker,
}

/// Fork into the background, recording the worker PID in `pid_file`
pub fn daemonize(pid_file: &Path) -> Result<Daemonized, VerifierError> {
    // SAFETY: called from a single-threaded process before the runtime starts.
    match unsafe { fork() } {
        Err(errno) => Err(DaemonError::Spawn(errno.to_string()).into()),
        Ok(ForkResult::Parent { child }) => {
            let child = child.as_raw() as u32;
            write_pid_file(pid_file, child)?;
            Ok(Daemonized::Launcher { child })
        }
        Ok(ForkResult::Child) => {
            detach()?;
            Ok(Daemonized::Worker)
        }
    }
}

fn detach() -> Result<(), DaemonError> {
    umask(Mode::empty());

    setsid().map_err(|errno| DaemonError::Session(errno.to_string()))?;

    chdir("/").map_err(|errno| DaemonError::Setup {
        context: "chdir to /",
        message: errno.to_string(),
    })?;

    redirect_standard_streams()
}

/// Point stdin, stdout and stderr at /dev/null
fn redirect_standard_streams() -> Result<(), DaemonError> {
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| DaemonError::Setup {
            context: "open /dev/null",
            message: e.to_string(),
        })?;
    let null_fd = null.into_raw_fd();

    for target in 0..=2 {
        dup2(null_fd, target).map_err(|errno| DaemonError::Setup {
            context: "redirect standard stream",
            message: errno.to_string(),
        })?;
    }

    // If /dev/null landed on 0..=2 itself it is now one of the standard streams.
    if null_fd > 2 {
        let _ = close(null_fd);
    }
    Ok(())
}

/// Record the current process as the worker when running in the foreground
pub fn record_foreground(pid_file: &Path) -> Result<u32, VerifierError> {
    let pid = std::process::id();
    write_pid_file(pid_file, pid)?;
    Ok(pid)
}

/// Shutdown flag raised by SIGTERM or SIGINT
///
/// Must be called from inside the runtime. The retry loop checks the flag
/// before each sleep and wakes from a sleep in progress when it flips.
pub fn shutdown_on_signals() -> io::Result<watch::Receiver<bool>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => log::info!("SIGTERM received, shutting down"),
            _ = interrupt.recv() => log::info!("SIGINT received, shutting down"),
        }
        let _ = tx.send(true);
    });

    Ok(rx)
}
