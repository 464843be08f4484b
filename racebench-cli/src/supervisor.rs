//! Sandbox Supervisor
//!
//! Launches the sandbox on the far side of the isolation boundary and owns its
//! lifetime. In process mode the current binary is re-executed with
//! `--racebench-worker` and IPC on fd 3/4; in thread mode the suite runs on a
//! thread of this process.

use crate::config::IsolationMode;
use racebench_core::{
    IPC_FD_ENV, SandboxError, SandboxOptions, Suite, ThreadSandbox, spawn_thread_sandbox,
};
use racebench_ipc::{BrokerError, Endpoint, frame_endpoint};
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Hidden flag that switches a benchmark binary into sandbox mode
pub const WORKER_FLAG: &str = "--racebench-worker";

/// Time a sandbox gets between SIGTERM and SIGKILL
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Failures of the host while launching or driving a sandbox
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn sandbox: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Sandbox crashed: {0}")]
    SandboxCrashed(String),

    #[error("Sandbox not ready after {0:?}")]
    ReadyTimeout(Duration),

    #[error("Run did not complete within {0:?}")]
    WorkerTimeout(Duration),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Sandbox failed: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec on both ends; the child clears it for the two it keeps.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A sandbox worker process
pub struct SandboxProcess {
    child: Child,
}

impl SandboxProcess {
    /// Re-execute the current binary as a sandbox.
    ///
    /// Returns the process and the host end of its IPC channel.
    pub fn spawn(args: &[String]) -> Result<(Self, Endpoint), SupervisorError> {
        let binary = env::current_exe().map_err(SupervisorError::SpawnFailed)?;
        Self::spawn_binary(&binary, args)
    }

    /// Spawn a sandbox from a specific binary
    pub fn spawn_binary(
        binary: &Path,
        args: &[String],
    ) -> Result<(Self, Endpoint), SupervisorError> {
        // cmd_pipe: host writes commands → sandbox reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: sandbox writes events to fd 4 → host reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .args(args)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: dup cmd_read→3, msg_write→4, close originals.
        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Child-side ends belong to the child now. Closing msg_write here is
        // what lets the reader see end-of-stream when the sandbox dies.
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let process = Self { child };
        let endpoint = frame_endpoint(reader_file, writer_file)?;
        tracing::debug!("spawned sandbox pid {}", process.pid());
        Ok((process, endpoint))
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Check if the sandbox process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Wait up to `grace` for a voluntary exit, then SIGTERM, then SIGKILL.
    pub fn terminate(&mut self, grace: Duration) {
        if self.wait_exit(grace) {
            return;
        }
        let _ = send_sigterm(self.child.id());
        if self.wait_exit(grace) {
            return;
        }
        tracing::warn!("sandbox pid {} ignored SIGTERM; killing", self.pid());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn wait_exit(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for SandboxProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// A running sandbox of either isolation mode
pub enum SandboxHandle {
    /// Worker process
    Process(SandboxProcess),
    /// Thread of this process
    Thread(JoinHandle<Result<(), SandboxError>>),
}

impl SandboxHandle {
    /// Whether the sandbox is still serving
    pub fn is_alive(&mut self) -> bool {
        match self {
            SandboxHandle::Process(process) => process.is_alive(),
            SandboxHandle::Thread(handle) => !handle.is_finished(),
        }
    }

    /// Wait for the sandbox to go away after `shutdown` was sent.
    ///
    /// A process that lingers is terminated. A thread cannot be killed: one
    /// stuck inside a candidate is left behind and reported as crashed.
    pub fn finish(self, grace: Duration) -> Result<(), SupervisorError> {
        match self {
            SandboxHandle::Process(mut process) => {
                process.terminate(grace);
                Ok(())
            }
            SandboxHandle::Thread(handle) => {
                let deadline = Instant::now() + grace;
                while !handle.is_finished() {
                    if Instant::now() >= deadline {
                        return Err(SupervisorError::SandboxCrashed(
                            "sandbox thread did not exit".to_string(),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                match handle.join() {
                    Ok(result) => result.map_err(SupervisorError::from),
                    Err(_) => Err(SupervisorError::SandboxCrashed(
                        "sandbox thread panicked".to_string(),
                    )),
                }
            }
        }
    }
}

/// Start a sandbox in the given isolation mode.
///
/// `build` is only called in thread mode; a worker process builds its own
/// suite. `worker_args` are appended to the worker's command line.
pub fn launch_sandbox<F>(
    mode: IsolationMode,
    build: F,
    options: SandboxOptions,
    worker_args: &[String],
) -> Result<(SandboxHandle, Endpoint), SupervisorError>
where
    F: FnOnce() -> Suite + Send + 'static,
{
    match mode {
        IsolationMode::Process => {
            let (process, endpoint) = SandboxProcess::spawn(worker_args)?;
            Ok((SandboxHandle::Process(process), endpoint))
        }
        IsolationMode::Thread => {
            let ThreadSandbox { endpoint, handle } = spawn_thread_sandbox(build, options)?;
            Ok((SandboxHandle::Thread(handle), endpoint))
        }
    }
}
