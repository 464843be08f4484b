//! Sandbox Entry Point
//!
//! Runs a suite on the far side of the isolation boundary: builds the broker
//! and orchestrator, announces `ready`, then serves commands until `shutdown`,
//! SIGTERM, or the host going away.
//!
//! In a worker process, IPC uses fd 3/4 (set via `RACEBENCH_IPC_FD`) with a
//! fallback to stdin/stdout. A thread sandbox uses an in-memory channel pair.

use crate::measure::pin_to_cpu;
use crate::orchestrator::SuiteOrchestrator;
use crate::sampler::{SamplerConfig, SamplerConfigError};
use crate::suite::Suite;
use racebench_ipc::{Broker, BrokerError, Direction, Endpoint, HEARTBEAT_INTERVAL_NS, frame_endpoint, memory_pair};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "RACEBENCH_IPC_FD";

/// Global flag set by the SIGTERM handler.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// Sandbox failures
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("invalid sampler configuration: {0}")]
    Config(#[from] SamplerConfigError),
}

/// How a sandbox is hosted
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Sampler defaults; runs may override them
    pub config: SamplerConfig,
    /// Core to pin the sampling thread to
    pub pin_cpu: Option<usize>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            config: SamplerConfig::default(),
            pin_cpu: Some(0),
        }
    }
}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.trim().parse(), w.trim().parse()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        tracing::warn!(
            "invalid {}={:?} (expected <read_fd>,<write_fd>), falling back to stdio",
            IPC_FD_ENV,
            val
        );
    }
    IpcTransport::Stdio
}

/// Endpoint of a worker process towards its host.
pub fn process_endpoint() -> std::io::Result<Endpoint> {
    match detect_transport() {
        #[cfg(unix)]
        IpcTransport::Fds { read_fd, write_fd } => {
            // SAFETY: the host opened these descriptors for us and nothing
            // else in this process owns them.
            let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
            let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
            frame_endpoint(read_file, write_file)
        }
        IpcTransport::Stdio => frame_endpoint(std::io::stdin(), std::io::stdout()),
    }
}

/// Serve `suite` over `endpoint` until shutdown.
pub fn run_sandbox(
    suite: Suite,
    options: &SandboxOptions,
    endpoint: Endpoint,
) -> Result<(), SandboxError> {
    options.config.validate()?;
    if let Some(cpu) = options.pin_cpu {
        if let Err(e) = pin_to_cpu(cpu) {
            tracing::debug!("could not pin to cpu {}: {}", cpu, e);
        }
    }

    let mut broker = Broker::connected(endpoint).accepting(Direction::ToSandbox);
    let mut orchestrator = SuiteOrchestrator::new(suite, options.config.clone(), broker.emitter());
    SuiteOrchestrator::install(&mut broker);
    orchestrator.announce_ready();

    let heartbeat = Duration::from_nanos(HEARTBEAT_INTERVAL_NS);
    loop {
        if shutdown_requested() || orchestrator.shutdown_requested() {
            break;
        }

        let dispatched = if orchestrator.is_running() {
            broker.dispatch_pending(&mut orchestrator).map(|_| ())
        } else {
            broker
                .dispatch_next(&mut orchestrator, Some(heartbeat))
                .map(|_| ())
        };
        match dispatched {
            Ok(()) => {}
            Err(BrokerError::Disconnected) => {
                tracing::debug!("host disconnected; leaving sandbox loop");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        // A command dispatched above may have stopped the run
        if orchestrator.is_running() && !orchestrator.shutdown_requested() {
            orchestrator.tick();
        }
    }

    Ok(())
}

/// Worker-process entry: serve `suite` over the inherited IPC channel.
pub fn run_process_sandbox(suite: Suite, options: &SandboxOptions) -> Result<(), SandboxError> {
    install_sigterm_handler();
    let endpoint = process_endpoint()?;
    run_sandbox(suite, options, endpoint)
}

/// A sandbox running on its own thread in this process
pub struct ThreadSandbox {
    /// Host end of the channel
    pub endpoint: Endpoint,
    /// The sandbox thread
    pub handle: JoinHandle<Result<(), SandboxError>>,
}

/// Start a sandbox thread serving the suite produced by `build`.
///
/// No process isolation: a candidate that aborts the process takes the host
/// with it. Meant for debugging and tests.
pub fn spawn_thread_sandbox<F>(build: F, options: SandboxOptions) -> std::io::Result<ThreadSandbox>
where
    F: FnOnce() -> Suite + Send + 'static,
{
    let (host, sandbox) = memory_pair();
    let handle = std::thread::Builder::new()
        .name("racebench-sandbox".to_string())
        .spawn(move || run_sandbox(build(), &options, sandbox))?;
    Ok(ThreadSandbox {
        endpoint: host,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use racebench_ipc::{Envelope, Payload};

    fn options() -> SandboxOptions {
        SandboxOptions {
            config: SamplerConfig {
                min_time: Duration::from_millis(5),
                max_time: Duration::from_millis(40),
                min_cycle_time: Duration::from_millis(1),
                min_samples: 2,
                target_rme_percent: 100.0,
                throttle_interval: Duration::from_millis(5),
            },
            pin_cpu: None,
        }
    }

    fn build() -> Suite {
        let mut suite = Suite::new("thread");
        suite.add(Candidate::sync("noop", || {})).unwrap();
        suite
    }

    fn recv(endpoint: &Endpoint) -> Envelope {
        endpoint
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .expect("sandbox went quiet")
    }

    #[test]
    fn test_thread_sandbox_run_and_shutdown() {
        let ThreadSandbox {
            mut endpoint,
            handle,
        } = spawn_thread_sandbox(build, options()).unwrap();

        assert_eq!(recv(&endpoint).kind, "ready");
        endpoint.send(Envelope::run(None).with_correlation(Some(3))).unwrap();

        let report = loop {
            let envelope = recv(&endpoint);
            assert_eq!(envelope.correlation_id, Some(3));
            if let Payload::Complete(complete) = envelope.payload {
                break complete.results;
            }
        };
        assert_eq!(report.len(), 1);

        endpoint.send(Envelope::shutdown()).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_sandbox_exits_when_host_disconnects() {
        let sandbox = spawn_thread_sandbox(build, options()).unwrap();
        assert_eq!(recv(&sandbox.endpoint).kind, "ready");
        drop(sandbox.endpoint);
        sandbox.handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut opts = options();
        opts.config.min_cycle_time = Duration::ZERO;
        let sandbox = spawn_thread_sandbox(build, opts).unwrap();
        assert!(matches!(
            sandbox.handle.join().unwrap(),
            Err(SandboxError::Config(SamplerConfigError::ZeroCycleTime))
        ));
    }
}
