//! Host Controller
//!
//! The host side of the boundary: a broker bound to the sandbox channel and
//! the host's view of the suite, updated from `ready`, `cycle` and `complete`
//! events. Commands go out as `run`, `stop` and `shutdown`.

use crate::supervisor::SupervisorError;
use indicatif::{ProgressBar, ProgressStyle};
use racebench_ipc::{
    Broker, BrokerError, CandidateId, CandidateStatus, CycleEvent, Direction, Endpoint, Envelope,
    MessageKind, PROTOCOL_VERSION, Payload, ProtocolError, RankedResult, RunOptions, SandboxInfo,
    SuiteReport,
};
use std::time::{Duration, Instant};

/// Longest wait inside one dispatch while pumping the broker
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Host-side run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenchStatus {
    /// Sandbox not announced yet
    #[default]
    NotReady,
    /// Idle, can start
    Ready,
    /// A run is in progress
    Running,
    /// The last run produced a report
    Complete,
}

impl BenchStatus {
    /// Label of the run control in this state
    pub fn action_label(self) -> &'static str {
        match self {
            BenchStatus::NotReady | BenchStatus::Ready => "Run tests",
            BenchStatus::Running => "Stop running",
            BenchStatus::Complete => "Run again",
        }
    }
}

/// What the host knows about one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateView {
    /// Sandbox-assigned id
    pub id: CandidateId,
    /// Display title
    pub title: String,
    /// Last status reported by the sandbox
    pub status: CandidateStatus,
    /// Ranked result of the last completed run
    pub result: Option<RankedResult>,
    /// Last reported error
    pub error: Option<String>,
}

impl CandidateView {
    /// A candidate that has not run yet
    pub fn new(id: CandidateId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            status: CandidateStatus::Idle,
            result: None,
            error: None,
        }
    }
}

/// Dispatch context of the host broker
#[derive(Debug, Default)]
pub struct HostView {
    status: BenchStatus,
    candidates: Vec<CandidateView>,
    status_message: String,
    sandbox: Option<SandboxInfo>,
    report: Option<SuiteReport>,
    correlation_id: Option<u64>,
    protocol_errors: usize,
}

impl HostView {
    fn on_ready(&mut self, info: &SandboxInfo) {
        if info.protocol_version != PROTOCOL_VERSION {
            let err = ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: info.protocol_version,
            };
            tracing::warn!("dropping ready: {}", err);
            self.protocol_errors += 1;
            return;
        }
        if self.status != BenchStatus::NotReady {
            tracing::debug!("duplicate ready from pid {}", info.pid);
            return;
        }
        tracing::debug!(
            "sandbox pid {} ready with {} candidates",
            info.pid,
            info.candidate_count
        );
        self.sandbox = Some(info.clone());
        self.status = BenchStatus::Ready;
        self.status_message = "Ready to run.".to_string();
    }

    fn on_cycle(&mut self, correlation_id: Option<u64>, event: &CycleEvent) {
        if correlation_id != self.correlation_id {
            tracing::debug!("dropping cycle for stale run {:?}", correlation_id);
            return;
        }
        // After a local stop only the sandbox's final word on a candidate counts
        if self.status != BenchStatus::Running && !event.status.is_terminal() {
            return;
        }

        let view = self.view_mut(event.id, &event.name);
        view.status = event.status;
        if event.error.is_some() {
            view.error = event.error.clone();
        }

        if event.status.is_active() && self.status == BenchStatus::Running {
            self.status_message = format!(
                "{} × {} ({} sample{})",
                event.name,
                event.count,
                event.size,
                if event.size == 1 { "" } else { "s" }
            );
        }
    }

    fn on_complete(&mut self, correlation_id: Option<u64>, report: &SuiteReport) {
        if correlation_id != self.correlation_id || self.status != BenchStatus::Running {
            tracing::debug!("dropping complete for run {:?}", correlation_id);
            return;
        }
        for result in &report.results {
            let title = result.candidate_id.to_string();
            let view = self.view_mut(result.candidate_id, &title);
            view.result = Some(result.clone());
            if result.error.is_some() {
                view.status = CandidateStatus::Error;
                view.error = result.error.clone();
            } else if !view.status.is_terminal() {
                view.status = CandidateStatus::Completed;
            }
        }
        tracing::info!(
            "run complete: {} candidates, {} errors",
            report.len(),
            report.errors().count()
        );
        self.report = Some(report.clone());
        self.status = BenchStatus::Complete;
        self.status_message = "Done. Ready to run again.".to_string();
    }

    fn view_mut(&mut self, id: CandidateId, title: &str) -> &mut CandidateView {
        match self.candidates.iter().position(|c| c.id == id) {
            Some(pos) => &mut self.candidates[pos],
            None => {
                self.candidates.push(CandidateView::new(id, title));
                let last = self.candidates.len() - 1;
                &mut self.candidates[last]
            }
        }
    }

    fn terminal_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.status.is_terminal())
            .count()
    }
}

/// Drives a sandbox from the host side.
pub struct HostController {
    broker: Broker<HostView>,
    view: HostView,
    next_correlation: u64,
}

impl HostController {
    /// Controller bound to the host end of a sandbox channel
    pub fn new(endpoint: Endpoint) -> Self {
        let mut broker = Broker::connected(endpoint).accepting(Direction::ToHost);
        broker.register(MessageKind::Ready, |view: &mut HostView, envelope| {
            if let Payload::Ready(info) = &envelope.payload {
                view.on_ready(info);
            }
        });
        broker.register(MessageKind::Cycle, |view: &mut HostView, envelope| {
            if let Payload::Cycle(event) = &envelope.payload {
                view.on_cycle(envelope.correlation_id, event);
            }
        });
        broker.register(MessageKind::Complete, |view: &mut HostView, envelope| {
            if let Payload::Complete(complete) = &envelope.payload {
                view.on_complete(envelope.correlation_id, &complete.results);
            }
        });
        Self {
            broker,
            view: HostView::default(),
            next_correlation: 1,
        }
    }

    /// Seed the candidate list with titles known ahead of the first run
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = CandidateView>) -> Self {
        self.view.candidates = candidates.into_iter().collect();
        self
    }

    /// Current run state
    pub fn status(&self) -> BenchStatus {
        self.view.status
    }

    /// Status line shown to the user
    pub fn status_message(&self) -> &str {
        &self.view.status_message
    }

    /// Label of the run control
    pub fn action_label(&self) -> &'static str {
        self.view.status.action_label()
    }

    /// Whether the run control is enabled
    pub fn can_run(&self) -> bool {
        self.view.status != BenchStatus::NotReady
    }

    /// All candidates, in definition order
    pub fn candidates(&self) -> &[CandidateView] {
        &self.view.candidates
    }

    /// One candidate by id
    pub fn candidate(&self, id: CandidateId) -> Option<&CandidateView> {
        self.view.candidates.iter().find(|c| c.id == id)
    }

    /// Information from the sandbox's `ready`
    pub fn sandbox(&self) -> Option<&SandboxInfo> {
        self.view.sandbox.as_ref()
    }

    /// Report of the last completed run
    pub fn report(&self) -> Option<&SuiteReport> {
        self.view.report.as_ref()
    }

    /// Inbound messages dropped for protocol errors the broker cannot see
    pub fn protocol_errors(&self) -> usize {
        self.view.protocol_errors
    }

    /// Start a run.
    ///
    /// Returns `Ok(false)` when the sandbox is not ready or a run is already in
    /// progress. Candidates that errored in an earlier run keep their error.
    pub fn start(&mut self, options: Option<RunOptions>) -> Result<bool, BrokerError> {
        if !matches!(self.view.status, BenchStatus::Ready | BenchStatus::Complete) {
            return Ok(false);
        }
        let correlation_id = self.next_correlation;
        self.broker
            .try_emit(Envelope::run(options).with_correlation(Some(correlation_id)))?;
        self.next_correlation += 1;

        for candidate in &mut self.view.candidates {
            if candidate.status != CandidateStatus::Error {
                candidate.status = CandidateStatus::Pending;
                candidate.result = None;
            }
        }
        self.view.correlation_id = Some(correlation_id);
        self.view.report = None;
        self.view.status = BenchStatus::Running;
        self.view.status_message = "Running.".to_string();
        tracing::info!("run {} started", correlation_id);
        Ok(true)
    }

    /// Abort the current run. Returns `Ok(false)` if nothing is running.
    pub fn stop(&mut self) -> Result<bool, BrokerError> {
        if self.view.status != BenchStatus::Running {
            return Ok(false);
        }
        self.broker.try_emit(Envelope::stop())?;
        self.view.status = BenchStatus::Ready;
        self.view.status_message = "Ready to run.".to_string();
        tracing::info!("run {:?} stopped", self.view.correlation_id);
        Ok(true)
    }

    /// The run control: stop when running, start otherwise.
    pub fn toggle(&mut self, options: Option<RunOptions>) -> Result<bool, BrokerError> {
        if self.view.status == BenchStatus::Running {
            self.stop()
        } else {
            self.start(options)
        }
    }

    /// Ask the sandbox to leave its dispatch loop
    pub fn shutdown(&self) {
        self.broker.emit(Envelope::shutdown());
    }

    /// Dispatch whatever the sandbox has sent so far
    pub fn pump(&mut self) -> Result<usize, SupervisorError> {
        self.broker
            .dispatch_pending(&mut self.view)
            .map_err(disconnect_as_crash)
    }

    /// Block until the sandbox announces itself.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + timeout;
        while self.view.status == BenchStatus::NotReady {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SupervisorError::ReadyTimeout(timeout));
            }
            self.broker
                .dispatch_next(&mut self.view, Some(remaining.min(PUMP_INTERVAL)))
                .map_err(disconnect_as_crash)?;
        }
        Ok(())
    }

    /// Block until the current run completes.
    ///
    /// Returns `None` if the run was stopped instead. `progress` is advanced
    /// as candidates finish and shows the status message.
    pub fn wait_for_completion(
        &mut self,
        timeout: Duration,
        progress: Option<&ProgressBar>,
    ) -> Result<Option<SuiteReport>, SupervisorError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.view.status {
                BenchStatus::Complete => {
                    if let Some(pb) = progress {
                        pb.set_position(self.view.terminal_count() as u64);
                        pb.finish_with_message(self.view.status_message.clone());
                    }
                    return Ok(self.view.report.clone());
                }
                BenchStatus::Running => {}
                _ => return Ok(None),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SupervisorError::WorkerTimeout(timeout));
            }
            self.broker
                .dispatch_next(&mut self.view, Some(remaining.min(PUMP_INTERVAL)))
                .map_err(disconnect_as_crash)?;

            if let Some(pb) = progress {
                pb.set_position(self.view.terminal_count() as u64);
                pb.set_message(self.view.status_message.clone());
            }
        }
    }

    /// Progress bar sized to the candidate list
    pub fn progress_bar(&self) -> ProgressBar {
        let pb = ProgressBar::new(self.view.candidates.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(PUMP_INTERVAL);
        pb
    }
}

fn disconnect_as_crash(e: BrokerError) -> SupervisorError {
    match e {
        BrokerError::Disconnected => {
            SupervisorError::SandboxCrashed("sandbox closed its channel".to_string())
        }
        other => SupervisorError::Broker(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racebench_ipc::memory_pair;

    struct FakeSandbox {
        endpoint: Endpoint,
    }

    impl FakeSandbox {
        fn send(&mut self, envelope: Envelope) {
            self.endpoint.send(envelope).unwrap();
        }

        fn recv(&self) -> Envelope {
            self.endpoint
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .expect("no command from host")
        }

        fn cycle(&mut self, correlation: Option<u64>, id: u32, status: CandidateStatus, size: u32) {
            self.send(
                Envelope::cycle(CycleEvent {
                    id: CandidateId(id),
                    name: format!("c{}", id),
                    count: 1000,
                    size,
                    status,
                    error: None,
                })
                .with_correlation(correlation),
            );
        }
    }

    fn ranked(id: u32, rate: f64, fastest: bool, slowest: bool) -> RankedResult {
        RankedResult {
            candidate_id: CandidateId(id),
            rate_per_second: Some(rate),
            relative_margin_of_error_percent: Some(1.0),
            sample_count: 5,
            is_fastest: fastest,
            is_slowest: slowest,
            percent_slower_than_fastest: Some(0.0),
            error: None,
        }
    }

    fn connected() -> (HostController, FakeSandbox) {
        let (host, sandbox) = memory_pair();
        let controller = HostController::new(host).with_candidates([
            CandidateView::new(CandidateId(0), "c0"),
            CandidateView::new(CandidateId(1), "c1"),
        ]);
        (controller, FakeSandbox { endpoint: sandbox })
    }

    fn ready(controller: &mut HostController, sandbox: &mut FakeSandbox) {
        sandbox.send(Envelope::ready(2));
        controller
            .wait_until_ready(Duration::from_secs(5))
            .unwrap();
    }

    #[test]
    fn test_ready_enables_run() {
        let (mut controller, mut sandbox) = connected();
        assert_eq!(controller.status(), BenchStatus::NotReady);
        assert!(!controller.can_run());
        assert!(!controller.start(None).unwrap());

        ready(&mut controller, &mut sandbox);
        assert_eq!(controller.status(), BenchStatus::Ready);
        assert_eq!(controller.status_message(), "Ready to run.");
        assert_eq!(controller.action_label(), "Run tests");
        assert_eq!(controller.sandbox().unwrap().candidate_count, 2);
    }

    #[test]
    fn test_version_mismatch_is_dropped() {
        let (mut controller, mut sandbox) = connected();
        let mut envelope = Envelope::ready(2);
        if let Payload::Ready(info) = &mut envelope.payload {
            info.protocol_version = PROTOCOL_VERSION + 1;
        }
        sandbox.send(envelope);

        assert!(matches!(
            controller.wait_until_ready(Duration::from_millis(300)),
            Err(SupervisorError::ReadyTimeout(_))
        ));
        assert_eq!(controller.status(), BenchStatus::NotReady);
        assert_eq!(controller.protocol_errors(), 1);
    }

    #[test]
    fn test_run_progress_and_complete() {
        let (mut controller, mut sandbox) = connected();
        ready(&mut controller, &mut sandbox);

        assert!(controller.start(None).unwrap());
        assert_eq!(controller.action_label(), "Stop running");
        assert!(
            controller
                .candidates()
                .iter()
                .all(|c| c.status == CandidateStatus::Pending)
        );

        let run = sandbox.recv();
        assert_eq!(run.kind, "run");
        let corr = run.correlation_id;
        assert!(corr.is_some());

        sandbox.cycle(corr, 0, CandidateStatus::Cycle, 1);
        controller.pump().unwrap();
        assert_eq!(controller.status_message(), "c0 × 1000 (1 sample)");

        sandbox.cycle(corr, 0, CandidateStatus::Cycle, 3);
        controller.pump().unwrap();
        assert_eq!(controller.status_message(), "c0 × 1000 (3 samples)");

        sandbox.cycle(corr, 0, CandidateStatus::Completed, 5);
        sandbox.cycle(corr, 1, CandidateStatus::Completed, 5);
        sandbox.send(
            Envelope::complete(SuiteReport {
                results: vec![ranked(0, 2000.0, true, false), ranked(1, 1000.0, false, true)],
            })
            .with_correlation(corr),
        );

        let report = controller
            .wait_for_completion(Duration::from_secs(5), None)
            .unwrap()
            .unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(controller.status(), BenchStatus::Complete);
        assert_eq!(controller.status_message(), "Done. Ready to run again.");
        assert_eq!(controller.action_label(), "Run again");
        assert!(controller.candidate(CandidateId(0)).unwrap().result.is_some());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let (mut controller, mut sandbox) = connected();
        ready(&mut controller, &mut sandbox);
        controller.start(None).unwrap();
        let corr = sandbox.recv().correlation_id;

        sandbox.cycle(Some(999), 0, CandidateStatus::Cycle, 1);
        sandbox.send(
            Envelope::complete(SuiteReport::default()).with_correlation(Some(999)),
        );
        controller.pump().unwrap();
        assert_eq!(controller.status(), BenchStatus::Running);
        assert_eq!(
            controller.candidate(CandidateId(0)).unwrap().status,
            CandidateStatus::Pending
        );

        sandbox.cycle(corr, 0, CandidateStatus::Running, 0);
        controller.pump().unwrap();
        assert_eq!(
            controller.candidate(CandidateId(0)).unwrap().status,
            CandidateStatus::Running
        );
    }

    #[test]
    fn test_stop_and_toggle() {
        let (mut controller, mut sandbox) = connected();
        ready(&mut controller, &mut sandbox);

        assert!(!controller.stop().unwrap());
        assert!(controller.toggle(None).unwrap());
        let corr = sandbox.recv().correlation_id;
        sandbox.cycle(corr, 0, CandidateStatus::Cycle, 2);
        controller.pump().unwrap();

        assert!(controller.toggle(None).unwrap());
        assert_eq!(sandbox.recv().kind, "stop");
        assert_eq!(controller.status(), BenchStatus::Ready);
        assert_eq!(controller.status_message(), "Ready to run.");
        assert_eq!(
            controller.candidate(CandidateId(1)).unwrap().status,
            CandidateStatus::Pending
        );

        // Late progress does not revive the run; the abort lands
        sandbox.cycle(corr, 0, CandidateStatus::Cycle, 3);
        sandbox.cycle(corr, 0, CandidateStatus::Aborted, 3);
        controller.pump().unwrap();
        assert_eq!(controller.status_message(), "Ready to run.");
        assert_eq!(
            controller.candidate(CandidateId(0)).unwrap().status,
            CandidateStatus::Aborted
        );
        assert!(
            controller
                .wait_for_completion(Duration::from_secs(1), None)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_errored_candidate_keeps_error_on_rerun() {
        let (mut controller, mut sandbox) = connected();
        ready(&mut controller, &mut sandbox);
        controller.start(None).unwrap();
        let corr = sandbox.recv().correlation_id;

        let mut failed = ranked(1, 0.0, false, false);
        failed.rate_per_second = None;
        failed.error = Some("panicked: boom".to_string());
        sandbox.send(
            Envelope::complete(SuiteReport {
                results: vec![ranked(0, 100.0, true, true), failed],
            })
            .with_correlation(corr),
        );
        controller
            .wait_for_completion(Duration::from_secs(5), None)
            .unwrap();

        controller.start(None).unwrap();
        let c1 = controller.candidate(CandidateId(1)).unwrap();
        assert_eq!(c1.status, CandidateStatus::Error);
        assert_eq!(c1.error.as_deref(), Some("panicked: boom"));
        assert_eq!(
            controller.candidate(CandidateId(0)).unwrap().status,
            CandidateStatus::Pending
        );
    }

    #[test]
    fn test_disconnect_is_a_crash() {
        let (mut controller, sandbox) = connected();
        drop(sandbox);
        assert!(matches!(
            controller.wait_until_ready(Duration::from_secs(5)),
            Err(SupervisorError::SandboxCrashed(_))
        ));
    }

    #[test]
    fn test_unknown_kind_does_not_crash() {
        let (mut controller, mut sandbox) = connected();
        sandbox.send(Envelope {
            kind: "bogus".to_string(),
            correlation_id: None,
            payload: Payload::Empty,
        });
        ready(&mut controller, &mut sandbox);
        assert_eq!(controller.status(), BenchStatus::Ready);
    }
}
