//! Suite Orchestrator
//!
//! Owns a suite inside the sandbox, runs its candidates one at a time and
//! reports over the broker:
//!
//! ```text
//! notready ──announce_ready──▶ ready ──run──▶ running ──all terminal──▶ complete
//!                                ▲              │                          │
//!                                └──run / stop──┘◀──────────run────────────┘
//! ```
//!
//! Work is done in [`tick`](SuiteOrchestrator::tick), one sampler cycle at a
//! time, so a `stop` dispatched between ticks takes effect at the next cycle
//! boundary.

use crate::candidate::CandidateDefinition;
use crate::sampler::{CandidateStatistics, Sampler, SamplerConfig, SamplerStep};
use crate::suite::{CandidateSet, Suite};
use fxhash::FxHashMap;
use racebench_ipc::{
    Broker, CandidateId, CandidateStatus, CycleEvent, Emitter, Envelope, MessageKind, Payload,
    RunOptions, SuiteReport,
};
use racebench_stats::{RankingInput, rank};
use std::collections::VecDeque;
use std::sync::Arc;

/// Lifecycle of a suite in the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteState {
    /// Not yet announced to the host
    NotReady,
    /// Idle, accepting `run`
    Ready,
    /// A run is in progress
    Running,
    /// The last run finished and its report was sent
    Complete,
}

struct ActiveCandidate {
    definition: Arc<CandidateDefinition>,
    sampler: Sampler,
}

/// Sequences candidates through the sampler and emits progress and results.
pub struct SuiteOrchestrator {
    suite: Suite,
    base_config: SamplerConfig,
    run_config: SamplerConfig,
    state: SuiteState,
    statuses: FxHashMap<CandidateId, CandidateStatus>,
    results: FxHashMap<CandidateId, CandidateStatistics>,
    run_order: Vec<Arc<CandidateDefinition>>,
    queue: VecDeque<Arc<CandidateDefinition>>,
    active: Option<ActiveCandidate>,
    emitter: Emitter,
    correlation_id: Option<u64>,
    last_report: Option<SuiteReport>,
    shutdown: bool,
}

impl SuiteOrchestrator {
    /// Orchestrator for `suite`, sending through `emitter`
    pub fn new(suite: Suite, config: SamplerConfig, emitter: Emitter) -> Self {
        let statuses = suite
            .candidates()
            .iter()
            .map(|c| (c.id(), CandidateStatus::Idle))
            .collect();
        Self {
            suite,
            run_config: config.clone(),
            base_config: config,
            state: SuiteState::NotReady,
            statuses,
            results: FxHashMap::default(),
            run_order: Vec::new(),
            queue: VecDeque::new(),
            active: None,
            emitter,
            correlation_id: None,
            last_report: None,
            shutdown: false,
        }
    }

    /// Register the sandbox-side command handlers on `broker`
    pub fn install(broker: &mut Broker<SuiteOrchestrator>) {
        broker.register(MessageKind::Run, |orchestrator, envelope| {
            if let Payload::Run(request) = &envelope.payload {
                orchestrator.toggle(request.options.clone(), envelope.correlation_id);
            }
        });
        broker.register(MessageKind::Stop, |orchestrator, _| {
            orchestrator.stop();
        });
        broker.register(MessageKind::Shutdown, |orchestrator, _| {
            orchestrator.request_shutdown();
        });
    }

    /// Tell the host the suite is loaded. Only the first call has an effect.
    pub fn announce_ready(&mut self) {
        if self.state != SuiteState::NotReady {
            return;
        }
        self.state = SuiteState::Ready;
        self.emitter
            .emit(Envelope::ready(self.suite.candidates().len() as u32));
    }

    /// `run` semantics: start when idle, stop when running.
    pub fn toggle(&mut self, options: Option<RunOptions>, correlation_id: Option<u64>) {
        match self.state {
            SuiteState::Running => {
                self.stop();
            }
            SuiteState::Ready | SuiteState::Complete => {
                self.start(options, correlation_id);
            }
            SuiteState::NotReady => {
                tracing::warn!("run received before the suite was announced; ignoring");
            }
        }
    }

    /// Start a run. Returns false if one is already in progress or the suite
    /// has not been announced.
    pub fn start(&mut self, options: Option<RunOptions>, correlation_id: Option<u64>) -> bool {
        if !matches!(self.state, SuiteState::Ready | SuiteState::Complete) {
            return false;
        }

        self.run_config = match &options {
            Some(options) => self.base_config.with_options(options),
            None => self.base_config.clone(),
        };
        if let Err(e) = self.run_config.validate() {
            tracing::warn!("run options rejected ({}); using defaults", e);
            self.run_config = self.base_config.clone();
        }

        self.correlation_id = correlation_id;
        self.last_report = None;
        self.run_order = self.suite.candidates().snapshot();
        self.queue.clear();

        for definition in &self.run_order {
            let id = definition.id();
            if self.status(id) == Some(CandidateStatus::Error) {
                continue;
            }
            self.results.remove(&id);
            self.statuses.insert(id, CandidateStatus::Pending);
            self.queue.push_back(Arc::clone(definition));
        }

        self.state = SuiteState::Running;
        tracing::info!(
            "running {} of {} candidates in {}",
            self.queue.len(),
            self.run_order.len(),
            self.suite.name()
        );

        if self.queue.is_empty() {
            self.finish();
        }
        true
    }

    /// Abort the current run. Returns false when idle.
    pub fn stop(&mut self) -> bool {
        if self.state != SuiteState::Running {
            return false;
        }

        if let Some(active) = self.active.take() {
            let id = active.definition.id();
            self.statuses.insert(id, CandidateStatus::Aborted);
            self.emit_cycle(
                &active.definition,
                active.sampler.count(),
                active.sampler.samples().len() as u32,
                CandidateStatus::Aborted,
                None,
            );
        }
        // Candidates that never started stay pending
        self.queue.clear();

        self.state = SuiteState::Ready;
        tracing::info!("run of {} stopped", self.suite.name());
        true
    }

    /// Advance the run by one cycle. Returns true while the run continues.
    pub fn tick(&mut self) -> bool {
        if self.state != SuiteState::Running {
            return false;
        }

        let mut active = match self.active.take() {
            Some(active) => active,
            None => match self.queue.pop_front() {
                Some(definition) => self.activate(definition),
                None => {
                    self.finish();
                    return false;
                }
            },
        };

        match active.sampler.step(self.suite.hooks_mut()) {
            SamplerStep::Cycle(progress) => {
                if let Some(progress) = progress {
                    self.statuses
                        .insert(active.definition.id(), CandidateStatus::Cycle);
                    self.emit_cycle(
                        &active.definition,
                        progress.count,
                        progress.size,
                        CandidateStatus::Cycle,
                        None,
                    );
                }
                self.active = Some(active);
            }
            SamplerStep::Finished(stats) => {
                let definition = active.definition;
                let (status, error) = match &stats.error {
                    Some(e) => (CandidateStatus::Error, Some(e.to_string())),
                    None => (CandidateStatus::Completed, None),
                };
                tracing::debug!("{} {}", definition.title(), status);
                self.statuses.insert(definition.id(), status);
                self.emit_cycle(&definition, stats.executions, stats.sample_count, status, error);
                self.results.insert(definition.id(), stats);
            }
        }

        if self.active.is_none() && self.queue.is_empty() {
            self.finish();
            return false;
        }
        true
    }

    /// Tick until the current run ends
    pub fn run_to_completion(&mut self) -> Option<&SuiteReport> {
        while self.tick() {}
        self.last_report.as_ref()
    }

    fn activate(&mut self, definition: Arc<CandidateDefinition>) -> ActiveCandidate {
        self.statuses
            .insert(definition.id(), CandidateStatus::Running);
        self.emit_cycle(&definition, 0, 0, CandidateStatus::Running, None);
        let sampler = Sampler::new(Arc::clone(&definition), self.run_config.clone());
        ActiveCandidate {
            definition,
            sampler,
        }
    }

    fn finish(&mut self) {
        let inputs: Vec<RankingInput> = self
            .run_order
            .iter()
            .filter_map(|definition| {
                let id = definition.id();
                let stats = self.results.get(&id)?;
                Some(match &stats.error {
                    Some(e) => RankingInput::errored(id, e.to_string()),
                    None => RankingInput::completed(
                        id,
                        stats.rate_per_second,
                        stats.relative_margin_of_error_percent,
                        stats.sample_count,
                    ),
                })
            })
            .collect();

        let report = rank(&inputs);
        tracing::info!(
            "{} complete: {} results, {} errors",
            self.suite.name(),
            report.len(),
            report.errors().count()
        );
        self.emitter
            .emit(Envelope::complete(report.clone()).with_correlation(self.correlation_id));
        self.last_report = Some(report);
        self.state = SuiteState::Complete;
    }

    fn emit_cycle(
        &self,
        definition: &CandidateDefinition,
        count: u64,
        size: u32,
        status: CandidateStatus,
        error: Option<String>,
    ) {
        self.emitter.emit(
            Envelope::cycle(CycleEvent {
                id: definition.id(),
                name: definition.title().to_string(),
                count,
                size,
                status,
                error,
            })
            .with_correlation(self.correlation_id),
        );
    }

    /// Current lifecycle state
    pub fn state(&self) -> SuiteState {
        self.state
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.state == SuiteState::Running
    }

    /// Run state of a candidate; `None` for ids not in the suite
    pub fn status(&self, id: CandidateId) -> Option<CandidateStatus> {
        self.suite.candidates().get(id)?;
        Some(self.statuses.get(&id).copied().unwrap_or_default())
    }

    /// Number of candidates currently being sampled (0 or 1)
    pub fn running_count(&self) -> usize {
        self.statuses.values().filter(|s| s.is_active()).count()
    }

    /// Statistics of a candidate from the current or last run
    pub fn statistics(&self, id: CandidateId) -> Option<&CandidateStatistics> {
        self.results.get(&id)
    }

    /// Report of the last completed run
    pub fn last_report(&self) -> Option<&SuiteReport> {
        self.last_report.as_ref()
    }

    /// The candidates
    pub fn candidates(&self) -> &CandidateSet {
        self.suite.candidates()
    }

    /// Edit the candidates. A run in progress keeps its own snapshot.
    pub fn candidates_mut(&mut self) -> &mut CandidateSet {
        self.suite.candidates_mut()
    }

    /// Sampler settings used when a run carries no overrides
    pub fn config(&self) -> &SamplerConfig {
        &self.base_config
    }

    /// Ask the dispatch loop to exit
    pub fn request_shutdown(&mut self) {
        self.stop();
        self.shutdown = true;
    }

    /// Whether shutdown was requested
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }
}
