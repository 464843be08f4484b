//! Protocol Message Types
//!
//! Every message crossing the sandbox boundary is an [`Envelope`]: a string
//! `kind`, an optional correlation id and a typed [`Payload`]. The kind travels
//! as a string so that a peer speaking a newer protocol can be detected and its
//! messages dropped instead of failing to decode.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable identifier of a candidate within a suite.
///
/// Assigned once when the candidate is added and never reused, even after the
/// candidate is removed or the suite is reordered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
#[serde(transparent)]
pub struct CandidateId(pub u32);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed set of message kinds understood by this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sandbox loaded and able to receive `run`
    Ready,
    /// Start a run, or stop the current one if a run is in progress
    Run,
    /// Abort the current run; ignored when idle
    Stop,
    /// Leave the dispatch loop and exit
    Shutdown,
    /// Throttled per-candidate progress or a terminal transition
    Cycle,
    /// Final ranked report for a run
    Complete,
}

/// Which way a message kind travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sandbox → host
    ToHost,
    /// Host → sandbox
    ToSandbox,
}

impl MessageKind {
    /// All kinds, in protocol-table order.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Ready,
        MessageKind::Run,
        MessageKind::Stop,
        MessageKind::Shutdown,
        MessageKind::Cycle,
        MessageKind::Complete,
    ];

    /// Wire name of this kind
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ready => "ready",
            MessageKind::Run => "run",
            MessageKind::Stop => "stop",
            MessageKind::Shutdown => "shutdown",
            MessageKind::Cycle => "cycle",
            MessageKind::Complete => "complete",
        }
    }

    /// Direction this kind travels in
    pub fn direction(self) -> Direction {
        match self {
            MessageKind::Ready | MessageKind::Cycle | MessageKind::Complete => Direction::ToHost,
            MessageKind::Run | MessageKind::Stop | MessageKind::Shutdown => Direction::ToSandbox,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// Reasons an inbound message is rejected. These are logged and dropped by the
/// broker, never propagated to handlers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("payload {payload} does not match message kind {kind}")]
    PayloadMismatch { kind: MessageKind, payload: &'static str },

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
}

/// Run state of one candidate during a suite run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Never run in this suite instance
    #[default]
    Idle,
    /// Queued for the current run
    Pending,
    /// Sampling started
    Running,
    /// Sampling in progress, at least one progress report sent
    Cycle,
    /// Finished with statistics
    Completed,
    /// Candidate panicked, rejected or timed out
    Error,
    /// Run was stopped while this candidate was sampling
    Aborted,
}

impl CandidateStatus {
    /// Whether this status ends the candidate's participation in a run
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CandidateStatus::Completed | CandidateStatus::Error | CandidateStatus::Aborted
        )
    }

    /// Whether the candidate is currently being sampled
    pub fn is_active(self) -> bool {
        matches!(self, CandidateStatus::Running | CandidateStatus::Cycle)
    }

    /// Lowercase wire/display name
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateStatus::Idle => "idle",
            CandidateStatus::Pending => "pending",
            CandidateStatus::Running => "running",
            CandidateStatus::Cycle => "cycle",
            CandidateStatus::Completed => "completed",
            CandidateStatus::Error => "error",
            CandidateStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run overrides of the sampler budget. Unset fields keep the sandbox
/// defaults; the overrides apply to every candidate of that run only.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
pub struct RunOptions {
    /// Minimum sampling time per candidate in nanoseconds
    pub min_time_ns: Option<u64>,
    /// Maximum sampling time per candidate in nanoseconds
    pub max_time_ns: Option<u64>,
    /// Minimum number of recorded cycles before the error target is checked
    pub min_samples: Option<u32>,
    /// Relative margin of error (percent) at which sampling may stop
    pub target_rme_percent: Option<f64>,
}

impl RunOptions {
    /// True when no field overrides anything
    pub fn is_empty(&self) -> bool {
        self.min_time_ns.is_none()
            && self.max_time_ns.is_none()
            && self.min_samples.is_none()
            && self.target_rme_percent.is_none()
    }
}

/// Payload of `ready`
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct SandboxInfo {
    /// Protocol version spoken by the sandbox
    pub protocol_version: u32,
    /// Number of candidates the sandbox loaded
    pub candidate_count: u32,
    /// Process id of the sandbox
    pub pid: u32,
}

/// Payload of `run`
#[derive(Debug, Clone, Default, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct RunRequest {
    /// Budget overrides for this run
    pub options: Option<RunOptions>,
}

/// Payload of `cycle`
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct CycleEvent {
    /// Candidate this event is about
    pub id: CandidateId,
    /// Candidate title
    pub name: String,
    /// Executions per cycle at the time of the event
    pub count: u64,
    /// Recorded samples so far
    pub size: u32,
    /// Candidate state after this event
    pub status: CandidateStatus,
    /// Error description when `status` is `Error`
    pub error: Option<String>,
}

/// One candidate's line in the final report.
#[derive(
    Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
pub struct RankedResult {
    /// Candidate this result belongs to
    pub candidate_id: CandidateId,
    /// Executions per second; `None` for errored candidates
    pub rate_per_second: Option<f64>,
    /// Relative margin of error of the mean, in percent
    pub relative_margin_of_error_percent: Option<f64>,
    /// Number of recorded cycles
    pub sample_count: u32,
    /// Highest rate among non-errored candidates
    pub is_fastest: bool,
    /// Lowest rate among non-errored candidates
    pub is_slowest: bool,
    /// How much slower than the fastest candidate, in percent
    pub percent_slower_than_fastest: Option<f64>,
    /// Captured candidate error
    pub error: Option<String>,
}

/// Ranked results of one completed run, in definition order.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
pub struct SuiteReport {
    /// One entry per candidate of the run
    pub results: Vec<RankedResult>,
}

impl SuiteReport {
    /// Number of entries
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True for a suite with no candidates
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Entry for a candidate
    pub fn get(&self, id: CandidateId) -> Option<&RankedResult> {
        self.results.iter().find(|r| r.candidate_id == id)
    }

    /// The entry marked fastest, if any candidate succeeded
    pub fn fastest(&self) -> Option<&RankedResult> {
        self.results.iter().find(|r| r.is_fastest)
    }

    /// The entry marked slowest, if any candidate succeeded
    pub fn slowest(&self) -> Option<&RankedResult> {
        self.results.iter().find(|r| r.is_slowest)
    }

    /// Entries carrying an error
    pub fn errors(&self) -> impl Iterator<Item = &RankedResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Payload of `complete`
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct CompleteEvent {
    /// The ranked report
    pub results: SuiteReport,
}

/// Typed message body.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Payload {
    /// `{}`: used by `stop` and `shutdown`
    Empty,
    /// Payload of `ready`
    Ready(SandboxInfo),
    /// Payload of `run`
    Run(RunRequest),
    /// Payload of `cycle`
    Cycle(CycleEvent),
    /// Payload of `complete`
    Complete(CompleteEvent),
}

impl Payload {
    fn name(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Ready(_) => "ready",
            Payload::Run(_) => "run",
            Payload::Cycle(_) => "cycle",
            Payload::Complete(_) => "complete",
        }
    }

    fn fits(&self, kind: MessageKind) -> bool {
        matches!(
            (kind, self),
            (MessageKind::Ready, Payload::Ready(_))
                | (MessageKind::Run, Payload::Run(_))
                | (MessageKind::Stop, Payload::Empty)
                | (MessageKind::Shutdown, Payload::Empty)
                | (MessageKind::Cycle, Payload::Cycle(_))
                | (MessageKind::Complete, Payload::Complete(_))
        )
    }
}

/// Message envelope crossing the boundary.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct Envelope {
    /// Wire name of the message kind
    pub kind: String,
    /// Ties `cycle`/`complete` messages to the `run` that caused them
    pub correlation_id: Option<u64>,
    /// Message body
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope of a known kind
    pub fn new(kind: MessageKind, payload: Payload) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            correlation_id: None,
            payload,
        }
    }

    /// `ready` announcing the sandbox
    pub fn ready(candidate_count: u32) -> Self {
        Self::new(
            MessageKind::Ready,
            Payload::Ready(SandboxInfo {
                protocol_version: crate::PROTOCOL_VERSION,
                candidate_count,
                pid: std::process::id(),
            }),
        )
    }

    /// `run` with optional budget overrides
    pub fn run(options: Option<RunOptions>) -> Self {
        Self::new(MessageKind::Run, Payload::Run(RunRequest { options }))
    }

    /// `stop`
    pub fn stop() -> Self {
        Self::new(MessageKind::Stop, Payload::Empty)
    }

    /// `shutdown`
    pub fn shutdown() -> Self {
        Self::new(MessageKind::Shutdown, Payload::Empty)
    }

    /// `cycle`
    pub fn cycle(event: CycleEvent) -> Self {
        Self::new(MessageKind::Cycle, Payload::Cycle(event))
    }

    /// `complete`
    pub fn complete(results: SuiteReport) -> Self {
        Self::new(MessageKind::Complete, Payload::Complete(CompleteEvent { results }))
    }

    /// Attach a correlation id
    pub fn with_correlation(mut self, correlation_id: Option<u64>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Check that the kind is known and the payload has the matching shape.
    pub fn validate(&self) -> Result<MessageKind, ProtocolError> {
        let kind: MessageKind = self.kind.parse()?;
        if !self.payload.fits(kind) {
            return Err(ProtocolError::PayloadMismatch {
                kind,
                payload: self.payload.name(),
            });
        }
        Ok(kind)
    }
}
