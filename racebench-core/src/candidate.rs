//! Candidate Definitions
//!
//! A candidate is a titled piece of code to be timed. Three shapes are
//! supported:
//! - synchronous closures, timed as they return
//! - deferred closures that receive a [`Deferred`] handle and settle it
//!   themselves, possibly from another thread
//! - closures returning a future, driven on a current-thread tokio runtime

use parking_lot::Mutex;
use racebench_ipc::CandidateId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future produced by an async candidate
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Why a candidate stopped producing samples
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateError {
    #[error("panicked: {message}")]
    Panicked { message: String },

    #[error("rejected: {message}")]
    Rejected { message: String },

    #[error("did not settle within {waited:?}")]
    Timeout { waited: Duration },

    #[error("completion handle dropped without resolve or reject")]
    Abandoned,

    #[error("async runtime unavailable: {message}")]
    Runtime { message: String },
}

impl CandidateError {
    /// Build a `Panicked` error from a caught panic payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        CandidateError::Panicked { message }
    }
}

/// Completion handle passed to deferred candidates.
///
/// Exactly one of [`resolve`](Self::resolve) or [`reject`](Self::reject) should
/// be called. Dropping the handle without either ends sampling with
/// [`CandidateError::Abandoned`].
#[derive(Debug)]
pub struct Deferred {
    tx: crossbeam_channel::Sender<Result<(), String>>,
}

impl Deferred {
    pub(crate) fn pair() -> (Self, crossbeam_channel::Receiver<Result<(), String>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Self { tx }, rx)
    }

    /// Signal successful completion of this execution
    pub fn resolve(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Signal failure; the candidate is recorded as errored
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

/// The callable behind a candidate
pub enum CandidateCode {
    /// Completes when the closure returns
    Sync(Box<dyn FnMut() + Send>),
    /// Completes when the handle is resolved
    Deferred(Box<dyn FnMut(Deferred) + Send>),
    /// Completes when the returned future does
    Future(Box<dyn FnMut() -> BoxFuture + Send>),
}

impl CandidateCode {
    /// Whether the code signals its own completion
    pub fn is_async(&self) -> bool {
        !matches!(self, CandidateCode::Sync(_))
    }
}

impl fmt::Debug for CandidateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateCode::Sync(_) => f.write_str("Sync"),
            CandidateCode::Deferred(_) => f.write_str("Deferred"),
            CandidateCode::Future(_) => f.write_str("Future"),
        }
    }
}

/// A candidate not yet added to a suite
#[derive(Debug)]
pub struct Candidate {
    pub(crate) title: String,
    pub(crate) code: CandidateCode,
}

impl Candidate {
    /// Synchronous candidate
    pub fn sync<F>(title: impl Into<String>, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            title: title.into(),
            code: CandidateCode::Sync(Box::new(f)),
        }
    }

    /// Candidate that settles a [`Deferred`] handle
    pub fn deferred<F>(title: impl Into<String>, f: F) -> Self
    where
        F: FnMut(Deferred) + Send + 'static,
    {
        Self {
            title: title.into(),
            code: CandidateCode::Deferred(Box::new(f)),
        }
    }

    /// Candidate returning a future
    pub fn future<F, Fut>(title: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            title: title.into(),
            code: CandidateCode::Future(Box::new(move || Box::pin(f()) as BoxFuture)),
        }
    }

    /// Title of the candidate
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// A candidate registered in a suite.
///
/// Immutable apart from the callable's own captured state, which is only ever
/// driven by one sampler at a time.
#[derive(Debug)]
pub struct CandidateDefinition {
    id: CandidateId,
    title: String,
    is_async: bool,
    code: Mutex<CandidateCode>,
}

impl CandidateDefinition {
    pub(crate) fn new(id: CandidateId, candidate: Candidate) -> Self {
        Self {
            id,
            title: candidate.title,
            is_async: candidate.code.is_async(),
            code: Mutex::new(candidate.code),
        }
    }

    /// Stable id
    pub fn id(&self) -> CandidateId {
        self.id
    }

    /// Display title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Whether the code signals its own completion
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub(crate) fn code(&self) -> &Mutex<CandidateCode> {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_flag() {
        assert!(!Candidate::sync("a", || {}).code.is_async());
        assert!(Candidate::deferred("b", |d: Deferred| d.resolve()).code.is_async());
        assert!(Candidate::future("c", || async {}).code.is_async());
    }

    #[test]
    fn test_deferred_signals() {
        let (d, rx) = Deferred::pair();
        d.reject("nope");
        assert_eq!(rx.recv().unwrap(), Err("nope".to_string()));

        let (d, rx) = Deferred::pair();
        drop(d);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("bad input {}", 3)).unwrap_err();
        assert_eq!(
            CandidateError::from_panic(payload),
            CandidateError::Panicked {
                message: "bad input 3".to_string()
            }
        );
    }
}
