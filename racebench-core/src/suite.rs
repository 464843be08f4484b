//! Suites and candidate sets.

use crate::candidate::{Candidate, CandidateDefinition};
use racebench_ipc::CandidateId;
use std::sync::Arc;
use thiserror::Error;

/// Suite construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuiteError {
    #[error("candidate title must not be empty")]
    EmptyTitle,

    #[error("unknown candidate {0}")]
    UnknownCandidate(CandidateId),
}

/// Ordered set of candidates with stable, never-reused ids.
#[derive(Debug, Default)]
pub struct CandidateSet {
    items: Vec<Arc<CandidateDefinition>>,
    next_id: u32,
}

impl CandidateSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate and assign its id
    pub fn add(&mut self, candidate: Candidate) -> Result<CandidateId, SuiteError> {
        if candidate.title.trim().is_empty() {
            return Err(SuiteError::EmptyTitle);
        }
        let id = CandidateId(self.next_id);
        self.next_id += 1;
        self.items
            .push(Arc::new(CandidateDefinition::new(id, candidate)));
        Ok(id)
    }

    /// Remove a candidate. Its id is not handed out again.
    pub fn remove(&mut self, id: CandidateId) -> Option<Arc<CandidateDefinition>> {
        let pos = self.position(id)?;
        Some(self.items.remove(pos))
    }

    /// Move a candidate to `index` (clamped to the end)
    pub fn move_to(&mut self, id: CandidateId, index: usize) -> Result<(), SuiteError> {
        let pos = self.position(id).ok_or(SuiteError::UnknownCandidate(id))?;
        let item = self.items.remove(pos);
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        Ok(())
    }

    /// Look up a candidate
    pub fn get(&self, id: CandidateId) -> Option<&Arc<CandidateDefinition>> {
        self.items.iter().find(|c| c.id() == id)
    }

    /// Shared handles to every candidate in current order
    pub fn snapshot(&self) -> Vec<Arc<CandidateDefinition>> {
        self.items.clone()
    }

    /// Iterate in definition order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CandidateDefinition>> {
        self.items.iter()
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if there are no candidates
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, id: CandidateId) -> Option<usize> {
        self.items.iter().position(|c| c.id() == id)
    }
}

type Hook = Box<dyn FnMut() + Send>;

/// Untimed code run before and after every cycle
#[derive(Default)]
pub struct SuiteHooks {
    setup: Option<Hook>,
    teardown: Option<Hook>,
}

impl SuiteHooks {
    /// Run the setup hook, if any
    pub fn setup(&mut self) {
        if let Some(hook) = self.setup.as_mut() {
            hook();
        }
    }

    /// Run the teardown hook, if any
    pub fn teardown(&mut self) {
        if let Some(hook) = self.teardown.as_mut() {
            hook();
        }
    }
}

impl std::fmt::Debug for SuiteHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteHooks")
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// A named collection of candidates compared against each other.
///
/// ```ignore
/// let mut suite = Suite::new("string building").setup(|| reset_buffers());
/// suite.add(Candidate::sync("push_str", || build_with_push_str()))?;
/// suite.add(Candidate::sync("format!", || build_with_format()))?;
/// ```
#[derive(Debug)]
pub struct Suite {
    name: String,
    candidates: CandidateSet,
    hooks: SuiteHooks,
}

impl Suite {
    /// Empty suite
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: CandidateSet::new(),
            hooks: SuiteHooks::default(),
        }
    }

    /// Set the per-cycle setup hook
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.hooks.setup = Some(Box::new(f));
        self
    }

    /// Set the per-cycle teardown hook
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.hooks.teardown = Some(Box::new(f));
        self
    }

    /// Add a candidate
    pub fn add(&mut self, candidate: Candidate) -> Result<CandidateId, SuiteError> {
        self.candidates.add(candidate)
    }

    /// Suite name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The candidates
    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    /// Mutable access to the candidates
    pub fn candidates_mut(&mut self) -> &mut CandidateSet {
        &mut self.candidates
    }

    /// Mutable access to the hooks
    pub fn hooks_mut(&mut self) -> &mut SuiteHooks {
        &mut self.hooks
    }
}
