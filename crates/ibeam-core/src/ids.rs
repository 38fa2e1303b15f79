use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable compound identifier for one candidate: `(iteration, candidate_index)`.
///
/// Rendered in its short textual form (e.g. `i1c2`) wherever a single string
/// key is needed, such as comparison-graph adjacency maps or log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId {
    /// Iteration index, zero-based.
    pub iteration: u32,
    /// Candidate index within the iteration, zero-based.
    pub candidate_index: u32,
}

impl CandidateId {
    /// Construct a new candidate id.
    #[must_use]
    pub fn new(iteration: u32, candidate_index: u32) -> Self {
        Self {
            iteration,
            candidate_index,
        }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}c{}", self.iteration, self.candidate_index)
    }
}
