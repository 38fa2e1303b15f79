//! Directed winner/loser comparison graph with one-pass transitive closure
//! (§4.2). Owned by exactly one ranking call for its lifetime (§3, §5); no
//! cross-call sharing.

use ibeam_core::CandidateId;
use std::collections::{HashMap, HashSet};

/// Directed edges `winner -> loser` between candidates, with both the
/// direct adjacency (`beats`) and its transpose (`loses_to`) maintained in
/// lockstep so `infer` never has to walk a chain at query time.
#[derive(Debug, Default, Clone)]
pub struct ComparisonGraph {
    beats: HashMap<CandidateId, HashSet<CandidateId>>,
    loses_to: HashMap<CandidateId, HashSet<CandidateId>>,
}

impl ComparisonGraph {
    /// A fresh, empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the graph from edges persisted in a prior ranking call (§4.4
    /// "known comparisons"). Each pair is recorded exactly as `record`
    /// would, so transitive closure still applies across the seed set.
    pub fn seed(&mut self, known_comparisons: impl IntoIterator<Item = (CandidateId, CandidateId)>) {
        for (winner, loser) in known_comparisons {
            self.record(winner, loser, winner);
        }
    }

    /// Record that `winner` beat the other of `(a, b)`, then extend the
    /// closure by one layer: every candidate that already beats `winner`
    /// is recorded as also beating the new loser, and every candidate the
    /// new loser already beats is recorded as also losing to `winner`.
    ///
    /// A no-op if this exact edge is already present.
    pub fn record(&mut self, a: CandidateId, b: CandidateId, winner: CandidateId) {
        let loser = if winner == a { b } else { a };
        if winner == loser {
            return;
        }
        if self.beats.get(&winner).is_some_and(|s| s.contains(&loser)) {
            return;
        }

        let predecessors: Vec<CandidateId> = self
            .loses_to
            .get(&winner)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let successors: Vec<CandidateId> = self
            .beats
            .get(&loser)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        self.add_edge(winner, loser);
        for x in predecessors {
            self.add_edge(x, loser);
        }
        for y in successors {
            self.add_edge(winner, y);
        }
    }

    fn add_edge(&mut self, winner: CandidateId, loser: CandidateId) {
        self.beats.entry(winner).or_default().insert(loser);
        self.loses_to.entry(loser).or_default().insert(winner);
    }

    /// Whether a directed edge already connects `a` and `b`, in either
    /// direction. Returns `Some(a)` or `Some(b)` naming whichever already
    /// beats the other, or `None` if no relation is known yet.
    #[must_use]
    pub fn infer(&self, a: CandidateId, b: CandidateId) -> Option<CandidateId> {
        if self.beats.get(&a).is_some_and(|s| s.contains(&b)) {
            Some(a)
        } else if self.beats.get(&b).is_some_and(|s| s.contains(&a)) {
            Some(b)
        } else {
            None
        }
    }

    /// Clear both adjacency maps.
    pub fn reset(&mut self) {
        self.beats.clear();
        self.loses_to.clear();
    }

    /// All `(winner, loser)` edges currently known, direct and inferred
    /// alike, in unspecified order. Used by callers that persist surviving
    /// edges as `known_comparisons` for a subsequent ranking call.
    pub fn edges(&self) -> Vec<(CandidateId, CandidateId)> {
        self.beats
            .iter()
            .flat_map(|(winner, losers)| losers.iter().map(move |loser| (*winner, *loser)))
            .collect()
    }

    /// Number of candidates with at least one recorded edge.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut nodes: HashSet<CandidateId> = HashSet::new();
        nodes.extend(self.beats.keys().copied());
        nodes.extend(self.loses_to.keys().copied());
        nodes.len()
    }
}
