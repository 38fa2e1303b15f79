//! Pairwise ranker, ensemble voter, and ranking engine (C3-C5).
//!
//! `ibeam-graph` supplies the comparison graph this engine drives; together
//! they turn a set of candidate images and a prompt into a total order with
//! per-candidate aggregated feedback.

pub mod engine;
pub mod ensemble;
pub mod pairwise;
pub mod random;

pub use engine::{
    rank_images, ErrorRecord, ProgressEvent, RankedCandidate, RankingMetadata, RankingOptions,
    RankingOutcome,
};
pub use ensemble::{AggregateVerdict, EnsembleVoter};
pub use pairwise::PairwiseRanker;
pub use random::{RandomSource, ThreadRandomSource};

#[cfg(any(test, feature = "test-util"))]
pub use random::ScriptedRandomSource;
