//! Shared data model, collaborator traits, and error taxonomy for the
//! iterative image-generation beam search.
//!
//! Every other crate in the workspace depends on this one and nothing in
//! this crate depends on them: it is the stable base the graph, ranker,
//! tracker, supervisor, and orchestrator are all built against.

pub mod atomic_io;
pub mod collaborators;
pub mod error;
pub mod ids;
pub mod model;

pub use collaborators::{
    ChatOptions, ChatResponse, Choice, GenerateOptions, GenerateResponse, GpuPhaseCoordinator,
    GpuPhaseGuard, ImageGenerator, ServiceManager, TextModel, Usage, Verdict, VisionComparator,
};
pub use error::{IbeamError, Result};
pub use ids::CandidateId;
pub use model::{
    AggregatedFeedback, AggregatedRanks, Candidate, CandidateStatus, ComparisonOutcome,
    ComparisonRecord, Critique, Dimension, Evaluation, FactorRanks, FinalWinner, Iteration,
    LineageEntry, ProviderSelection, RankingStrategy, SessionConfig, SessionRecord,
};
