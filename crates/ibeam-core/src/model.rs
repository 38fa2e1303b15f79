use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which sub-prompt a refinement step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Content: *what* is depicted.
    What,
    /// Style: *how* it is depicted.
    How,
}

impl Dimension {
    /// The other dimension; used nowhere in the schedule itself but handy
    /// for tests and ad-hoc tooling.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Dimension::What => Dimension::How,
            Dimension::How => Dimension::What,
        }
    }
}

/// Ranking engine strategy selection (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Always compare every unordered pair.
    AllPairs,
    /// Tournament-with-transitivity.
    Tournament,
    /// All-pairs when `N <= 8`, tournament otherwise.
    Auto,
}

/// Lifecycle status of a [`Candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    /// Recorded defensively before any work has started.
    Attempted,
    /// Refinement, combination, and generation all succeeded.
    Completed,
    /// One of refinement, combination, or generation failed.
    Failed,
}

fn default_alignment_weight() -> f64 {
    0.7
}

fn default_ensemble_size() -> u32 {
    1
}

/// Which named provider implementation a session uses for each collaborator
/// role. Values are opaque to the core; they are passed through to whatever
/// factory wires up the concrete provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSelection {
    /// Provider name for the text model collaborator.
    #[serde(default)]
    pub text_model: Option<String>,
    /// Provider name for the vision-language comparator collaborator.
    #[serde(default)]
    pub vision_comparator: Option<String>,
    /// Provider name for the image generator collaborator.
    #[serde(default)]
    pub image_generator: Option<String>,
}

/// Immutable session-wide configuration (§3 `SessionConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Candidates produced per iteration.
    pub beam_width: u32,
    /// Survivors kept per iteration; must be `<= beam_width`.
    pub keep_top: u32,
    /// Total number of iterations to run.
    pub max_iterations: u32,
    /// Weight given to alignment in `combined = w*alignment + (1-w)*aesthetics`.
    #[serde(default = "default_alignment_weight")]
    pub alignment_weight: f64,
    /// Number of ensemble votes per pairwise comparison.
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: u32,
    /// Ranking strategy selection.
    #[serde(default = "default_ranking_strategy")]
    pub ranking_strategy: RankingStrategy,
    /// Deterministic per-iteration dimension schedule, cycled if shorter
    /// than `max_iterations`.
    pub refinement_schedule: Vec<Dimension>,
    /// Named collaborator provider selections.
    #[serde(default)]
    pub providers: ProviderSelection,
    /// Opaque pass-through provider options (temperature, VRAM hints, etc).
    #[serde(default)]
    pub provider_options: HashMap<String, serde_json::Value>,
}

fn default_ranking_strategy() -> RankingStrategy {
    RankingStrategy::Auto
}

impl SessionConfig {
    /// The refinement dimension for iteration `t`, cycling through
    /// `refinement_schedule` when it is shorter than `max_iterations`.
    ///
    /// # Panics
    /// Panics if `refinement_schedule` is empty; a `SessionConfig` with no
    /// schedule is not constructible through normal config loading.
    #[must_use]
    pub fn dimension_for_iteration(&self, iteration: u32) -> Dimension {
        let len = self.refinement_schedule.len();
        assert!(len > 0, "refinement_schedule must not be empty");
        self.refinement_schedule[(iteration as usize) % len]
    }

    /// Aesthetics weight, derived as `1 - alignment_weight`.
    #[must_use]
    pub fn aesthetics_weight(&self) -> f64 {
        1.0 - self.alignment_weight
    }
}

/// Per-factor ordinal ranks observed for one image in a single comparison
/// (§4.3: "ordinal ranks 1 and 2 per factor").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorRanks {
    /// Alignment rank (1 = better).
    pub alignment: f64,
    /// Aesthetics rank (1 = better).
    pub aesthetics: f64,
}

impl FactorRanks {
    /// `combined = w*alignment + (1-w)*aesthetics`; lower is better.
    #[must_use]
    pub fn combined(&self, alignment_weight: f64) -> f64 {
        alignment_weight * self.alignment + (1.0 - alignment_weight) * self.aesthetics
    }
}

/// Aggregated (alignment, aesthetics, combined) ranks for a candidate after
/// ranking, which may be fractional once averaged across an ensemble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggregatedRanks {
    /// Mean alignment rank.
    pub alignment: f64,
    /// Mean aesthetics rank.
    pub aesthetics: f64,
    /// `w*alignment + (1-w)*aesthetics`.
    pub combined: f64,
}

/// Outcome of a single pairwise comparison from one candidate's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOutcome {
    /// This candidate won the comparison.
    Win,
    /// This candidate lost the comparison.
    Loss,
}

/// One resolved comparison against an opponent, recorded on the winning and
/// losing candidate alike (§6 `metadata.json` `comparisons` array).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRecord {
    /// The opponent's candidate index within the same iteration.
    pub opponent_candidate_index: u32,
    /// Outcome from this candidate's perspective.
    pub result: ComparisonOutcome,
    /// This candidate's observed per-factor ranks.
    pub my_ranks: FactorRanks,
    /// The opponent's observed per-factor ranks.
    pub opponent_ranks: FactorRanks,
    /// When the comparison resolved.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Per-candidate aggregated feedback after ranking (§3 `AggregatedFeedback`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedFeedback {
    /// Deduped short phrases describing strengths.
    pub strengths: Vec<String>,
    /// Deduped short phrases describing weaknesses.
    pub weaknesses: Vec<String>,
    /// Aggregated ranks, if any comparisons were made.
    pub ranks: Option<AggregatedRanks>,
    /// A single short improvement phrase, or none.
    pub improvement_suggestion: Option<String>,
}

/// Structured critique handed back into refinement for the next iteration
/// (§3 `Critique`, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    /// Which dimension the *next* iteration should refine.
    pub dimension: Dimension,
    /// What was wrong or could be improved, in the ranker's words.
    pub critique: String,
    /// Concrete recommendation for the next refinement pass.
    pub recommendation: String,
    /// Why this recommendation follows from the ranking.
    pub reason: String,
}

/// Vision-comparator evaluation summary stored once a candidate completes
/// (§6 `metadata.json` `evaluation` object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Alignment score (absolute, provider-defined scale).
    pub alignment_score: f64,
    /// Aesthetic score (absolute, provider-defined scale).
    pub aesthetic_score: f64,
    /// Strengths observed directly on this candidate.
    pub strengths: Vec<String>,
    /// Weaknesses observed directly on this candidate.
    pub weaknesses: Vec<String>,
    /// Free-form analysis text.
    pub analysis: Option<String>,
}

/// One row per `(iteration, candidate_index)` (§3 `Candidate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Index within the iteration.
    pub candidate_index: u32,
    /// The parent candidate's index in the previous iteration, or `None` at
    /// iteration 0.
    pub parent_candidate_index: Option<u32>,
    /// Which dimension this candidate's prompt was refined along.
    pub dimension_refined: Dimension,
    /// Lifecycle status.
    pub status: CandidateStatus,
    /// Content sub-prompt.
    pub what_prompt: String,
    /// Style sub-prompt.
    pub how_prompt: String,
    /// Text model's merge of `what_prompt` and `how_prompt`.
    pub combined_prompt: String,
    /// Local path or URL to the generated image, once available.
    pub image_ref: Option<String>,
    /// Vision-comparator evaluation summary, once available.
    pub evaluation: Option<Evaluation>,
    /// Absolute score, if the comparator produces one; `None` when only
    /// ordinal ranks exist.
    pub total_score: Option<f64>,
    /// Whether this candidate was kept for the next iteration.
    pub survived: bool,
    /// Rank assigned within the iteration by the ranking engine.
    pub rank_in_iteration: Option<u32>,
    /// Per-opponent comparison records, in temporal resolution order.
    pub comparisons: Vec<ComparisonRecord>,
    /// Ranker's aggregated feedback, once ranking has run.
    pub aggregated_feedback: Option<AggregatedFeedback>,
    /// Structured critique feeding the next iteration's refinement.
    pub critique: Option<Critique>,
}

impl Candidate {
    /// Build the defensive `attempted` row written before any work starts
    /// (§4.6 `record_attempt`, §4.7 step 3a).
    #[must_use]
    pub fn new_attempted(
        candidate_index: u32,
        parent_candidate_index: Option<u32>,
        dimension_refined: Dimension,
        what_prompt: String,
        how_prompt: String,
    ) -> Self {
        Self {
            candidate_index,
            parent_candidate_index,
            dimension_refined,
            status: CandidateStatus::Attempted,
            what_prompt,
            how_prompt,
            combined_prompt: String::new(),
            image_ref: None,
            evaluation: None,
            total_score: None,
            survived: false,
            rank_in_iteration: None,
            comparisons: Vec::new(),
            aggregated_feedback: None,
            critique: None,
        }
    }
}

/// One iteration's worth of candidates (§3 `SessionRecord.iterations[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// Zero-based iteration index.
    pub iteration_index: u32,
    /// The dimension refined by every candidate in this iteration.
    pub dimension_refined: Dimension,
    /// Candidates in insertion (candidate_index) order.
    pub candidates: Vec<Candidate>,
    /// Best candidate's index, once ranking has run.
    pub best_candidate_index: Option<u32>,
    /// Best candidate's score (or best `combined` rank), mirroring
    /// whichever tie-break rule selected it.
    pub best_score: Option<f64>,
}

impl Iteration {
    /// A new, empty iteration for `iteration_index` refining `dimension`.
    #[must_use]
    pub fn new(iteration_index: u32, dimension: Dimension) -> Self {
        Self {
            iteration_index,
            dimension_refined: dimension,
            candidates: Vec::new(),
            best_candidate_index: None,
            best_score: None,
        }
    }
}

/// One step of the winner's parent chain, root first (§3, §4.6 `mark_final_winner`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineageEntry {
    /// Iteration index of this lineage step.
    pub iteration: u32,
    /// Candidate index of this lineage step.
    pub candidate_index: u32,
}

/// The session's global winner, recorded once at the end (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FinalWinner {
    /// Iteration index of the winning candidate.
    pub iteration: u32,
    /// Candidate index of the winning candidate.
    pub candidate_index: u32,
    /// The winner's absolute score, if any.
    pub total_score: Option<f64>,
}

/// Top-level on-disk document (§3 `SessionRecord`, §6 `metadata.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id (e.g. `"ses-<uuid>"`).
    pub session_id: String,
    /// Session start time.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The user's original text prompt.
    pub user_prompt: String,
    /// The immutable session configuration.
    pub config: SessionConfig,
    /// Iterations in chronological order.
    pub iterations: Vec<Iteration>,
    /// Winner's parent chain, root first.
    pub lineage: Vec<LineageEntry>,
    /// The global winner, once the session completes.
    pub final_winner: Option<FinalWinner>,
}

impl SessionRecord {
    /// A fresh session skeleton with no iterations (§4.6 `initialize`).
    #[must_use]
    pub fn new(session_id: String, user_prompt: String, config: SessionConfig) -> Self {
        Self {
            session_id,
            timestamp: chrono::Utc::now(),
            user_prompt,
            config,
            iterations: Vec::new(),
            lineage: Vec::new(),
            final_winner: None,
        }
    }
}
