//! Metadata tracker (C7): the sole writer of a session's `metadata.json`,
//! plus the `tokens.json` side file (§4.6, §6).
//!
//! Every mutation goes through [`MetadataTracker`], which holds the
//! in-memory [`SessionRecord`] behind a `tokio::sync::Mutex` and rewrites
//! the whole document to disk — atomically, via
//! [`ibeam_core::atomic_io::atomic_write_json`] — before the call returns.
//! Concurrent candidate workers within an iteration all serialize through
//! this one lock (§5 "the MetadataTracker holds the sole write lock").

pub mod tokens;

use chrono::Utc;
use ibeam_core::{
    atomic_io, Candidate, CandidateStatus, Critique, Dimension, Evaluation, FinalWinner, IbeamError,
    Iteration, LineageEntry, Result, SessionConfig, SessionRecord,
};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
pub use tokens::{EstimatedCost, TokenDocument, TokenRecord, TokenTotals, TokenTracker};

/// The updated fields a candidate gains once refinement, combination, and
/// generation all succeed (§4.7 step 3d).
#[derive(Debug, Clone)]
pub struct CandidateResults {
    /// The (possibly refined) content sub-prompt.
    pub what_prompt: String,
    /// The (possibly refined) style sub-prompt.
    pub how_prompt: String,
    /// The text model's merge of `what_prompt` and `how_prompt`.
    pub combined_prompt: String,
    /// The generated image's local path or URL.
    pub image_ref: String,
    /// Vision-comparator evaluation summary, if one is produced at
    /// generation time rather than during ranking.
    pub evaluation: Option<Evaluation>,
    /// Absolute score, if any.
    pub total_score: Option<f64>,
}

/// Ranking outputs written back onto one candidate (§4.6
/// `enrich_candidate_with_ranking_data`).
#[derive(Debug, Clone)]
pub struct RankingEnrichment {
    /// Per-opponent comparison records in temporal resolution order.
    pub comparisons: Vec<ibeam_core::ComparisonRecord>,
    /// The ranker's aggregated feedback for this candidate.
    pub aggregated_feedback: Option<ibeam_core::AggregatedFeedback>,
    /// The rank assigned within the iteration.
    pub rank_in_iteration: Option<u32>,
    /// Structured critique feeding the next iteration's refinement.
    pub critique: Option<Critique>,
}

/// Crash-safe tracker owning a single session's `metadata.json`.
///
/// Construct with [`MetadataTracker::initialize`]; the returned tracker is
/// the only valid writer for that session's directory for the rest of the
/// process's lifetime.
pub struct MetadataTracker {
    record: Mutex<SessionRecord>,
    metadata_path: PathBuf,
    session_dir: PathBuf,
}

impl MetadataTracker {
    /// Create the session directory, write the initial skeleton atomically,
    /// and return a tracker ready to record attempts (§4.6 `initialize`).
    ///
    /// The session directory is `output_dir/<YYYY-MM-DD>/<session_id>/`
    /// (§6 "Session paths"), dated at initialization time.
    pub async fn initialize(
        output_dir: &Path,
        session_id: String,
        user_prompt: String,
        config: SessionConfig,
    ) -> Result<Self> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let session_dir = output_dir.join(date).join(&session_id);
        let metadata_path = session_dir.join("metadata.json");

        let record = SessionRecord::new(session_id, user_prompt, config);
        atomic_io::atomic_write_json(&metadata_path, &record).await?;

        tracing::info!(path = %metadata_path.display(), "session metadata initialized");

        Ok(Self {
            record: Mutex::new(record),
            metadata_path,
            session_dir,
        })
    }

    /// Re-open a tracker over an already-initialized session directory,
    /// reading whatever `metadata.json` currently holds. Used by tooling
    /// that inspects or resumes a session's on-disk state.
    pub async fn reopen(session_dir: PathBuf) -> Result<Self> {
        let metadata_path = session_dir.join("metadata.json");
        let record: SessionRecord = atomic_io::read_json(&metadata_path).await?;
        Ok(Self {
            record: Mutex::new(record),
            metadata_path,
            session_dir,
        })
    }

    /// The directory this session's files (metadata, tokens, images) live
    /// under.
    #[must_use]
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// A clone of the current in-memory record, for read-only inspection
    /// (e.g. the orchestrator pulling `known_comparisons` forward, or the
    /// CLI's `inspect` subcommand).
    pub async fn snapshot(&self) -> SessionRecord {
        self.record.lock().await.clone()
    }

    /// Insert (or look up) the iteration for `iteration_index`, append a
    /// defensive `attempted` candidate row, and persist (§4.6
    /// `record_attempt`). Must be called before any refinement, combination,
    /// or generation work starts for this candidate.
    pub async fn record_attempt(
        &self,
        iteration_index: u32,
        dimension: Dimension,
        candidate: Candidate,
    ) -> Result<()> {
        let mut record = self.record.lock().await;

        let iteration = find_or_insert_iteration(&mut record.iterations, iteration_index, dimension);
        iteration.candidates.push(candidate);

        self.persist(&record).await
    }

    /// Fill in a completed candidate's results and persist (§4.6
    /// `update_attempt_with_results`).
    pub async fn update_attempt_with_results(
        &self,
        iteration_index: u32,
        candidate_index: u32,
        results: CandidateResults,
        survived: bool,
    ) -> Result<()> {
        let mut record = self.record.lock().await;
        let candidate = find_candidate_mut(&mut record.iterations, iteration_index, candidate_index)?;

        candidate.what_prompt = results.what_prompt;
        candidate.how_prompt = results.how_prompt;
        candidate.combined_prompt = results.combined_prompt;
        candidate.image_ref = Some(results.image_ref);
        candidate.evaluation = results.evaluation;
        candidate.total_score = results.total_score;
        candidate.survived = survived;
        candidate.status = CandidateStatus::Completed;

        self.persist(&record).await
    }

    /// Mark a candidate's production as failed and persist. Never aborts
    /// the iteration; the orchestrator continues with the remaining
    /// children (§4.7 step 3d).
    pub async fn mark_attempt_failed(&self, iteration_index: u32, candidate_index: u32) -> Result<()> {
        let mut record = self.record.lock().await;
        let candidate = find_candidate_mut(&mut record.iterations, iteration_index, candidate_index)?;
        candidate.status = CandidateStatus::Failed;
        self.persist(&record).await
    }

    /// Write ranking outputs onto an existing candidate and recompute the
    /// iteration's `best_candidate_index`/`best_score` (§4.6
    /// `enrich_candidate_with_ranking_data`).
    ///
    /// Errors with [`IbeamError::SessionFatal`] if the iteration or
    /// candidate does not already exist — ranking can only enrich a
    /// candidate that `record_attempt` already recorded.
    pub async fn enrich_candidate_with_ranking_data(
        &self,
        iteration_index: u32,
        candidate_index: u32,
        enrichment: RankingEnrichment,
    ) -> Result<()> {
        let mut record = self.record.lock().await;

        {
            let candidate = find_candidate_mut(&mut record.iterations, iteration_index, candidate_index)?;
            candidate.comparisons = enrichment.comparisons;
            candidate.aggregated_feedback = enrichment.aggregated_feedback;
            candidate.rank_in_iteration = enrichment.rank_in_iteration;
            candidate.critique = enrichment.critique;
        }

        let iteration = find_iteration_mut(&mut record.iterations, iteration_index)?;
        recompute_best(iteration);

        self.persist(&record).await
    }

    /// Set `survived` across every candidate in an iteration: `true` for
    /// the indices in `survivor_indices`, `false` for the rest (§4.7 step 5
    /// "select survivors").
    pub async fn mark_survivors(&self, iteration_index: u32, survivor_indices: &[u32]) -> Result<()> {
        let mut record = self.record.lock().await;
        let iteration = find_iteration_mut(&mut record.iterations, iteration_index)?;
        for candidate in &mut iteration.candidates {
            candidate.survived = survivor_indices.contains(&candidate.candidate_index);
        }
        self.persist(&record).await
    }

    /// Record the session's global winner and materialize its lineage by
    /// walking `parent_candidate_index` back to the root, root first (§4.6
    /// `mark_final_winner`).
    pub async fn mark_final_winner(
        &self,
        iteration_index: u32,
        candidate_index: u32,
        total_score: Option<f64>,
    ) -> Result<()> {
        let mut record = self.record.lock().await;

        let lineage = walk_lineage(&record.iterations, iteration_index, candidate_index)?;

        record.final_winner = Some(FinalWinner {
            iteration: iteration_index,
            candidate_index,
            total_score,
        });
        record.lineage = lineage;

        self.persist(&record).await
    }

    /// Snapshot `token_tracker` and write `tokens.json` in this session's
    /// directory (§4.6 `persist_tokens`).
    pub async fn persist_tokens(&self, token_tracker: &TokenTracker) -> Result<()> {
        let record = self.record.lock().await;
        let doc = token_tracker.snapshot(&record.session_id);
        let tokens_path = self.session_dir.join("tokens.json");
        atomic_io::atomic_write_json(&tokens_path, &doc).await
    }

    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        atomic_io::atomic_write_json(&self.metadata_path, record).await
    }
}

fn find_or_insert_iteration(
    iterations: &mut Vec<Iteration>,
    iteration_index: u32,
    dimension: Dimension,
) -> &mut Iteration {
    if let Some(pos) = iterations.iter().position(|it| it.iteration_index == iteration_index) {
        return &mut iterations[pos];
    }
    iterations.push(Iteration::new(iteration_index, dimension));
    iterations
        .last_mut()
        .unwrap_or_else(|| unreachable!("just pushed"))
}

fn find_iteration_mut(iterations: &mut [Iteration], iteration_index: u32) -> Result<&mut Iteration> {
    iterations
        .iter_mut()
        .find(|it| it.iteration_index == iteration_index)
        .ok_or_else(|| IbeamError::SessionFatal(format!("no such iteration {iteration_index}")))
}

fn find_candidate_mut(
    iterations: &mut [Iteration],
    iteration_index: u32,
    candidate_index: u32,
) -> Result<&mut Candidate> {
    let iteration = find_iteration_mut(iterations, iteration_index)?;
    iteration
        .candidates
        .iter_mut()
        .find(|c| c.candidate_index == candidate_index)
        .ok_or_else(|| {
            IbeamError::SessionFatal(format!(
                "no such candidate ({iteration_index}, {candidate_index})"
            ))
        })
}

/// Recompute `best_candidate_index`/`best_score` for one iteration.
///
/// Tie-break rule (DESIGN.md Open Question 1): candidates with a numeric
/// `total_score` always rank ahead of ordinal-only candidates; within the
/// numeric subset, higher `total_score` wins; within the ordinal-only
/// subset, lower `combined` rank wins; final tiebreak is ascending
/// `candidate_index`.
fn recompute_best(iteration: &mut Iteration) {
    let best = iteration
        .candidates
        .iter()
        .filter(|c| c.status == CandidateStatus::Completed)
        .max_by(|a, b| best_key(a).cmp(&best_key(b)));

    match best {
        Some(candidate) => {
            iteration.best_candidate_index = Some(candidate.candidate_index);
            iteration.best_score = candidate.total_score.or_else(|| {
                candidate
                    .aggregated_feedback
                    .as_ref()
                    .and_then(|fb| fb.ranks.map(|r| r.combined))
            });
        }
        None => {
            iteration.best_candidate_index = None;
            iteration.best_score = None;
        }
    }
}

/// Orderable sort key matching [`recompute_best`]'s tie-break rule. Scores
/// and ranks are converted to fixed-point milli-units so the key can derive
/// `Ord` without pulling in a float-ordering crate.
fn best_key(candidate: &Candidate) -> (u8, i64, std::cmp::Reverse<u32>) {
    match candidate.total_score {
        Some(score) => (2, (score * 1000.0).round() as i64, std::cmp::Reverse(candidate.candidate_index)),
        None => {
            let combined = candidate
                .aggregated_feedback
                .as_ref()
                .and_then(|fb| fb.ranks.map(|r| r.combined));
            match combined {
                // Lower combined rank is better; negate so max_by still picks it.
                Some(combined) => (1, -((combined * 1000.0).round() as i64), std::cmp::Reverse(candidate.candidate_index)),
                None => (0, i64::MIN, std::cmp::Reverse(candidate.candidate_index)),
            }
        }
    }
}

fn walk_lineage(
    iterations: &[Iteration],
    iteration_index: u32,
    candidate_index: u32,
) -> Result<Vec<LineageEntry>> {
    let mut chain = Vec::new();
    let mut cursor = Some((iteration_index, candidate_index));

    while let Some((it_idx, cand_idx)) = cursor {
        let iteration = iterations
            .iter()
            .find(|it| it.iteration_index == it_idx)
            .ok_or_else(|| IbeamError::SessionFatal(format!("no such iteration {it_idx}")))?;
        let candidate = iteration
            .candidates
            .iter()
            .find(|c| c.candidate_index == cand_idx)
            .ok_or_else(|| {
                IbeamError::SessionFatal(format!("no such candidate ({it_idx}, {cand_idx})"))
            })?;

        chain.push(LineageEntry {
            iteration: it_idx,
            candidate_index: cand_idx,
        });

        cursor = match (it_idx.checked_sub(1), candidate.parent_candidate_index) {
            (Some(parent_iter), Some(parent_cand)) => Some((parent_iter, parent_cand)),
            _ => None,
        };
    }

    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibeam_core::{AggregatedFeedback, AggregatedRanks, ComparisonOutcome, ComparisonRecord, FactorRanks, ProviderSelection, RankingStrategy};
    use std::collections::HashMap;

    fn config() -> SessionConfig {
        SessionConfig {
            beam_width: 2,
            keep_top: 1,
            max_iterations: 2,
            alignment_weight: 0.7,
            ensemble_size: 1,
            ranking_strategy: RankingStrategy::Auto,
            refinement_schedule: vec![Dimension::What, Dimension::How],
            providers: ProviderSelection::default(),
            provider_options: HashMap::new(),
        }
    }

    fn root_candidate(idx: u32) -> Candidate {
        Candidate::new_attempted(idx, None, Dimension::What, "a cat".to_string(), "oil painting".to_string())
    }

    async fn fresh_tracker() -> (MetadataTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let tracker = MetadataTracker::initialize(
            dir.path(),
            "ses-test".to_string(),
            "a cat on a windowsill".to_string(),
            config(),
        )
        .await
        .expect("initialize");
        (tracker, dir)
    }

    #[tokio::test]
    async fn initialize_writes_empty_skeleton() {
        let (tracker, _dir) = fresh_tracker().await;
        let record = tracker.snapshot().await;
        assert!(record.iterations.is_empty());
        assert!(record.final_winner.is_none());

        let on_disk: SessionRecord = atomic_io::read_json(&tracker.metadata_path).await.expect("read");
        assert_eq!(on_disk.session_id, "ses-test");
    }

    #[tokio::test]
    async fn record_attempt_inserts_iteration_and_candidate() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker
            .record_attempt(0, Dimension::What, root_candidate(0))
            .await
            .expect("record");
        tracker
            .record_attempt(0, Dimension::What, root_candidate(1))
            .await
            .expect("record");

        let record = tracker.snapshot().await;
        assert_eq!(record.iterations.len(), 1);
        assert_eq!(record.iterations[0].candidates.len(), 2);
        assert_eq!(record.iterations[0].candidates[0].status, CandidateStatus::Attempted);
    }

    #[tokio::test]
    async fn update_attempt_with_results_completes_candidate() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");

        tracker
            .update_attempt_with_results(
                0,
                0,
                CandidateResults {
                    what_prompt: "a fluffy cat".to_string(),
                    how_prompt: "oil painting".to_string(),
                    combined_prompt: "a fluffy cat, oil painting".to_string(),
                    image_ref: "iter0-cand0.png".to_string(),
                    evaluation: None,
                    total_score: Some(81.5),
                },
                false,
            )
            .await
            .expect("update");

        let record = tracker.snapshot().await;
        let candidate = &record.iterations[0].candidates[0];
        assert_eq!(candidate.status, CandidateStatus::Completed);
        assert_eq!(candidate.image_ref.as_deref(), Some("iter0-cand0.png"));
        assert_eq!(candidate.total_score, Some(81.5));
    }

    #[tokio::test]
    async fn mark_attempt_failed_leaves_other_fields_untouched() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");
        tracker.mark_attempt_failed(0, 0).await.expect("mark failed");

        let record = tracker.snapshot().await;
        assert_eq!(record.iterations[0].candidates[0].status, CandidateStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_candidate_is_session_fatal() {
        let (tracker, _dir) = fresh_tracker().await;
        let err = tracker.mark_attempt_failed(0, 0).await.unwrap_err();
        assert!(matches!(err, IbeamError::SessionFatal(_)));
    }

    fn feedback(combined: f64) -> AggregatedFeedback {
        AggregatedFeedback {
            strengths: vec![],
            weaknesses: vec![],
            ranks: Some(AggregatedRanks {
                alignment: combined,
                aesthetics: combined,
                combined,
            }),
            improvement_suggestion: None,
        }
    }

    fn comparison(opponent: u32, result: ComparisonOutcome) -> ComparisonRecord {
        ComparisonRecord {
            opponent_candidate_index: opponent,
            result,
            my_ranks: FactorRanks { alignment: 1.0, aesthetics: 1.0 },
            opponent_ranks: FactorRanks { alignment: 2.0, aesthetics: 2.0 },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enrich_recomputes_best_preferring_numeric_score() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");
        tracker.record_attempt(0, Dimension::What, root_candidate(1)).await.expect("record");

        for idx in 0..2 {
            tracker
                .update_attempt_with_results(
                    0,
                    idx,
                    CandidateResults {
                        what_prompt: "p".to_string(),
                        how_prompt: "p".to_string(),
                        combined_prompt: "p".to_string(),
                        image_ref: format!("iter0-cand{idx}.png"),
                        evaluation: None,
                        total_score: None,
                    },
                    false,
                )
                .await
                .expect("update");
        }

        // Candidate 0 only has ordinal ranks; candidate 1 has a numeric score.
        tracker
            .enrich_candidate_with_ranking_data(
                0,
                0,
                RankingEnrichment {
                    comparisons: vec![comparison(1, ComparisonOutcome::Loss)],
                    aggregated_feedback: Some(feedback(1.8)),
                    rank_in_iteration: Some(2),
                    critique: None,
                },
            )
            .await
            .expect("enrich 0");

        tracker
            .update_attempt_with_results(
                0,
                1,
                CandidateResults {
                    what_prompt: "p".to_string(),
                    how_prompt: "p".to_string(),
                    combined_prompt: "p".to_string(),
                    image_ref: "iter0-cand1.png".to_string(),
                    evaluation: None,
                    total_score: Some(90.0),
                },
                false,
            )
            .await
            .expect("update 1 with score");

        tracker
            .enrich_candidate_with_ranking_data(
                0,
                1,
                RankingEnrichment {
                    comparisons: vec![comparison(0, ComparisonOutcome::Win)],
                    aggregated_feedback: Some(feedback(1.2)),
                    rank_in_iteration: Some(1),
                    critique: None,
                },
            )
            .await
            .expect("enrich 1");

        let record = tracker.snapshot().await;
        let iteration = &record.iterations[0];
        assert_eq!(iteration.best_candidate_index, Some(1));
        assert_eq!(iteration.best_score, Some(90.0));
    }

    #[tokio::test]
    async fn enrich_falls_back_to_lowest_combined_rank_when_no_scores() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");
        tracker.record_attempt(0, Dimension::What, root_candidate(1)).await.expect("record");
        for idx in 0..2 {
            tracker
                .update_attempt_with_results(
                    0,
                    idx,
                    CandidateResults {
                        what_prompt: "p".to_string(),
                        how_prompt: "p".to_string(),
                        combined_prompt: "p".to_string(),
                        image_ref: format!("iter0-cand{idx}.png"),
                        evaluation: None,
                        total_score: None,
                    },
                    false,
                )
                .await
                .expect("update");
        }

        tracker
            .enrich_candidate_with_ranking_data(
                0,
                0,
                RankingEnrichment {
                    comparisons: vec![],
                    aggregated_feedback: Some(feedback(1.5)),
                    rank_in_iteration: Some(2),
                    critique: None,
                },
            )
            .await
            .expect("enrich 0");
        tracker
            .enrich_candidate_with_ranking_data(
                0,
                1,
                RankingEnrichment {
                    comparisons: vec![],
                    aggregated_feedback: Some(feedback(1.1)),
                    rank_in_iteration: Some(1),
                    critique: None,
                },
            )
            .await
            .expect("enrich 1");

        let record = tracker.snapshot().await;
        assert_eq!(record.iterations[0].best_candidate_index, Some(1));
        assert_eq!(record.iterations[0].best_score, Some(1.1));
    }

    #[tokio::test]
    async fn mark_survivors_sets_flag_across_iteration() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");
        tracker.record_attempt(0, Dimension::What, root_candidate(1)).await.expect("record");
        tracker.record_attempt(0, Dimension::What, root_candidate(2)).await.expect("record");

        tracker.mark_survivors(0, &[0, 2]).await.expect("mark survivors");

        let record = tracker.snapshot().await;
        let candidates = &record.iterations[0].candidates;
        assert!(candidates[0].survived);
        assert!(!candidates[1].survived);
        assert!(candidates[2].survived);
    }

    #[tokio::test]
    async fn mark_final_winner_walks_lineage_root_first() {
        let (tracker, _dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");

        let child = Candidate::new_attempted(0, Some(0), Dimension::How, "p".to_string(), "p".to_string());
        tracker.record_attempt(1, Dimension::How, child).await.expect("record child");

        let grandchild = Candidate::new_attempted(0, Some(0), Dimension::What, "p".to_string(), "p".to_string());
        tracker.record_attempt(2, Dimension::What, grandchild).await.expect("record grandchild");

        tracker.mark_final_winner(2, 0, Some(95.0)).await.expect("mark winner");

        let record = tracker.snapshot().await;
        assert_eq!(record.final_winner.expect("winner").candidate_index, 0);
        assert_eq!(
            record.lineage,
            vec![
                LineageEntry { iteration: 0, candidate_index: 0 },
                LineageEntry { iteration: 1, candidate_index: 0 },
                LineageEntry { iteration: 2, candidate_index: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn persist_tokens_writes_side_file() {
        let (tracker, _dir) = fresh_tracker().await;
        let mut tokens = TokenTracker::new();
        tokens.record("openai", "refine_what", 42);

        tracker.persist_tokens(&tokens).await.expect("persist tokens");

        let tokens_path = tracker.session_dir().join("tokens.json");
        let doc: TokenDocument = atomic_io::read_json(&tokens_path).await.expect("read tokens");
        assert_eq!(doc.session_id, "ses-test");
        assert_eq!(doc.totals.total_tokens, 42);
    }

    #[tokio::test]
    async fn reopen_reads_back_prior_state() {
        let (tracker, dir) = fresh_tracker().await;
        tracker.record_attempt(0, Dimension::What, root_candidate(0)).await.expect("record");
        let session_dir = tracker.session_dir().to_path_buf();
        drop(tracker);

        let reopened = MetadataTracker::reopen(session_dir).await.expect("reopen");
        let record = reopened.snapshot().await;
        assert_eq!(record.iterations[0].candidates.len(), 1);

        // Keep the tempdir alive for the duration of the test.
        drop(dir);
    }
}
