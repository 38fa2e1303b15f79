//! Ranking engine (C5): turns a candidate set and a prompt into a total
//! order with per-candidate aggregated feedback, using the comparison graph
//! (C2) and ensemble voter (C4) underneath (§4.4).

use crate::ensemble::{AggregateVerdict, EnsembleVoter};
use crate::random::RandomSource;
use ibeam_core::{
    AggregatedFeedback, AggregatedRanks, CandidateId, Choice, ComparisonOutcome, ComparisonRecord,
    RankingStrategy, Result, VisionComparator,
};
use ibeam_graph::ComparisonGraph;
use std::collections::HashMap;

/// One image under consideration: its stable id and its local image path.
#[derive(Debug, Clone)]
pub struct RankableImage {
    /// The candidate's stable id.
    pub id: CandidateId,
    /// Local filesystem path to the generated image.
    pub image_ref: String,
}

/// How a single comparison (real or inferred) resolved, reported to
/// `on_progress` after every pair (§4.4 "Progress events").
#[derive(Debug, Clone)]
pub enum ProgressOutcome {
    /// A real collaborator call resolved with this winner (or `None` for a
    /// tie recorded as a win for the first operand per §4.3).
    Winner(CandidateId),
    /// The graph already knew the answer; no collaborator call was made.
    Inferred(CandidateId),
    /// The comparison failed and was skipped (`graceful_degradation = true`).
    Error,
}

/// One `{type: 'comparison', ...}` progress event (§4.4).
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Number of pairs resolved so far, including this one.
    pub completed: usize,
    /// Total pairs the strategy expects to resolve (an upper bound for the
    /// tournament strategy, which usually resolves far fewer).
    pub total: usize,
    /// First operand of the pair.
    pub candidate_a: CandidateId,
    /// Second operand of the pair.
    pub candidate_b: CandidateId,
    /// How the pair resolved.
    pub outcome: ProgressOutcome,
}

/// A logged, skipped comparison failure (§4.4 "graceful degradation").
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Always `"comparison_failure"`; kept as a string to match the
    /// on-disk error-type tag verbatim.
    pub error_type: String,
    /// First operand of the failed comparison.
    pub candidate_a: CandidateId,
    /// Second operand of the failed comparison.
    pub candidate_b: CandidateId,
    /// The underlying error's message.
    pub message: String,
}

/// Ranking-call-level metadata returned alongside the rankings.
#[derive(Debug, Clone, Default)]
pub struct RankingMetadata {
    /// Comparison failures absorbed under graceful degradation.
    pub errors: Vec<ErrorRecord>,
}

/// One candidate's place in the total order, with its aggregated feedback
/// and the comparison records to persist on it (§6 `comparisons`).
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    /// The candidate's id.
    pub id: CandidateId,
    /// 1-based rank, best first.
    pub rank: u32,
    /// Number of comparisons this candidate won (real or inferred).
    pub win_count: u32,
    /// Aggregated strengths/weaknesses/ranks/suggestion across every real
    /// comparison this candidate took part in.
    pub aggregated_feedback: AggregatedFeedback,
    /// Per-opponent comparison records, in the order they resolved.
    pub comparisons: Vec<ComparisonRecord>,
}

/// The full result of one `rank_images` call.
#[derive(Debug, Clone)]
pub struct RankingOutcome {
    /// Candidates in rank order, best first.
    pub rankings: Vec<RankedCandidate>,
    /// Errors absorbed during ranking.
    pub metadata: RankingMetadata,
}

/// Options controlling one `rank_images` call (§4.4).
pub struct RankingOptions<'a> {
    /// Edges persisted from earlier ranking calls (typically among
    /// surviving parents), seeded into the graph before any work starts.
    pub known_comparisons: Vec<(CandidateId, CandidateId)>,
    /// Number of ensemble votes per real comparison.
    pub ensemble_size: u32,
    /// Strategy selection.
    pub strategy: RankingStrategy,
    /// Whether a comparison failure is logged-and-skipped (`true`) or
    /// aborts the whole ranking call (`false`).
    pub graceful_degradation: bool,
    /// Called after every resolved pair, real or inferred.
    pub on_progress: Option<&'a (dyn Fn(ProgressEvent) + Send + Sync)>,
}

impl<'a> Default for RankingOptions<'a> {
    fn default() -> Self {
        Self {
            known_comparisons: Vec::new(),
            ensemble_size: 1,
            strategy: RankingStrategy::Auto,
            graceful_degradation: true,
            on_progress: None,
        }
    }
}

fn resolve_strategy(strategy: RankingStrategy, n: usize) -> RankingStrategy {
    match strategy {
        RankingStrategy::Auto if n <= 8 => RankingStrategy::AllPairs,
        RankingStrategy::Auto => RankingStrategy::Tournament,
        other => other,
    }
}

#[derive(Default)]
struct Accumulator {
    win_count: u32,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    align_sum: f64,
    aes_sum: f64,
    observations: u32,
    improvement_suggestion: Option<String>,
    comparisons: Vec<ComparisonRecord>,
}

impl Accumulator {
    fn into_feedback(self, alignment_weight: f64) -> (AggregatedFeedback, Vec<ComparisonRecord>) {
        let ranks = if self.observations > 0 {
            let n = f64::from(self.observations);
            let alignment = self.align_sum / n;
            let aesthetics = self.aes_sum / n;
            Some(AggregatedRanks {
                alignment,
                aesthetics,
                combined: alignment_weight * alignment + (1.0 - alignment_weight) * aesthetics,
            })
        } else {
            None
        };
        (
            AggregatedFeedback {
                strengths: dedup(self.strengths),
                weaknesses: dedup(self.weaknesses),
                ranks,
                improvement_suggestion: self.improvement_suggestion,
            },
            self.comparisons,
        )
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

/// One resolved real comparison's effect on both accumulators and the
/// graph. `agg` is the ensemble's merged verdict; `a`/`b` are the operands
/// in the order the voter was called with.
fn apply_real_comparison(
    graph: &mut ComparisonGraph,
    accumulators: &mut HashMap<CandidateId, Accumulator>,
    a: CandidateId,
    b: CandidateId,
    agg: &AggregateVerdict,
) -> CandidateId {
    // Tie policy (§4.3): TIE is recorded as a win for the left operand.
    let winner = match agg.choice {
        Choice::A | Choice::Tie => a,
        Choice::B => b,
    };
    let loser = if winner == a { b } else { a };
    graph.record(a, b, winner);

    let timestamp = chrono::Utc::now();
    let winner_ranks = if winner == a { agg.ranks_a } else { agg.ranks_b };
    let loser_ranks = if loser == a { agg.ranks_a } else { agg.ranks_b };
    let winner_strengths = if winner == a {
        &agg.strengths_a
    } else {
        &agg.strengths_b
    };
    let loser_weaknesses = if loser == a {
        &agg.weaknesses_a
    } else {
        &agg.weaknesses_b
    };

    {
        let acc = accumulators.entry(winner).or_default();
        acc.win_count += 1;
        acc.strengths.extend(winner_strengths.iter().cloned());
        acc.align_sum += winner_ranks.alignment;
        acc.aes_sum += winner_ranks.aesthetics;
        acc.observations += 1;
        if let Some(s) = &agg.improvement_suggestion {
            acc.improvement_suggestion = Some(s.clone());
        }
        acc.comparisons.push(ComparisonRecord {
            opponent_candidate_index: loser.candidate_index,
            result: ComparisonOutcome::Win,
            my_ranks: winner_ranks,
            opponent_ranks: loser_ranks,
            timestamp,
        });
    }
    {
        let acc = accumulators.entry(loser).or_default();
        acc.weaknesses.extend(loser_weaknesses.iter().cloned());
        acc.align_sum += loser_ranks.alignment;
        acc.aes_sum += loser_ranks.aesthetics;
        acc.observations += 1;
        if let Some(s) = &agg.improvement_suggestion {
            acc.improvement_suggestion = Some(s.clone());
        }
        acc.comparisons.push(ComparisonRecord {
            opponent_candidate_index: winner.candidate_index,
            result: ComparisonOutcome::Loss,
            my_ranks: loser_ranks,
            opponent_ranks: winner_ranks,
            timestamp,
        });
    }
    winner
}

/// Resolve one head-to-head: consult the graph first, falling back to a
/// real ensemble comparison. Returns the winner id, or `Ok(None)` if the
/// comparison failed and was absorbed under graceful degradation.
#[allow(clippy::too_many_arguments)]
async fn resolve_pair(
    graph: &mut ComparisonGraph,
    accumulators: &mut HashMap<CandidateId, Accumulator>,
    voter: &EnsembleVoter<'_>,
    images_by_id: &HashMap<CandidateId, &str>,
    prompt: &str,
    ensemble_size: u32,
    a: CandidateId,
    b: CandidateId,
    graceful_degradation: bool,
    errors: &mut Vec<ErrorRecord>,
) -> Result<Option<ProgressOutcome>> {
    if let Some(winner) = graph.infer(a, b) {
        let acc = accumulators.entry(winner).or_default();
        acc.win_count += 1;
        return Ok(Some(ProgressOutcome::Inferred(winner)));
    }

    let image_a = images_by_id[&a];
    let image_b = images_by_id[&b];
    match voter.compare_ensemble(image_a, image_b, prompt, ensemble_size).await {
        Ok(agg) => {
            let winner = apply_real_comparison(graph, accumulators, a, b, &agg);
            Ok(Some(ProgressOutcome::Winner(winner)))
        }
        Err(err) => {
            if graceful_degradation {
                errors.push(ErrorRecord {
                    error_type: "comparison_failure".to_string(),
                    candidate_a: a,
                    candidate_b: b,
                    message: err.to_string(),
                });
                Ok(Some(ProgressOutcome::Error))
            } else {
                Err(err)
            }
        }
    }
}

/// Rank `images` against `prompt`, returning a total order with aggregated
/// feedback (§4.4).
pub async fn rank_images(
    images: &[RankableImage],
    prompt: &str,
    comparator: &dyn VisionComparator,
    random: &dyn RandomSource,
    alignment_weight: f64,
    options: RankingOptions<'_>,
) -> Result<RankingOutcome> {
    let n = images.len();
    let mut metadata = RankingMetadata::default();

    if n == 0 {
        return Ok(RankingOutcome {
            rankings: Vec::new(),
            metadata,
        });
    }
    if n == 1 {
        let only = images[0].id;
        let ranked = RankedCandidate {
            id: only,
            rank: 1,
            win_count: 0,
            aggregated_feedback: AggregatedFeedback::default(),
            comparisons: Vec::new(),
        };
        return Ok(RankingOutcome {
            rankings: vec![ranked],
            metadata,
        });
    }

    let mut graph = ComparisonGraph::new();
    graph.seed(options.known_comparisons);

    let images_by_id: HashMap<CandidateId, &str> =
        images.iter().map(|img| (img.id, img.image_ref.as_str())).collect();
    let mut accumulators: HashMap<CandidateId, Accumulator> = HashMap::new();
    let voter = EnsembleVoter::new(comparator, random, alignment_weight);

    let strategy = resolve_strategy(options.strategy, n);
    let order: Vec<CandidateId> = images.iter().map(|img| img.id).collect();

    match strategy {
        RankingStrategy::AllPairs | RankingStrategy::Auto => {
            let total = n * (n - 1) / 2;
            let mut completed = 0usize;
            for i in 0..n {
                for j in (i + 1)..n {
                    let a = order[i];
                    let b = order[j];
                    let outcome = resolve_pair(
                        &mut graph,
                        &mut accumulators,
                        &voter,
                        &images_by_id,
                        prompt,
                        options.ensemble_size,
                        a,
                        b,
                        options.graceful_degradation,
                        &mut metadata.errors,
                    )
                    .await?;
                    completed += 1;
                    if let (Some(cb), Some(outcome)) = (options.on_progress, outcome) {
                        cb(ProgressEvent {
                            completed,
                            total,
                            candidate_a: a,
                            candidate_b: b,
                            outcome,
                        });
                    }
                }
            }
        }
        RankingStrategy::Tournament => {
            let total = n * (n - 1) / 2;
            let mut completed = 0usize;
            let mut remaining: Vec<CandidateId> = order.clone();
            let mut podium: Vec<CandidateId> = Vec::with_capacity(n);

            while !remaining.is_empty() {
                let mut champion = remaining[0];
                for idx in 1..remaining.len() {
                    let challenger = remaining[idx];
                    let outcome = resolve_pair(
                        &mut graph,
                        &mut accumulators,
                        &voter,
                        &images_by_id,
                        prompt,
                        options.ensemble_size,
                        champion,
                        challenger,
                        options.graceful_degradation,
                        &mut metadata.errors,
                    )
                    .await?;
                    completed += 1;
                    if let Some(outcome) = outcome {
                        if let Some(cb) = options.on_progress {
                            cb(ProgressEvent {
                                completed,
                                total,
                                candidate_a: champion,
                                candidate_b: challenger,
                                outcome: clone_outcome(&outcome),
                            });
                        }
                        if let Some(winner) = progress_winner(&outcome) {
                            champion = winner;
                        }
                    }
                }
                podium.push(champion);
                remaining.retain(|id| *id != champion);
            }
            // Podium is already in rank order (best first); fall through to
            // the common sort below by assigning win counts and ranking by
            // podium position via a synthetic ordering index.
            let rankings = build_rankings_from_order(&podium, &mut accumulators, alignment_weight);
            return Ok(RankingOutcome { rankings, metadata });
        }
    }

    // All-pairs (and auto-resolved-to-all-pairs): sort by win count
    // descending, ties broken by original input order.
    let mut indexed: Vec<(usize, CandidateId)> = order.iter().copied().enumerate().collect();
    indexed.sort_by(|(i_a, a), (i_b, b)| {
        let wa = accumulators.get(a).map_or(0, |acc| acc.win_count);
        let wb = accumulators.get(b).map_or(0, |acc| acc.win_count);
        wb.cmp(&wa).then(i_a.cmp(i_b))
    });
    let order_by_id: Vec<CandidateId> = indexed.into_iter().map(|(_, id)| id).collect();
    let rankings = build_rankings_from_order(&order_by_id, &mut accumulators, alignment_weight);
    Ok(RankingOutcome { rankings, metadata })
}

fn clone_outcome(outcome: &ProgressOutcome) -> ProgressOutcome {
    match outcome {
        ProgressOutcome::Winner(id) => ProgressOutcome::Winner(*id),
        ProgressOutcome::Inferred(id) => ProgressOutcome::Inferred(*id),
        ProgressOutcome::Error => ProgressOutcome::Error,
    }
}

fn progress_winner(outcome: &ProgressOutcome) -> Option<CandidateId> {
    match outcome {
        ProgressOutcome::Winner(id) | ProgressOutcome::Inferred(id) => Some(*id),
        ProgressOutcome::Error => None,
    }
}

fn build_rankings_from_order(
    order: &[CandidateId],
    accumulators: &mut HashMap<CandidateId, Accumulator>,
    alignment_weight: f64,
) -> Vec<RankedCandidate> {
    order
        .iter()
        .enumerate()
        .map(|(idx, id)| {
            let acc = accumulators.remove(id).unwrap_or_default();
            let win_count = acc.win_count;
            let (aggregated_feedback, comparisons) = acc.into_feedback(alignment_weight);
            RankedCandidate {
                id: *id,
                rank: (idx + 1) as u32,
                win_count,
                aggregated_feedback,
                comparisons,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandomSource;
    use async_trait::async_trait;
    use ibeam_core::{FactorRanks, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn id(c: u32) -> CandidateId {
        CandidateId::new(0, c)
    }

    fn image(c: u32) -> RankableImage {
        RankableImage {
            id: id(c),
            image_ref: format!("i0c{c}.png"),
        }
    }

    /// A comparator whose preference is driven by a total order over image
    /// refs (lexicographically smaller wins), so transitivity holds and
    /// call counts are deterministic and checkable.
    struct OrderedComparator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionComparator for OrderedComparator {
        async fn compare(&self, a: &str, b: &str, _prompt: &str) -> Result<Verdict> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let choice = if a < b { Choice::A } else { Choice::B };
            Ok(Verdict {
                choice,
                explanation: "lower ref wins".to_string(),
                confidence: 1.0,
                ranks_a: FactorRanks { alignment: if a < b { 1.0 } else { 2.0 }, aesthetics: if a < b { 1.0 } else { 2.0 } },
                ranks_b: FactorRanks { alignment: if a < b { 2.0 } else { 1.0 }, aesthetics: if a < b { 2.0 } else { 1.0 } },
                winner_strengths: vec!["better".to_string()],
                loser_weaknesses: vec!["worse".to_string()],
                improvement_suggestion: Some("tweak".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn single_candidate_ranks_first_with_no_calls() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let images = vec![image(0)];
        let outcome = rank_images(&images, "prompt", &comparator, &random, 0.7, RankingOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.rankings.len(), 1);
        assert_eq!(outcome.rankings[0].rank, 1);
        assert_eq!(comparator.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn empty_set_ranks_nothing() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let outcome = rank_images(&[], "prompt", &comparator, &random, 0.7, RankingOptions::default())
            .await
            .unwrap();
        assert!(outcome.rankings.is_empty());
    }

    #[tokio::test]
    async fn all_pairs_with_eight_makes_at_most_twenty_eight_calls() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let images: Vec<_> = (0..8).map(image).collect();
        let options = RankingOptions {
            strategy: RankingStrategy::AllPairs,
            ..RankingOptions::default()
        };
        let outcome = rank_images(&images, "prompt", &comparator, &random, 0.7, options)
            .await
            .unwrap();
        assert_eq!(outcome.rankings.len(), 8);
        assert!(comparator.calls.load(Ordering::Relaxed) <= 28);
        // Best-to-worst by image ref ordering: i0c0 beats everything.
        assert_eq!(outcome.rankings[0].id, id(0));
    }

    #[tokio::test]
    async fn tournament_with_sixteen_makes_at_most_one_hundred_twenty_calls() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let images: Vec<_> = (0..16).map(image).collect();
        let options = RankingOptions {
            strategy: RankingStrategy::Tournament,
            ..RankingOptions::default()
        };
        let outcome = rank_images(&images, "prompt", &comparator, &random, 0.7, options)
            .await
            .unwrap();
        assert_eq!(outcome.rankings.len(), 16);
        assert!(comparator.calls.load(Ordering::Relaxed) <= 120);
        assert_eq!(outcome.rankings[0].id, id(0));
    }

    #[tokio::test]
    async fn known_comparisons_short_circuit_inference() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        // Three candidates; a new child vs two known-ordered parents.
        let images = vec![image(0), image(1), image(2)];
        let options = RankingOptions {
            known_comparisons: vec![(id(1), id(0))], // i0c1 beats i0c0 already known
            strategy: RankingStrategy::AllPairs,
            ..RankingOptions::default()
        };
        let outcome = rank_images(&images, "prompt", &comparator, &random, 0.7, options)
            .await
            .unwrap();
        assert_eq!(outcome.rankings.len(), 3);
        // 3 pairs total, 1 inferred (the seeded parent pair) => 2 real calls.
        assert_eq!(comparator.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn graceful_degradation_skips_failed_pair_and_keeps_going() {
        struct FlakyComparator {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl VisionComparator for FlakyComparator {
            async fn compare(&self, a: &str, b: &str, _prompt: &str) -> Result<Verdict> {
                let n = self.calls.fetch_add(1, Ordering::Relaxed);
                if n == 0 {
                    return Err(ibeam_core::IbeamError::MalformedVerdict("bad json".to_string()));
                }
                let choice = if a < b { Choice::A } else { Choice::B };
                Ok(Verdict {
                    choice,
                    explanation: "ok".to_string(),
                    confidence: 1.0,
                    ranks_a: FactorRanks { alignment: 1.0, aesthetics: 1.0 },
                    ranks_b: FactorRanks { alignment: 2.0, aesthetics: 2.0 },
                    winner_strengths: vec![],
                    loser_weaknesses: vec![],
                    improvement_suggestion: None,
                })
            }
        }
        let comparator = FlakyComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let images: Vec<_> = (0..4).map(image).collect();
        let options = RankingOptions {
            strategy: RankingStrategy::AllPairs,
            graceful_degradation: true,
            ..RankingOptions::default()
        };
        let outcome = rank_images(&images, "prompt", &comparator, &random, 0.7, options)
            .await
            .unwrap();
        assert_eq!(outcome.rankings.len(), 4);
        assert_eq!(outcome.metadata.errors.len(), 1);
        assert_eq!(outcome.metadata.errors[0].error_type, "comparison_failure");
    }

    #[tokio::test]
    async fn progress_events_fire_once_per_pair() {
        let comparator = OrderedComparator { calls: AtomicUsize::new(0) };
        let random = ScriptedRandomSource::new(vec![false]);
        let images = vec![image(0), image(1), image(2)];
        let events: Mutex<Vec<ProgressEvent>> = Mutex::new(Vec::new());
        let cb = |event: ProgressEvent| events.lock().unwrap().push(event);
        let options = RankingOptions {
            strategy: RankingStrategy::AllPairs,
            on_progress: Some(&cb),
            ..RankingOptions::default()
        };
        rank_images(&images, "prompt", &comparator, &random, 0.7, options)
            .await
            .unwrap();
        assert_eq!(events.lock().unwrap().len(), 3);
    }
}
