//! Debiased single comparisons and ensemble voting across them (C4, §4.3).

use crate::pairwise::{invert_operands, PairwiseRanker};
use crate::random::RandomSource;
use ibeam_core::{Choice, FactorRanks, Result, VisionComparator};

/// The ensemble's merged verdict across `n` repeated, randomized-order
/// comparisons.
#[derive(Debug, Clone)]
pub struct AggregateVerdict {
    /// Majority choice; `Tie` if neither side has a strict majority of
    /// non-tie votes.
    pub choice: Choice,
    /// Votes cast for A.
    pub votes_a: u32,
    /// Votes cast for B.
    pub votes_b: u32,
    /// Votes cast as a tie.
    pub votes_tie: u32,
    /// `max(votes_a, votes_b) / n`.
    pub confidence: f64,
    /// Per-image mean ranks across all `n` votes.
    pub ranks_a: FactorRanks,
    /// Per-image mean ranks across all `n` votes.
    pub ranks_b: FactorRanks,
    /// Strengths observed on the votes A won, deduplicated.
    pub strengths_a: Vec<String>,
    /// Weaknesses observed on the votes A lost, deduplicated.
    pub weaknesses_a: Vec<String>,
    /// Strengths observed on the votes B won, deduplicated.
    pub strengths_b: Vec<String>,
    /// Weaknesses observed on the votes B lost, deduplicated.
    pub weaknesses_b: Vec<String>,
    /// Last non-empty improvement suggestion observed, across either side.
    pub improvement_suggestion: Option<String>,
}

/// Debiased single comparisons plus the ensemble aggregation over them.
pub struct EnsembleVoter<'a> {
    ranker: PairwiseRanker<'a>,
    random: &'a dyn RandomSource,
    alignment_weight: f64,
}

impl<'a> EnsembleVoter<'a> {
    /// Build a voter over `comparator`, using `random` for the debiasing
    /// coin flip and `alignment_weight` to recompute combined ranks.
    #[must_use]
    pub fn new(
        comparator: &'a dyn VisionComparator,
        random: &'a dyn RandomSource,
        alignment_weight: f64,
    ) -> Self {
        Self {
            ranker: PairwiseRanker::new(comparator),
            random,
            alignment_weight,
        }
    }

    /// The alignment weight this voter recomputes combined ranks with.
    #[must_use]
    pub fn alignment_weight(&self) -> f64 {
        self.alignment_weight
    }

    /// Compare `a` against `b`, flipping operand order with probability 0.5
    /// before calling the collaborator, and un-flipping the result so the
    /// caller always sees `a`/`b` in the order it asked for (§8 invariant:
    /// `choice` corresponds to the caller's original operand order).
    pub async fn compare_debiased(
        &self,
        image_a_ref: &str,
        image_b_ref: &str,
        prompt: &str,
    ) -> Result<ibeam_core::Verdict> {
        if self.random.gen_bool(0.5) {
            let swapped = self.ranker.compare(image_b_ref, image_a_ref, prompt).await?;
            Ok(invert_operands(swapped))
        } else {
            self.ranker.compare(image_a_ref, image_b_ref, prompt).await
        }
    }

    /// Run `n` sequential debiased comparisons (GPU services are serial)
    /// and aggregate them into one [`AggregateVerdict`].
    pub async fn compare_ensemble(
        &self,
        image_a_ref: &str,
        image_b_ref: &str,
        prompt: &str,
        n: u32,
    ) -> Result<AggregateVerdict> {
        let mut votes_a = 0u32;
        let mut votes_b = 0u32;
        let mut votes_tie = 0u32;
        let (mut sum_align_a, mut sum_aes_a) = (0.0, 0.0);
        let (mut sum_align_b, mut sum_aes_b) = (0.0, 0.0);
        let mut strengths_a = Vec::new();
        let mut weaknesses_a = Vec::new();
        let mut strengths_b = Vec::new();
        let mut weaknesses_b = Vec::new();
        let mut improvement_suggestion = None;

        for _ in 0..n {
            let verdict = self.compare_debiased(image_a_ref, image_b_ref, prompt).await?;

            sum_align_a += verdict.ranks_a.alignment;
            sum_aes_a += verdict.ranks_a.aesthetics;
            sum_align_b += verdict.ranks_b.alignment;
            sum_aes_b += verdict.ranks_b.aesthetics;

            match verdict.choice {
                Choice::A => {
                    votes_a += 1;
                    strengths_a.extend(verdict.winner_strengths.clone());
                    weaknesses_b.extend(verdict.loser_weaknesses.clone());
                }
                Choice::B => {
                    votes_b += 1;
                    strengths_b.extend(verdict.winner_strengths.clone());
                    weaknesses_a.extend(verdict.loser_weaknesses.clone());
                }
                Choice::Tie => {
                    votes_tie += 1;
                }
            }

            if let Some(suggestion) = &verdict.improvement_suggestion {
                if !suggestion.is_empty() {
                    improvement_suggestion = Some(suggestion.clone());
                }
            }
        }

        let n_f64 = f64::from(n.max(1));
        let ranks_a = FactorRanks {
            alignment: sum_align_a / n_f64,
            aesthetics: sum_aes_a / n_f64,
        };
        let ranks_b = FactorRanks {
            alignment: sum_align_b / n_f64,
            aesthetics: sum_aes_b / n_f64,
        };
        let choice = match votes_a.cmp(&votes_b) {
            std::cmp::Ordering::Greater => Choice::A,
            std::cmp::Ordering::Less => Choice::B,
            std::cmp::Ordering::Equal => Choice::Tie,
        };
        let confidence = f64::from(votes_a.max(votes_b)) / n_f64;

        dedup_in_place(&mut strengths_a);
        dedup_in_place(&mut weaknesses_a);
        dedup_in_place(&mut strengths_b);
        dedup_in_place(&mut weaknesses_b);

        Ok(AggregateVerdict {
            choice,
            votes_a,
            votes_b,
            votes_tie,
            confidence,
            ranks_a,
            ranks_b,
            strengths_a,
            weaknesses_a,
            strengths_b,
            weaknesses_b,
            improvement_suggestion,
        })
    }
}

fn dedup_in_place(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandomSource;
    use async_trait::async_trait;
    use ibeam_core::Verdict;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedComparator {
        verdicts: Vec<Verdict>,
        cursor: AtomicUsize,
    }

    #[async_trait]
    impl VisionComparator for ScriptedComparator {
        async fn compare(&self, _a: &str, _b: &str, _prompt: &str) -> Result<Verdict> {
            let i = self.cursor.fetch_add(1, Ordering::Relaxed);
            Ok(self.verdicts[i % self.verdicts.len()].clone())
        }
    }

    fn verdict(choice: Choice) -> Verdict {
        Verdict {
            choice,
            explanation: "because".to_string(),
            confidence: 0.9,
            ranks_a: FactorRanks { alignment: 1.0, aesthetics: 1.0 },
            ranks_b: FactorRanks { alignment: 2.0, aesthetics: 2.0 },
            winner_strengths: vec!["sharp focus".to_string()],
            loser_weaknesses: vec!["blurry".to_string()],
            improvement_suggestion: Some("sharpen".to_string()),
        }
    }

    /// A comparator whose preference is tied to the actual image ref, not
    /// to which call slot it was passed in — the property a real
    /// vision-language collaborator has and the debiasing logic depends on.
    struct PrefersFirstPath {
        preferred: &'static str,
    }

    #[async_trait]
    impl VisionComparator for PrefersFirstPath {
        async fn compare(&self, a: &str, _b: &str, _prompt: &str) -> Result<Verdict> {
            let choice = if a == self.preferred { Choice::A } else { Choice::B };
            Ok(verdict(choice))
        }
    }

    #[tokio::test]
    async fn debiased_result_matches_original_orientation_regardless_of_swap() {
        for swap in [false, true] {
            let random = ScriptedRandomSource::new(vec![swap]);
            let comparator = PrefersFirstPath { preferred: "a.png" };
            let voter = EnsembleVoter::new(&comparator, &random, 0.7);
            let result = voter.compare_debiased("a.png", "b.png", "prompt").await.unwrap();
            assert_eq!(result.choice, Choice::A, "swap={swap}");
        }
    }

    #[tokio::test]
    async fn ensemble_tie_reports_half_confidence() {
        let random = ScriptedRandomSource::new(vec![false]);
        let comparator = ScriptedComparator {
            verdicts: vec![verdict(Choice::A), verdict(Choice::B)],
            cursor: AtomicUsize::new(0),
        };
        let voter = EnsembleVoter::new(&comparator, &random, 0.7);
        let agg = voter
            .compare_ensemble("a.png", "b.png", "prompt", 4)
            .await
            .unwrap();
        assert_eq!(agg.votes_a, 2);
        assert_eq!(agg.votes_b, 2);
        assert_eq!(agg.votes_tie, 0);
        assert_eq!(agg.choice, Choice::Tie);
        assert!((agg.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(agg.votes_a + agg.votes_b + agg.votes_tie, 4);
    }

    #[tokio::test]
    async fn ensemble_majority_wins() {
        let random = ScriptedRandomSource::new(vec![false]);
        let comparator = ScriptedComparator {
            verdicts: vec![verdict(Choice::A), verdict(Choice::A), verdict(Choice::B)],
            cursor: AtomicUsize::new(0),
        };
        let voter = EnsembleVoter::new(&comparator, &random, 0.7);
        let agg = voter
            .compare_ensemble("a.png", "b.png", "prompt", 3)
            .await
            .unwrap();
        assert_eq!(agg.choice, Choice::A);
        assert!((agg.confidence - (2.0 / 3.0)).abs() < 1e-9);
    }
}
