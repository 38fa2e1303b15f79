//! Critique generator (C6): turns the ranker's aggregated feedback for a
//! surviving candidate into the structured `{dimension, critique,
//! recommendation, reason}` shape that feeds the next iteration's
//! refinement (§4.5).

use ibeam_core::{AggregatedFeedback, CandidateId, Critique, Dimension};
use ibeam_rank::RankedCandidate;
use std::collections::HashMap;

/// Build the critique for one survivor.
///
/// Per §4.5, the refinement `dimension` always comes from the
/// orchestrator's schedule for the *next* iteration, never from the
/// ranker's output. When the ranker produced no feedback at all for this
/// candidate, returns `None`; the orchestrator then falls back to
/// [`fallback_hint`] for a plain dimension-focused expansion.
#[must_use]
pub fn build_critique(feedback: Option<&AggregatedFeedback>, next_dimension: Dimension) -> Option<Critique> {
    let feedback = feedback?;
    if feedback.strengths.is_empty() && feedback.weaknesses.is_empty() && feedback.improvement_suggestion.is_none() {
        return None;
    }

    let critique = if feedback.weaknesses.is_empty() {
        "no notable weaknesses observed".to_string()
    } else {
        feedback.weaknesses.join("; ")
    };
    let recommendation = feedback
        .improvement_suggestion
        .clone()
        .unwrap_or_else(|| fallback_hint(next_dimension));
    let reason = build_reason(feedback);

    Some(Critique {
        dimension: next_dimension,
        critique,
        recommendation,
        reason,
    })
}

/// Build critiques for every survivor in one ranked set, keyed by candidate
/// id. Non-survivors are skipped entirely — only kept candidates feed the
/// next iteration's refinement.
#[must_use]
pub fn critique_survivors(
    rankings: &[RankedCandidate],
    survivors: &[CandidateId],
    next_dimension: Dimension,
) -> HashMap<CandidateId, Option<Critique>> {
    rankings
        .iter()
        .filter(|ranked| survivors.contains(&ranked.id))
        .map(|ranked| {
            (
                ranked.id,
                build_critique(Some(&ranked.aggregated_feedback), next_dimension),
            )
        })
        .collect()
}

/// What to tell the refinement model when the ranker produced no usable
/// feedback for a survivor: a plain, dimension-focused nudge rather than a
/// specific critique (§4.5 "refinement falls back to a plain
/// dimension-focused expansion").
#[must_use]
pub fn fallback_hint(dimension: Dimension) -> String {
    match dimension {
        Dimension::What => "broaden or sharpen the depicted content".to_string(),
        Dimension::How => "explore a different visual style or rendering approach".to_string(),
    }
}

fn build_reason(feedback: &AggregatedFeedback) -> String {
    match (feedback.strengths.is_empty(), feedback.weaknesses.is_empty()) {
        (false, false) => format!(
            "kept for: {}; next pass should address: {}",
            feedback.strengths.join(", "),
            feedback.weaknesses.join(", ")
        ),
        (false, true) => format!("kept for: {}", feedback.strengths.join(", ")),
        (true, false) => format!("next pass should address: {}", feedback.weaknesses.join(", ")),
        (true, true) => "ranked among the survivors with no specific feedback recorded".to_string(),
    }
}
