//! Per-iteration candidate fan-out (§4.7 step 3, §5 "a bounded worker pool
//! waiting on a single join"): refine, combine, generate for every child
//! slot, concurrently, bounded by `beam_width`.

use crate::context::SessionContext;
use anyhow::{Context, Result};
use ibeam_core::{Candidate, Critique, Dimension};
use ibeam_tracker::CandidateResults;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One parent a child is expanded from: either the synthetic root at
/// iteration 0 (§4.7 step 2: "a single synthetic parent carrying the user
/// prompt") or a surviving candidate from the previous iteration.
#[derive(Debug, Clone)]
pub struct ParentSlot {
    /// `None` only for the synthetic root parent.
    pub candidate_index: Option<u32>,
    /// Content sub-prompt this child inherits before refinement.
    pub what_prompt: String,
    /// Style sub-prompt this child inherits before refinement.
    pub how_prompt: String,
    /// The critique produced for this parent, if ranking produced one.
    pub critique: Option<Critique>,
}

impl ParentSlot {
    /// The synthetic root parent carrying only the user's prompt.
    #[must_use]
    pub fn root(user_prompt: &str) -> Self {
        Self {
            candidate_index: None,
            what_prompt: user_prompt.to_string(),
            how_prompt: user_prompt.to_string(),
            critique: None,
        }
    }
}

/// One resolved child slot: its assigned id, the prompts it ended up with
/// (refined on success, inherited unchanged on failure), and whether
/// production completed.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    /// This child's candidate index within the iteration.
    pub candidate_index: u32,
    /// The parent it was expanded from.
    pub parent_candidate_index: Option<u32>,
    /// Content sub-prompt, refined on success.
    pub what_prompt: String,
    /// Style sub-prompt, refined on success.
    pub how_prompt: String,
    /// The generated image's path, or `None` if production failed.
    pub image_ref: Option<String>,
}

/// Assign each of `beam_width` child slots to a parent index, round-robin,
/// so expansion spreads evenly across however many parents survived (§4.7
/// step 3: "for each parent p and each child slot j such that the total
/// child count <= beam_width").
#[must_use]
pub fn assign_slots(parent_count: usize, beam_width: u32) -> Vec<usize> {
    if parent_count == 0 {
        return Vec::new();
    }
    (0..beam_width as usize).map(|slot| slot % parent_count).collect()
}

/// Expand one iteration's children concurrently, bounded by `beam_width`.
/// Returns once every child slot has resolved, success or failure; a single
/// child's production failure never aborts the others (§4.7 step 3d). Only
/// a metadata-persistence failure propagates, since that is session-fatal.
pub async fn expand_iteration(
    ctx: &Arc<SessionContext>,
    iteration_index: u32,
    dimension: Dimension,
    parents: &[ParentSlot],
) -> Result<Vec<ChildOutcome>> {
    let slot_parents = assign_slots(parents.len(), ctx.config.beam_width);
    let semaphore = Arc::new(Semaphore::new(ctx.config.beam_width.max(1) as usize));

    let mut handles = Vec::new();
    for (slot, parent_idx) in slot_parents.into_iter().enumerate() {
        if ctx.is_cancelled() {
            tracing::info!(iteration_index, slot, "cancellation requested, not launching remaining slots");
            break;
        }
        let ctx = ctx.clone();
        let parent = parents[parent_idx].clone();
        let semaphore = semaphore.clone();
        let candidate_index = slot as u32;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            run_candidate(&ctx, iteration_index, dimension, candidate_index, parent).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(err)) => return Err(err).context("persisting candidate attempt"),
            Err(join_err) => {
                tracing::error!(iteration_index, error = %join_err, "candidate worker task panicked");
            }
        }
    }
    outcomes.sort_by_key(|o| o.candidate_index);
    Ok(outcomes)
}

async fn run_candidate(
    ctx: &SessionContext,
    iteration_index: u32,
    dimension: Dimension,
    candidate_index: u32,
    parent: ParentSlot,
) -> Result<ChildOutcome> {
    let mut candidate = Candidate::new_attempted(
        candidate_index,
        parent.candidate_index,
        dimension,
        parent.what_prompt.clone(),
        parent.how_prompt.clone(),
    );
    candidate.critique = parent.critique.clone();

    ctx.tracker
        .record_attempt(iteration_index, dimension, candidate)
        .await
        .context("recording defensive attempt row")?;

    match produce_candidate(ctx, dimension, &parent).await {
        Ok(results) => {
            let what_prompt = results.what_prompt.clone();
            let how_prompt = results.how_prompt.clone();
            let image_ref = results.image_ref.clone();
            ctx.tracker
                .update_attempt_with_results(iteration_index, candidate_index, results, false)
                .await
                .context("persisting completed candidate")?;
            Ok(ChildOutcome {
                candidate_index,
                parent_candidate_index: parent.candidate_index,
                what_prompt,
                how_prompt,
                image_ref: Some(image_ref),
            })
        }
        Err(err) => {
            tracing::warn!(iteration_index, candidate_index, error = %err, "candidate production failed");
            ctx.tracker
                .mark_attempt_failed(iteration_index, candidate_index)
                .await
                .context("persisting failed candidate")?;
            Ok(ChildOutcome {
                candidate_index,
                parent_candidate_index: parent.candidate_index,
                what_prompt: parent.what_prompt,
                how_prompt: parent.how_prompt,
                image_ref: None,
            })
        }
    }
}

async fn produce_candidate(ctx: &SessionContext, dimension: Dimension, parent: &ParentSlot) -> Result<CandidateResults> {
    let hint = parent
        .critique
        .as_ref()
        .map(|c| format!("{}\n\nRecommendation: {}", c.critique, c.recommendation));

    let (what_prompt, how_prompt) = match dimension {
        Dimension::What => {
            let refined = refine_prompt(ctx, "refine_what", &parent.what_prompt, hint.as_deref()).await?;
            (refined, parent.how_prompt.clone())
        }
        Dimension::How => {
            let refined = refine_prompt(ctx, "refine_how", &parent.how_prompt, hint.as_deref()).await?;
            (parent.what_prompt.clone(), refined)
        }
    };

    let combined_prompt = combine_prompts(ctx, &what_prompt, &how_prompt).await?;

    let generated = ctx
        .call_image_generator(&combined_prompt)
        .await
        .context("generating candidate image")?;

    Ok(CandidateResults {
        what_prompt,
        how_prompt,
        combined_prompt,
        image_ref: generated.image_ref,
        evaluation: None,
        total_score: None,
    })
}

async fn refine_prompt(ctx: &SessionContext, operation: &str, prompt: &str, hint: Option<&str>) -> Result<String> {
    let system = "Refine the given image-generation sub-prompt, incorporating the critique if one is present.";
    let user = match hint {
        Some(hint) => format!("Prompt: {prompt}\n\nCritique: {hint}"),
        None => format!("Prompt: {prompt}"),
    };
    let response = ctx
        .call_text_model(operation, system, &user)
        .await
        .context("refining prompt")?;
    Ok(response.text)
}

async fn combine_prompts(ctx: &SessionContext, what_prompt: &str, how_prompt: &str) -> Result<String> {
    let system = "Combine a content sub-prompt and a style sub-prompt into a single image-generation prompt.";
    let user = format!("What: {what_prompt}\nHow: {how_prompt}");
    let response = ctx
        .call_text_model("combine_prompt", system, &user)
        .await
        .context("combining prompts")?;
    Ok(response.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_round_robin_across_parents() {
        assert_eq!(assign_slots(2, 5), vec![0, 1, 0, 1, 0]);
        assert_eq!(assign_slots(1, 3), vec![0, 0, 0]);
        assert_eq!(assign_slots(0, 3), Vec::<usize>::new());
    }
}
