//! Beam-search orchestrator (C8): refine, generate, rank, critique, survive
//! (§4.7). Iterations are sequential — each depends on the previous — but
//! candidate expansion within one iteration runs concurrently via
//! [`crate::expand::expand_iteration`] (§5 "Scheduling model").

use crate::context::SessionContext;
use crate::expand::{expand_iteration, ChildOutcome, ParentSlot};
use anyhow::{Context, Result};
use ibeam_core::{CandidateId, Critique, SessionRecord};
use ibeam_critique::critique_survivors;
use ibeam_rank::{rank_images, RankableImage, RankedCandidate, RankingOptions, ThreadRandomSource};
use ibeam_tracker::RankingEnrichment;
use std::collections::HashMap;
use std::sync::Arc;

/// Run the full beam search to completion and return the final, persisted
/// session record. Cancellation stops the launch of new iteration work and
/// finalizes with whatever has already been persisted (§9 "Cancellation").
pub async fn run_session(ctx: Arc<SessionContext>) -> Result<SessionRecord> {
    let user_prompt = ctx.tracker.snapshot().await.user_prompt;
    let mut parents = vec![ParentSlot::root(&user_prompt)];

    let mut last_iteration_index = 0u32;
    let mut last_ranked: Vec<RankedCandidate> = Vec::new();

    for iteration_index in 0..ctx.config.max_iterations {
        if ctx.is_cancelled() {
            tracing::info!(iteration_index, "cancellation requested, stopping before new iteration");
            break;
        }

        let dimension = ctx.config.dimension_for_iteration(iteration_index);
        tracing::info!(iteration_index, ?dimension, parents = parents.len(), "starting iteration");

        let outcomes = expand_iteration(&ctx, iteration_index, dimension, &parents)
            .await
            .context("expanding iteration")?;

        last_iteration_index = iteration_index;

        let completed: Vec<RankableImage> = outcomes
            .iter()
            .filter_map(|o| {
                o.image_ref.as_ref().map(|image_ref| RankableImage {
                    id: CandidateId::new(iteration_index, o.candidate_index),
                    image_ref: image_ref.clone(),
                })
            })
            .collect();

        if completed.is_empty() {
            tracing::warn!(iteration_index, "every candidate in this iteration failed production; stopping early");
            break;
        }

        let random = ThreadRandomSource;
        let options = RankingOptions {
            known_comparisons: Vec::new(),
            ensemble_size: ctx.config.ensemble_size,
            strategy: ctx.config.ranking_strategy,
            graceful_degradation: true,
            on_progress: None,
        };

        let ranking = rank_images(&completed, &user_prompt, &*ctx, &random, ctx.config.alignment_weight, options)
            .await
            .context("ranking iteration")?;

        for error in &ranking.metadata.errors {
            tracing::warn!(
                iteration_index,
                candidate_a = %error.candidate_a,
                candidate_b = %error.candidate_b,
                message = %error.message,
                "comparison failure absorbed under graceful degradation"
            );
        }

        let keep_top = ctx.config.keep_top.min(ranking.rankings.len() as u32) as usize;
        let survivor_ids: Vec<CandidateId> = ranking.rankings.iter().take(keep_top).map(|r| r.id).collect();
        let survivor_indices: Vec<u32> = survivor_ids.iter().map(|id| id.candidate_index).collect();

        let next_dimension = ctx.config.dimension_for_iteration(iteration_index + 1);
        let critiques = critique_survivors(&ranking.rankings, &survivor_ids, next_dimension);

        for ranked in &ranking.rankings {
            let critique = critiques.get(&ranked.id).cloned().flatten();
            ctx.tracker
                .enrich_candidate_with_ranking_data(
                    iteration_index,
                    ranked.id.candidate_index,
                    RankingEnrichment {
                        comparisons: ranked.comparisons.clone(),
                        aggregated_feedback: Some(ranked.aggregated_feedback.clone()),
                        rank_in_iteration: Some(ranked.rank),
                        critique,
                    },
                )
                .await
                .context("enriching ranked candidate")?;
        }

        ctx.tracker
            .mark_survivors(iteration_index, &survivor_indices)
            .await
            .context("marking survivors")?;

        {
            let tokens = ctx.tokens.lock().await;
            ctx.tracker.persist_tokens(&tokens).await.context("persisting token accounting")?;
        }

        last_ranked = ranking.rankings;
        parents = build_next_parents(&outcomes, &survivor_ids, &critiques);

        if parents.is_empty() {
            tracing::warn!(iteration_index, "no survivors; stopping early");
            break;
        }
    }

    finalize_winner(&ctx, last_iteration_index, &last_ranked).await?;

    Ok(ctx.tracker.snapshot().await)
}

/// Turn this iteration's survivors into the next iteration's parent set,
/// carrying forward each survivor's refined prompts and its critique.
fn build_next_parents(
    outcomes: &[ChildOutcome],
    survivor_ids: &[CandidateId],
    critiques: &HashMap<CandidateId, Option<Critique>>,
) -> Vec<ParentSlot> {
    survivor_ids
        .iter()
        .filter_map(|id| {
            outcomes.iter().find(|o| o.candidate_index == id.candidate_index).map(|o| ParentSlot {
                candidate_index: Some(o.candidate_index),
                what_prompt: o.what_prompt.clone(),
                how_prompt: o.how_prompt.clone(),
                critique: critiques.get(id).cloned().flatten(),
            })
        })
        .collect()
}

/// Pick the global winner from the last iteration's ranking (highest
/// `total_score`, else lowest combined rank — already the ordering
/// `rank_images` produced) and record it (§4.7 "after the final iteration").
async fn finalize_winner(ctx: &SessionContext, iteration_index: u32, ranked: &[RankedCandidate]) -> Result<()> {
    let Some(winner) = ranked.first() else {
        tracing::warn!("no ranked candidates at session end; leaving final_winner unset");
        return Ok(());
    };

    let snapshot = ctx.tracker.snapshot().await;
    let total_score = snapshot
        .iterations
        .iter()
        .find(|it| it.iteration_index == iteration_index)
        .and_then(|it| it.candidates.iter().find(|c| c.candidate_index == winner.id.candidate_index))
        .and_then(|c| c.total_score);

    ctx.tracker
        .mark_final_winner(iteration_index, winner.id.candidate_index, total_score)
        .await
        .context("marking final winner")
}
