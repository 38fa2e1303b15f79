//! Polymorphic interfaces for every external collaborator the core talks to
//! (§6, §9 "Dynamic dispatch over providers"). The orchestrator composes
//! these by constructor injection; there is no global registry.

use crate::error::Result;
use crate::model::FactorRanks;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options accepted by [`TextModel::generate_chat`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold.
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff.
    pub top_k: Option<u32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
    /// Requested response format (e.g. `"json"`), provider-defined.
    pub response_format: Option<String>,
}

/// Token usage reported alongside a chat completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed.
    pub prompt_tokens: u64,
    /// Completion tokens produced.
    pub completion_tokens: u64,
    /// Total tokens, usually `prompt_tokens + completion_tokens`.
    pub total_tokens: u64,
}

/// Result of [`TextModel::generate_chat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text.
    pub text: String,
    /// Token usage for this call.
    pub usage: Usage,
}

/// The language-model collaborator used for prompt refinement and combination.
///
/// Implementations must raise [`crate::error::IbeamError::TransportUnreachable`]
/// when the underlying service cannot be reached so the supervisor can apply
/// its retry/restart policy (§4.1).
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Generate a chat completion from a system and user message.
    async fn generate_chat(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> Result<ChatResponse>;
}

/// Which operand a vision comparator favored, including the tie case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Choice {
    /// The first operand won.
    A,
    /// The second operand won.
    B,
    /// Neither operand won.
    Tie,
}

/// A single pairwise comparator verdict (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Which operand the comparator preferred.
    pub choice: Choice,
    /// Free-form justification.
    pub explanation: String,
    /// Comparator's self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Ordinal ranks (1 and 2 per factor) for operand A.
    pub ranks_a: FactorRanks,
    /// Ordinal ranks (1 and 2 per factor) for operand B.
    pub ranks_b: FactorRanks,
    /// Strengths attributed to the winning image.
    pub winner_strengths: Vec<String>,
    /// Weaknesses attributed to the losing image.
    pub loser_weaknesses: Vec<String>,
    /// A single short improvement suggestion, if any.
    pub improvement_suggestion: Option<String>,
}

impl Verdict {
    /// Structural validation: ranks must actually disagree about which
    /// operand is better, in the direction that matches `choice`, whenever
    /// `choice` is not a tie. A tie is always structurally valid.
    ///
    /// Per §4.3 the ranker only rejects a verdict for orientation
    /// disagreement between `choice` and `ranks`; all other fields are
    /// trusted as reported.
    #[must_use]
    pub fn is_structurally_valid(&self) -> bool {
        match self.choice {
            Choice::Tie => true,
            Choice::A => self.ranks_a.alignment <= self.ranks_b.alignment
                || self.ranks_a.aesthetics <= self.ranks_b.aesthetics,
            Choice::B => self.ranks_b.alignment <= self.ranks_a.alignment
                || self.ranks_b.aesthetics <= self.ranks_a.aesthetics,
        }
    }
}

/// The vision-language collaborator used for pairwise image comparison.
#[async_trait]
pub trait VisionComparator: Send + Sync {
    /// Compare two images against a prompt. `image_a_ref`/`image_b_ref` are
    /// local filesystem paths.
    async fn compare(&self, image_a_ref: &str, image_b_ref: &str, prompt: &str) -> Result<Verdict>;
}

/// Options accepted by [`ImageGenerator::generate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Opaque, provider-defined pass-through options (VRAM hints, sampler
    /// settings, and the like).
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Result of [`ImageGenerator::generate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Local path or URL to the generated image.
    pub image_ref: String,
    /// Opaque provider metadata (seed, steps, moderation retries, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The image-generation collaborator. Providers may poll internally and
/// rephrase the prompt on content-moderation refusals; both are out of
/// scope for the core and are hidden behind this single call.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image from `prompt`.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse>;
}

/// Process-liveness and network-location lookups for local GPU services
/// (§4.1, §6.4).
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Whether the named service's process is currently alive (a PID check
    /// against its port record).
    async fn is_service_running(&self, name: &str) -> Result<bool>;

    /// The named service's current base URL, read from its port record.
    async fn get_service_url(&self, name: &str) -> Result<String>;

    /// Whether an external stop-lock suppresses auto-restart for `name`.
    async fn has_stop_lock(&self, name: &str) -> Result<bool>;

    /// Attempt to restart the named service; returns once the new process
    /// is ready to accept calls.
    async fn restart_service(&self, name: &str) -> Result<()>;
}

/// RAII guard for a GPU phase section. Dropping it (or calling
/// [`GpuPhaseGuard::release`] explicitly) signals the coordinator that the
/// exclusive section for this service has ended.
pub struct GpuPhaseGuard {
    service: String,
    release_fn: Option<Box<dyn FnOnce(&str) + Send>>,
}

impl GpuPhaseGuard {
    /// Construct a guard that calls `release_fn` with the service name when
    /// released, exactly once.
    #[must_use]
    pub fn new(service: impl Into<String>, release_fn: Box<dyn FnOnce(&str) + Send>) -> Self {
        Self {
            service: service.into(),
            release_fn: Some(release_fn),
        }
    }

    /// Release the section early instead of waiting for drop.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(f) = self.release_fn.take() {
            f(&self.service);
        }
    }
}

impl Drop for GpuPhaseGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// A process-wide exclusive section for one GPU-backed service's VRAM
/// residency (§5 "GPU resource coupling").
///
/// Modeled as an acquire-a-guard call rather than a generic
/// `with_operation(service, fn) -> T` so the trait stays object-safe; the
/// caller does its work between `acquire` and dropping the returned guard.
/// Implementations may unload a different resident model while the guard is
/// held, before returning it.
#[async_trait]
pub trait GpuPhaseCoordinator: Send + Sync {
    /// Acquire the exclusive section for `service`, unloading any other
    /// resident model first if required.
    async fn acquire(&self, service: &str) -> Result<GpuPhaseGuard>;
}
