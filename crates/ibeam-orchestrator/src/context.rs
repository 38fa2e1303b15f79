//! Per-session state threaded through every call (§9 "Per-session state":
//! a `SessionContext` instead of module-level singletons).

use async_trait::async_trait;
use ibeam_core::{
    ChatOptions, GenerateOptions, GenerateResponse, GpuPhaseCoordinator, ImageGenerator, Result,
    ServiceManager, TextModel, Verdict, VisionComparator,
};
use ibeam_supervisor::{RetryOptions, ServiceConnection};
use ibeam_tracker::{MetadataTracker, TokenTracker};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// Logical service names used for supervisor instances and `tracing`
/// spans. Stable strings, not an enum, because they flow into
/// `ServiceManager` calls keyed by name.
pub mod service_names {
    /// The text-model collaborator.
    pub const TEXT_MODEL: &str = "text-model";
    /// The vision-language comparator collaborator.
    pub const VISION_COMPARATOR: &str = "vision-comparator";
    /// The image-generation collaborator.
    pub const IMAGE_GENERATOR: &str = "image-generator";
}

/// One [`ServiceConnection`] supervisor per local GPU-backed service,
/// shared by every provider that talks to that service (§5 "process-wide
/// state: one instance per local service").
pub struct Supervisor {
    /// Supervises the text-model collaborator.
    pub text_model: Arc<ServiceConnection>,
    /// Supervises the vision-language comparator collaborator.
    pub vision_comparator: Arc<ServiceConnection>,
    /// Supervises the image-generation collaborator.
    pub image_generator: Arc<ServiceConnection>,
}

impl Supervisor {
    /// Build one supervisor per service, all sharing `manager` and an
    /// initial (possibly empty) URL that each service's provider refreshes
    /// on restart.
    #[must_use]
    pub fn new(manager: Arc<dyn ServiceManager>) -> Self {
        Self {
            text_model: Arc::new(ServiceConnection::new(
                service_names::TEXT_MODEL,
                manager.clone(),
                String::new(),
            )),
            vision_comparator: Arc::new(ServiceConnection::new(
                service_names::VISION_COMPARATOR,
                manager.clone(),
                String::new(),
            )),
            image_generator: Arc::new(ServiceConnection::new(
                service_names::IMAGE_GENERATOR,
                manager,
                String::new(),
            )),
        }
    }
}

/// Everything one session's work needs, composed by constructor injection
/// rather than looked up through a global registry (§9 "Dynamic dispatch
/// over providers").
pub struct SessionContext {
    /// Immutable session configuration.
    pub config: ibeam_core::SessionConfig,
    /// The sole writer of this session's `metadata.json`.
    pub tracker: Arc<MetadataTracker>,
    /// Text-model collaborator (refinement, combination).
    pub text_model: Arc<dyn TextModel>,
    /// Vision-language comparator collaborator (pairwise ranking).
    pub vision_comparator: Arc<dyn VisionComparator>,
    /// Image-generation collaborator.
    pub image_generator: Arc<dyn ImageGenerator>,
    /// Per-service retry/restart supervisors.
    pub supervisor: Supervisor,
    /// GPU phase coordinator guarding cross-service VRAM exclusivity.
    pub coordinator: Arc<dyn GpuPhaseCoordinator>,
    /// Token-usage accumulator, persisted via `tracker.persist_tokens`
    /// after every iteration.
    pub tokens: AsyncMutex<TokenTracker>,
    /// Session-root cancellation; propagated into every collaborator call.
    pub cancellation: CancellationToken,
}

impl SessionContext {
    /// True once cancellation has been requested; call sites check this
    /// before launching new candidate work (§9 "Cancellation").
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Call the text model for `operation`, wrapped in the text-model
    /// supervisor's retry/restart policy and the GPU phase coordinator's
    /// exclusive section (§4.1, §5). Records the reported token usage on
    /// `operation` for later `tokens.json` persistence.
    pub async fn call_text_model(
        &self,
        operation: &str,
        system: &str,
        user: &str,
    ) -> Result<ibeam_core::ChatResponse> {
        let _guard = self.coordinator.acquire(service_names::TEXT_MODEL).await?;
        let model = self.text_model.clone();
        let system = system.to_string();
        let user = user.to_string();
        let options = ChatOptions::default();
        let response = self
            .supervisor
            .text_model
            .with_retry(
                move || {
                    let model = model.clone();
                    let system = system.clone();
                    let user = user.clone();
                    let options = options.clone();
                    async move { model.generate_chat(&system, &user, &options).await }
                },
                RetryOptions::new(operation),
            )
            .await?;
        self.tokens
            .lock()
            .await
            .record("text-model", operation, response.usage.total_tokens);
        Ok(response)
    }

    /// Generate one image, wrapped in the image-generator supervisor's
    /// retry/restart policy and the GPU phase coordinator's exclusive
    /// section.
    pub async fn call_image_generator(&self, prompt: &str) -> Result<GenerateResponse> {
        let _guard = self.coordinator.acquire(service_names::IMAGE_GENERATOR).await?;
        let generator = self.image_generator.clone();
        let prompt = prompt.to_string();
        let options = GenerateOptions::default();
        self.supervisor
            .image_generator
            .with_retry(
                move || {
                    let generator = generator.clone();
                    let prompt = prompt.clone();
                    let options = options.clone();
                    async move { generator.generate(&prompt, &options).await }
                },
                RetryOptions::new("generate_image"),
            )
            .await
    }
}

/// A session's vision comparator calls always go through the session's own
/// supervisor and GPU phase coordinator, so [`SessionContext`] implements
/// [`VisionComparator`] directly rather than exposing a second decorator
/// type; the ranking engine (C5) only ever sees `&dyn VisionComparator`.
#[async_trait]
impl VisionComparator for SessionContext {
    async fn compare(&self, image_a_ref: &str, image_b_ref: &str, prompt: &str) -> Result<Verdict> {
        let _guard = self.coordinator.acquire(service_names::VISION_COMPARATOR).await?;
        let comparator = self.vision_comparator.clone();
        let image_a = image_a_ref.to_string();
        let image_b = image_b_ref.to_string();
        let prompt = prompt.to_string();
        self.supervisor
            .vision_comparator
            .with_retry(
                move || {
                    let comparator = comparator.clone();
                    let image_a = image_a.clone();
                    let image_b = image_b.clone();
                    let prompt = prompt.clone();
                    async move { comparator.compare(&image_a, &image_b, &prompt).await }
                },
                RetryOptions::new("compare"),
            )
            .await
    }
}
