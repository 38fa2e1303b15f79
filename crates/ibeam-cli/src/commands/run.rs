use crate::config::{default_session_config, load_session_config, ConfigOverrides};
use crate::output::{print_info, print_session_summary, print_success, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use ibeam_orchestrator::{run_session, SessionContext, Supervisor};
use ibeam_tracker::{MetadataTracker, TokenTracker};
use ibeam_testing::{MockGpuPhaseCoordinator, MockImageGenerator, MockServiceManager, MockTextModel, MockVisionComparator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// Start a new beam-search session end to end.
///
/// No concrete collaborator providers ship with this crate (wiring a real
/// text model, vision comparator, or image generator is out of scope); this
/// command always runs against the scripted mocks in `ibeam-testing`, which
/// is enough to exercise the full orchestrator pipeline locally.
#[derive(Args)]
pub struct RunArgs {
    /// The user's image prompt.
    #[arg(long)]
    prompt: String,

    /// Directory session output (metadata, tokens, images) is written under.
    #[arg(long, default_value = "./ibeam-output")]
    output_dir: PathBuf,

    /// Optional TOML file providing a `SessionConfig`; built-in defaults are
    /// used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `SessionConfig::beam_width`.
    #[arg(long)]
    beam_width: Option<u32>,

    /// Override `SessionConfig::keep_top`.
    #[arg(long)]
    keep_top: Option<u32>,

    /// Override `SessionConfig::max_iterations`.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Override `SessionConfig::ensemble_size`.
    #[arg(long)]
    ensemble_size: Option<u32>,

    /// Override `SessionConfig::alignment_weight`.
    #[arg(long)]
    alignment_weight: Option<f64>,

    /// Output format for the final summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => load_session_config(path)?,
        None => default_session_config(),
    };
    let overrides = ConfigOverrides {
        beam_width: args.beam_width,
        keep_top: args.keep_top,
        max_iterations: args.max_iterations,
        ensemble_size: args.ensemble_size,
        alignment_weight: args.alignment_weight,
    };
    let config = overrides.apply(base);

    let session_id = format!("ses-{}", uuid::Uuid::new_v4());
    print_info(&format!("starting session '{session_id}'"));

    let tracker = MetadataTracker::initialize(&args.output_dir, session_id.clone(), args.prompt, config.clone())
        .await
        .context("initializing session metadata")?;

    let manager = Arc::new(MockServiceManager::new());
    let ctx = Arc::new(SessionContext {
        config,
        tracker: Arc::new(tracker),
        text_model: Arc::new(MockTextModel::new()),
        vision_comparator: Arc::new(MockVisionComparator::new()),
        image_generator: Arc::new(MockImageGenerator::new()),
        supervisor: Supervisor::new(manager),
        coordinator: Arc::new(MockGpuPhaseCoordinator::new()),
        tokens: AsyncMutex::new(TokenTracker::new()),
        cancellation: CancellationToken::new(),
    });

    let cancellation = ctx.cancellation.clone();
    let mut session_handle = tokio::spawn(run_session(ctx));

    let result = tokio::select! {
        result = &mut session_handle => result,
        _ = tokio::signal::ctrl_c() => {
            print_info("interrupt received, stopping after the current iteration");
            cancellation.cancel();
            session_handle.await
        }
    };

    let record = result.context("session task panicked")?.context("running session")?;
    print_success("session complete");
    print_session_summary(&record, args.format);
    Ok(())
}
