use crate::output::{print_session_summary, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use ibeam_tracker::MetadataTracker;
use std::path::PathBuf;

/// Load an existing session's `metadata.json` and print a read-only summary.
///
/// `resume` is intentionally not supported (no persistent cross-session
/// history is in scope); this command never mutates the session directory.
#[derive(Args)]
pub struct InspectArgs {
    /// Session directory containing `metadata.json`
    /// (`output_dir/<YYYY-MM-DD>/<session_id>/`).
    #[arg(long = "session-dir")]
    session_dir: PathBuf,

    /// Output format for the summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let tracker = MetadataTracker::reopen(args.session_dir.clone())
        .await
        .with_context(|| format!("reopening session at {}", args.session_dir.display()))?;

    let record = tracker.snapshot().await;
    print_session_summary(&record, args.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        inspect: InspectArgs,
    }

    #[test]
    fn requires_session_dir() {
        assert!(Cli::try_parse_from(["test"]).is_err());
    }

    #[test]
    fn parses_session_dir_and_format() {
        let cli = Cli::parse_from(["test", "--session-dir", "/tmp/ses-1", "--format", "json"]);
        assert_eq!(cli.inspect.session_dir, PathBuf::from("/tmp/ses-1"));
        assert!(matches!(cli.inspect.format, OutputFormat::Json));
    }
}
