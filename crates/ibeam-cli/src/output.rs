//! Output formatting shared by the `run` and `inspect` subcommands.
//!
//! Mirrors the corpus's table/JSON dual output-format convention: a
//! `--format` flag selects between a colored `comfy_table` rendering and a
//! plain `serde_json` dump suitable for piping into other tools.

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use ibeam_core::SessionRecord;

/// Output format for CLI commands. Defaults to human-readable table format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table output with colors.
    #[default]
    Table,
    /// Machine-readable JSON output.
    Json,
}

/// Create a formatted table using the corpus's UTF8 preset.
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

/// Print a session record in the requested format: the full `metadata.json`
/// document for `Json`, or a human-readable summary table for `Table`.
pub fn print_session_summary(record: &SessionRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            match serde_json::to_string_pretty(record) {
                Ok(json) => println!("{json}"),
                Err(err) => print_error(&format!("failed to serialize session record: {err}")),
            }
        }
        OutputFormat::Table => print_session_table(record),
    }
}

fn print_session_table(record: &SessionRecord) {
    println!("{}", "Session Summary".bright_cyan().bold());
    println!("{}", "═".repeat(80).bright_cyan());

    let mut table = create_table();
    table.set_header(vec!["Property", "Value"]);
    table.add_row(vec!["Session ID", &record.session_id]);
    table.add_row(vec!["Prompt", &record.user_prompt]);
    table.add_row(vec!["Iterations", &record.iterations.len().to_string()]);

    if let Some(winner) = &record.final_winner {
        table.add_row(vec![
            "Final winner".to_string(),
            format!(
                "iter {} / candidate {} (score {})",
                winner.iteration,
                winner.candidate_index,
                winner.total_score.map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}")),
            ),
        ]);
    } else {
        table.add_row(vec!["Final winner".to_string(), "none".to_string()]);
    }

    println!("{table}");
    println!();

    println!("{}", "Lineage".bright_cyan().bold());
    println!("{}", "═".repeat(80).bright_cyan());
    if record.lineage.is_empty() {
        println!("(empty)");
    } else {
        let chain = record
            .lineage
            .iter()
            .map(|entry| format!("iter{}/cand{}", entry.iteration, entry.candidate_index))
            .collect::<Vec<_>>()
            .join(" -> ");
        println!("{chain}");
    }
    println!();

    println!("{}", "Iterations".bright_cyan().bold());
    println!("{}", "═".repeat(80).bright_cyan());
    let mut table = create_table();
    table.set_header(vec!["#", "Dimension", "Candidates", "Best candidate", "Best score"]);
    for iteration in &record.iterations {
        table.add_row(vec![
            iteration.iteration_index.to_string(),
            format!("{:?}", iteration.dimension_refined),
            iteration.candidates.len().to_string(),
            iteration
                .best_candidate_index
                .map_or_else(|| "n/a".to_string(), |i| i.to_string()),
            iteration
                .best_score
                .map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}")),
        ]);
    }
    println!("{table}");
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "ERROR:".bright_red().bold(), msg);
}

/// Print an info message.
pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".bright_blue().bold(), msg);
}

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".bright_green().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_defaults_to_table() {
        assert!(matches!(OutputFormat::default(), OutputFormat::Table));
    }
}
