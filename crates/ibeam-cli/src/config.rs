//! Loads a [`SessionConfig`] from an optional TOML file and applies
//! command-line overrides, mirroring the corpus's direct
//! `std::env::var().ok().and_then(...)` style rather than pulling in a
//! heavyweight config-layering crate (§10.3).

use anyhow::{Context, Result};
use ibeam_core::{Dimension, RankingStrategy, SessionConfig};
use std::path::Path;

/// A session's built-in defaults, used when no `--config` file is given.
#[must_use]
pub fn default_session_config() -> SessionConfig {
    SessionConfig {
        beam_width: 3,
        keep_top: 2,
        max_iterations: 3,
        alignment_weight: 0.7,
        ensemble_size: 1,
        ranking_strategy: RankingStrategy::Auto,
        refinement_schedule: vec![Dimension::What, Dimension::How],
        providers: Default::default(),
        provider_options: Default::default(),
    }
}

/// Read a [`SessionConfig`] from a TOML file.
pub fn load_session_config(path: &Path) -> Result<SessionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

/// CLI-supplied overrides for the handful of `SessionConfig` fields worth
/// tweaking per run without editing a TOML file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub beam_width: Option<u32>,
    pub keep_top: Option<u32>,
    pub max_iterations: Option<u32>,
    pub ensemble_size: Option<u32>,
    pub alignment_weight: Option<f64>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut config: SessionConfig) -> SessionConfig {
        if let Some(beam_width) = self.beam_width {
            config.beam_width = beam_width;
        }
        if let Some(keep_top) = self.keep_top {
            config.keep_top = keep_top;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(ensemble_size) = self.ensemble_size {
            config.ensemble_size = ensemble_size;
        }
        if let Some(alignment_weight) = self.alignment_weight {
            config.alignment_weight = alignment_weight;
        }
        config
    }
}
