//! CLI command implementations.

pub mod checkpoints;
pub mod config;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use siphon_config::{ConfigLoader, SiphonConfig};
use std::path::Path;

/// Loads the merged configuration for `project`.
pub(crate) fn load_config(project: &Path, user_config: bool) -> Result<SiphonConfig> {
    let mut loader = ConfigLoader::new().with_project_dir(project);
    if !user_config {
        loader = loader.without_user_config();
    }
    loader.load().context("Failed to load configuration")
}
