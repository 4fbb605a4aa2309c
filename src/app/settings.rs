//! Config file discovery and layering for the CLI.

use std::path::Path;

use anyhow::{Context, Result};
use helpdesk_export::config::resolve_default_config_path;
use helpdesk_export::{ConfigOverrides, ExportConfig, FileConfig};
use tracing::debug;

use crate::cli::Cli;

/// Resolves the run configuration from the config file, environment, and flags.
///
/// An explicit `--config` must exist; the default location is optional.
pub(crate) fn resolve_config(cli: &Cli) -> Result<ExportConfig> {
    let file = match &cli.config {
        Some(path) => Some(load_file(path)?),
        None => match resolve_default_config_path() {
            Some(path) if path.is_file() => Some(load_file(&path)?),
            _ => {
                debug!("no config file found, using defaults");
                None
            }
        },
    };

    let overrides = ConfigOverrides {
        output_dir: cli.output_dir.clone(),
        rate_limit_ms: cli.rate_limit,
        max_retries: cli.max_retries,
    };

    ExportConfig::resolve(file.as_ref(), &overrides, |name| std::env::var(name).ok())
        .context("invalid configuration")
}

fn load_file(path: &Path) -> Result<FileConfig> {
    debug!(path = %path.display(), "loading config file");
    FileConfig::load(path).with_context(|| format!("cannot use config file {}", path.display()))
}
