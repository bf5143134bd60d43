//! Command handlers.

pub mod config_cmd;
pub mod presence;
pub mod probe;
pub mod serve;

use std::path::PathBuf;

use presenza_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file in effect: `--config` / `PRESENZA_CONFIG`, else the
/// platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(presenza_config::config_path)
}

/// Load the layered config for commands that talk to devices.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_file(global);
    let cfg = presenza_config::load_config(Some(&path))?;
    tracing::debug!(path = %path.display(), channels = cfg.channels.len(), "config loaded");
    Ok(cfg)
}

/// Print non-fatal problems to stderr.
pub fn report_warnings(warnings: &[String], quiet: bool) {
    if quiet {
        return;
    }
    for w in warnings {
        eprintln!("warning: {w}");
    }
}
