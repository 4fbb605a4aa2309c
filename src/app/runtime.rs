use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use crate::ProcessExit;
use crate::app::{command_dispatcher, settings, terminal};
use crate::cli::Cli;

pub(crate) async fn run_exporter() -> Result<ProcessExit> {
    // Parse before tracing so --help works without logs
    let cli = Cli::parse();

    let no_color = terminal::should_disable_color(
        cli.no_color,
        terminal::no_color_env_requested(),
        terminal::is_dumb_terminal(),
    );
    terminal::init_tracing(cli.default_log_level(), no_color);
    debug!(?cli, "CLI arguments parsed");

    let config = settings::resolve_config(&cli)?;
    debug!(?config, "configuration resolved");
    info!(command = ?cli.command, "helpdesk-export starting");

    command_dispatcher::dispatch(&cli.command, &config).await
}
