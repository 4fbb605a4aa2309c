//! CLI command routing: runs Discover, Process, and Status.

use anyhow::Result;
use helpdesk_export::{
    CsvSink, ExportConfig, ExportError, ProcessOptions, ProgressStore, connect, run_discovery,
    run_processing,
};
use tracing::{info, warn};

use crate::ProcessExit;
use crate::app::exit_handler;
use crate::cli::Command;

/// Runs `command` and returns the exit outcome.
pub(crate) async fn dispatch(command: &Command, config: &ExportConfig) -> Result<ProcessExit> {
    match command {
        Command::Discover => run_discover_command(config).await,
        Command::Process { limit } => run_process_command(config, *limit).await,
        Command::Status => run_status_command(config),
    }
}

async fn run_discover_command(config: &ExportConfig) -> Result<ProcessExit> {
    let client = connect(config).await?;
    let discovered = run_discovery(&client, config).await?;

    if !discovered.skipped_pages.is_empty() {
        warn!(pages = ?discovered.skipped_pages, "some listing pages were skipped");
    }
    info!(
        count = discovered.ids.len(),
        path = %config.paths.pending_ids.display(),
        "pending snapshot ready"
    );

    Ok(if discovered.skipped_pages.is_empty() {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    })
}

async fn run_process_command(config: &ExportConfig, limit: Option<u64>) -> Result<ProcessExit> {
    // Fail before authenticating if discovery has not run yet.
    ProgressStore::from_paths(&config.paths)
        .load()
        .map_err(ExportError::from)?;

    let client = connect(config).await?;
    let mut sink = CsvSink::open(&config.paths.csv).map_err(ExportError::from)?;
    let options = ProcessOptions {
        limit: limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
    };

    let stats = run_processing(&client, config, &mut sink, options).await?;
    info!(%stats, csv = %sink.path().display(), "export run complete");
    Ok(exit_handler::determine_exit_outcome(&stats))
}

fn run_status_command(config: &ExportConfig) -> Result<ProcessExit> {
    let store = ProgressStore::from_paths(&config.paths);
    match store.load_if_present().map_err(ExportError::from)? {
        Some(snapshot) => {
            println!("pending snapshot: {}", store.pending_path().display());
            println!("pending:   {}", snapshot.pending().len());
            println!("done:      {}", snapshot.done_count());
            println!("remaining: {}", snapshot.remaining().len());
        }
        None => {
            println!(
                "no pending snapshot at {}; run `discover` first",
                store.pending_path().display()
            );
        }
    }
    Ok(ProcessExit::Success)
}
