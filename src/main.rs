//! CLI entry point for the help-desk exporter.

use std::process::ExitCode;

use tracing::error;

mod app;
mod cli;

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything attempted finished.
    Success,
    /// Some work finished, some stays pending.
    Partial,
    /// Nothing finished, or the run aborted.
    Failure,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_exporter().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
