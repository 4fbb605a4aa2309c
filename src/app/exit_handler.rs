//! Exit code logic for the exporter process.

use helpdesk_export::ProcessStats;

use crate::ProcessExit;

/// Maps a processing run to the process exit outcome.
///
/// Skipped items count as unfinished: they stay pending just like failures.
pub(crate) fn determine_exit_outcome(stats: &ProcessStats) -> ProcessExit {
    if stats.unfinished() == 0 {
        ProcessExit::Success
    } else if stats.saved > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::determine_exit_outcome;
    use crate::ProcessExit;
    use helpdesk_export::ProcessStats;

    fn stats(saved: usize, skipped: usize, failed: usize) -> ProcessStats {
        ProcessStats {
            saved,
            skipped,
            failed,
            already_done: 0,
        }
    }

    #[test]
    fn test_exit_outcome_success_when_nothing_unfinished() {
        assert_eq!(determine_exit_outcome(&stats(3, 0, 0)), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_success_when_nothing_attempted() {
        assert_eq!(determine_exit_outcome(&stats(0, 0, 0)), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_partial_when_mixed() {
        assert_eq!(determine_exit_outcome(&stats(2, 0, 1)), ProcessExit::Partial);
        assert_eq!(determine_exit_outcome(&stats(2, 1, 0)), ProcessExit::Partial);
    }

    #[test]
    fn test_exit_outcome_failure_when_nothing_saved() {
        assert_eq!(determine_exit_outcome(&stats(0, 1, 2)), ProcessExit::Failure);
    }
}
