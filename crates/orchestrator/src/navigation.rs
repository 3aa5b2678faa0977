use flow_core::Process;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Where a process may move to inside a schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NavigationTarget {
    Process(Process),
    /// Leave the current schedule and go back to schedule selection.
    ExitSchedule,
}

impl fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(process) => process.fmt(f),
            Self::ExitSchedule => f.write_str("terminate-schedule"),
        }
    }
}

/// Adjacency rules for process movement. The same table applies in every
/// schedule.
pub struct ProcessNavigator;

impl ProcessNavigator {
    pub fn validate(from: Process, to: NavigationTarget) -> Result<()> {
        if Self::allowed_targets(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidNavigation { from, to })
        }
    }

    pub fn allowed_targets(from: Process) -> Vec<NavigationTarget> {
        use NavigationTarget::{ExitSchedule, Process as To};

        match from {
            Process::P1 => vec![To(Process::P1), To(Process::P2)],
            Process::P2 => vec![To(Process::P1), To(Process::P2), To(Process::P3)],
            Process::P3 => vec![To(Process::P2), To(Process::P3), ExitSchedule],
        }
    }

    pub fn is_valid(from: Process, to: NavigationTarget) -> bool {
        Self::validate(from, to).is_ok()
    }

    /// The forward neighbour, if any.
    pub fn next_process(current: Process) -> Option<Process> {
        match current {
            Process::P1 => Some(Process::P2),
            Process::P2 => Some(Process::P3),
            Process::P3 => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to(p: Process) -> NavigationTarget {
        NavigationTarget::Process(p)
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ProcessNavigator::is_valid(Process::P1, to(Process::P2)));
        assert!(ProcessNavigator::is_valid(Process::P2, to(Process::P3)));
        assert!(ProcessNavigator::is_valid(
            Process::P3,
            NavigationTarget::ExitSchedule
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ProcessNavigator::is_valid(Process::P1, to(Process::P3)));
        assert!(!ProcessNavigator::is_valid(Process::P3, to(Process::P1)));
        assert!(!ProcessNavigator::is_valid(
            Process::P1,
            NavigationTarget::ExitSchedule
        ));
        assert!(!ProcessNavigator::is_valid(
            Process::P2,
            NavigationTarget::ExitSchedule
        ));
    }

    #[test]
    fn test_navigation_closure() {
        let legal = [
            (Process::P1, to(Process::P1)),
            (Process::P1, to(Process::P2)),
            (Process::P2, to(Process::P1)),
            (Process::P2, to(Process::P2)),
            (Process::P2, to(Process::P3)),
            (Process::P3, to(Process::P2)),
            (Process::P3, to(Process::P3)),
            (Process::P3, NavigationTarget::ExitSchedule),
        ];

        for from in Process::ALL {
            let targets = Process::ALL
                .iter()
                .copied()
                .map(to)
                .chain(std::iter::once(NavigationTarget::ExitSchedule));
            for target in targets {
                let expected = legal.contains(&(from, target));
                assert_eq!(
                    ProcessNavigator::is_valid(from, target),
                    expected,
                    "{from} -> {target}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_navigation_error() {
        let err = ProcessNavigator::validate(Process::P1, NavigationTarget::ExitSchedule)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid navigation from P1 to terminate-schedule"
        );
    }

    #[test]
    fn test_neighbours() {
        assert_eq!(ProcessNavigator::next_process(Process::P1), Some(Process::P2));
        assert_eq!(ProcessNavigator::next_process(Process::P3), None);
    }
}
