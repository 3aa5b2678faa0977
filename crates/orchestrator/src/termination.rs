use flow_core::{OrchestrationState, Process, Schedule};

/// Decides whether an orchestration may legally stop.
pub struct TerminationChecker;

impl TerminationChecker {
    /// True iff every schedule was visited and the last visit was Production/P3.
    pub fn can_terminate(state: &OrchestrationState) -> bool {
        let all_visited = state.visited_schedules().len() == Schedule::ALL.len();
        let ended_in_production = state
            .last_entry()
            .is_some_and(|entry| entry.position() == (Schedule::Production, Process::P3));

        all_visited && ended_in_production
    }

    /// Schedules not yet entered, in ordinal order.
    pub fn missing_schedules(state: &OrchestrationState) -> Vec<Schedule> {
        Schedule::ALL
            .into_iter()
            .filter(|s| !state.visited_schedules().contains(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn walk(schedules: &[Schedule]) -> OrchestrationState {
        let mut state = OrchestrationState::new();
        let mut iter = schedules.iter();
        if let Some(first) = iter.next() {
            state.begin(*first).unwrap();
            state.move_to(Process::P2).unwrap();
            state.move_to(Process::P3).unwrap();
        }
        for schedule in iter {
            state.enter_schedule(*schedule).unwrap();
            state.move_to(Process::P2).unwrap();
            state.move_to(Process::P3).unwrap();
        }
        state
    }

    #[test]
    fn test_all_schedules_production_last() {
        let state = walk(&Schedule::ALL);
        assert!(TerminationChecker::can_terminate(&state));
        assert!(TerminationChecker::missing_schedules(&state).is_empty());
    }

    #[test]
    fn test_out_of_order_still_terminates_when_production_last() {
        let state = walk(&[
            Schedule::Plan,
            Schedule::Knowledge,
            Schedule::Scale,
            Schedule::Implement,
            Schedule::Plan,
            Schedule::Production,
        ]);
        assert!(TerminationChecker::can_terminate(&state));
    }

    #[test]
    fn test_fewer_than_five_never_terminates() {
        let state = walk(&[Schedule::Knowledge, Schedule::Plan, Schedule::Production]);
        assert!(!TerminationChecker::can_terminate(&state));
        assert_eq!(
            TerminationChecker::missing_schedules(&state),
            vec![Schedule::Implement, Schedule::Scale]
        );
    }

    #[test]
    fn test_production_not_last() {
        let state = walk(&[
            Schedule::Knowledge,
            Schedule::Plan,
            Schedule::Implement,
            Schedule::Production,
            Schedule::Scale,
        ]);
        assert!(!TerminationChecker::can_terminate(&state));
    }

    #[test]
    fn test_production_without_p3() {
        let mut state = walk(&Schedule::ALL);
        state.move_to(Process::P2).unwrap();
        assert!(!TerminationChecker::can_terminate(&state));
    }

    #[test]
    fn test_not_started() {
        let state = OrchestrationState::new();
        assert!(!TerminationChecker::can_terminate(&state));
        assert_eq!(TerminationChecker::missing_schedules(&state).len(), 5);
    }

    proptest! {
        #[test]
        fn prop_missing_schedule_blocks_termination(
            excluded in prop::sample::select(Schedule::ALL.to_vec()),
            visits in prop::collection::vec(prop::sample::select(Schedule::ALL.to_vec()), 1..32),
        ) {
            let visits: Vec<Schedule> = visits.into_iter().filter(|s| *s != excluded).collect();
            prop_assume!(!visits.is_empty());

            let state = walk(&visits);
            prop_assert!(state.visited_schedules().len() < Schedule::ALL.len());
            prop_assert!(!TerminationChecker::can_terminate(&state));
            prop_assert!(TerminationChecker::missing_schedules(&state).contains(&excluded));
        }

        #[test]
        fn prop_any_order_ending_in_production_terminates(
            order in Just(Schedule::ALL.to_vec()).prop_shuffle(),
        ) {
            let mut visits = order;
            visits.push(Schedule::Production);

            let state = walk(&visits);
            prop_assert!(TerminationChecker::can_terminate(&state));
        }
    }
}
