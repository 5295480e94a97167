//! Property test: whatever path an `AgentTaskState` machine is driven through,
//! once it reaches a terminal state it never leaves, and `cancelable()` never
//! agrees with `is_terminal()`.

#![cfg(feature = "coordinator")]

use a2a_rs::server::AgentTaskState;
use proptest::prelude::*;

fn all_states() -> [AgentTaskState; 6] {
    [
        AgentTaskState::Pending,
        AgentTaskState::Assigned,
        AgentTaskState::Running,
        AgentTaskState::Completed,
        AgentTaskState::Failed,
        AgentTaskState::Cancelled,
    ]
}

fn state_strategy() -> impl Strategy<Value = AgentTaskState> {
    prop_oneof![
        Just(AgentTaskState::Pending),
        Just(AgentTaskState::Assigned),
        Just(AgentTaskState::Running),
        Just(AgentTaskState::Completed),
        Just(AgentTaskState::Failed),
        Just(AgentTaskState::Cancelled),
    ]
}

proptest! {
    #[test]
    fn terminal_states_reject_every_possible_next_state(start in state_strategy()) {
        if start.is_terminal() {
            for next in all_states() {
                prop_assert!(!start.can_transition_to(next));
            }
        }
    }

    #[test]
    fn cancelable_and_terminal_are_mutually_exclusive(state in state_strategy()) {
        prop_assert!(!(state.cancelable() && state.is_terminal()));
    }

    #[test]
    fn random_walk_of_transitions_never_resurrects_a_terminal_state(
        path in prop::collection::vec(state_strategy(), 1..20)
    ) {
        let mut current = AgentTaskState::Pending;
        let mut ever_terminal = false;
        for next in path {
            if current.can_transition_to(next) {
                prop_assert!(!ever_terminal, "a terminal state accepted a transition");
                current = next;
            }
            if current.is_terminal() {
                ever_terminal = true;
            }
        }
    }
}
