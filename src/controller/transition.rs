//! # Transition selection and task planning.
//!
//! The selector is a pure function of the controller's mode, state, and
//! counters. The planning loop around it reconciles demand propagation,
//! chains transitions while no work is produced, and converts each chosen
//! transition into its fan-out tasks.
//!
//! ## Rules
//! - The loop runs only with zero fan-out tasks in flight; an in-flight
//!   task defers further movement until its epilogue re-runs the loop.
//! - Queued listener events are flushed before any new transition is
//!   attempted, and otherwise handed out only when a chain produced no
//!   state-machine fan-out — listeners observe one terminal event per
//!   chain.
//! - Several transitions may chain under one lock hold (e.g. down →
//!   start-requested → starting) when the intermediate steps produce no
//!   tasks.

use crate::events::LifecycleEvent;
use crate::mode::ServiceMode;
use crate::state::ServiceState;

use super::core::{ControllerState, ServiceController};
use super::tasks::{Notice, TaskKind};

/// One legal state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    NewToDown,
    DownToRemoving,
    DownToProblem,
    DownToStartRequested,
    ProblemToDown,
    StartRequestedToStarting,
    StartRequestedToDown,
    StartingToUp,
    StartingToStartFailed,
    UpToStopRequested,
    StopRequestedToUp,
    StopRequestedToStopping,
    StoppingToDown,
    StartFailedToStarting,
    StartFailedToDown,
    RemovingToRemoved,
}

impl Transition {
    pub(crate) fn target(self) -> ServiceState {
        match self {
            Transition::NewToDown
            | Transition::ProblemToDown
            | Transition::StartRequestedToDown
            | Transition::StoppingToDown
            | Transition::StartFailedToDown => ServiceState::Down,
            Transition::DownToRemoving => ServiceState::Removing,
            Transition::DownToProblem => ServiceState::Problem,
            Transition::DownToStartRequested => ServiceState::StartRequested,
            Transition::StartRequestedToStarting | Transition::StartFailedToStarting => {
                ServiceState::Starting
            }
            Transition::StartingToUp | Transition::StopRequestedToUp => ServiceState::Up,
            Transition::StartingToStartFailed => ServiceState::StartFailed,
            Transition::UpToStopRequested => ServiceState::StopRequested,
            Transition::StopRequestedToStopping => ServiceState::Stopping,
            Transition::RemovingToRemoved => ServiceState::Removed,
        }
    }
}

/// Whether a stopped controller should start.
fn should_start(st: &ControllerState) -> bool {
    match st.mode {
        ServiceMode::Active => true,
        ServiceMode::Passive => st.stopping_dependencies == 0,
        ServiceMode::OnDemand | ServiceMode::Lazy => st.demanded_by > 0,
        ServiceMode::Never | ServiceMode::Remove => false,
    }
}

/// Whether a running controller should stop.
fn should_stop(st: &ControllerState) -> bool {
    st.mode == ServiceMode::Remove
        || st.mode == ServiceMode::Never
        || (st.mode == ServiceMode::OnDemand && st.demanded_by == 0)
}

/// Identifies the next transition, or `None` when the controller may
/// quiesce where it is.
pub(crate) fn select_transition(
    st: &ControllerState,
    container_down: bool,
) -> Option<Transition> {
    match st.state {
        ServiceState::New => (!container_down).then_some(Transition::NewToDown),
        ServiceState::Down => {
            if st.mode == ServiceMode::Remove {
                Some(Transition::DownToRemoving)
            } else if should_start(st) && (st.unavailable_dependencies > 0 || st.fail_count > 0) {
                Some(Transition::DownToProblem)
            } else if should_start(st) && st.stopping_dependencies == 0 {
                Some(Transition::DownToStartRequested)
            } else {
                None
            }
        }
        ServiceState::Problem => {
            if !should_start(st) || (st.unavailable_dependencies == 0 && st.fail_count == 0) {
                Some(Transition::ProblemToDown)
            } else {
                None
            }
        }
        ServiceState::StartRequested => {
            // reached only by chaining from Down under the same lock hold,
            // so blockers cannot have appeared in between
            if should_start(st) && st.stopping_dependencies == 0 {
                debug_assert!(st.unavailable_dependencies == 0 && st.fail_count == 0);
                Some(Transition::StartRequestedToStarting)
            } else {
                Some(Transition::StartRequestedToDown)
            }
        }
        ServiceState::Starting => Some(if st.start_error.is_none() {
            Transition::StartingToUp
        } else {
            Transition::StartingToStartFailed
        }),
        ServiceState::Up => {
            if should_stop(st) || st.stopping_dependencies > 0 {
                Some(Transition::UpToStopRequested)
            } else {
                None
            }
        }
        ServiceState::StopRequested => {
            if should_start(st) && st.stopping_dependencies == 0 {
                Some(Transition::StopRequestedToUp)
            } else if st.running_dependents == 0 {
                Some(Transition::StopRequestedToStopping)
            } else {
                None
            }
        }
        ServiceState::Stopping => Some(Transition::StoppingToDown),
        ServiceState::StartFailed => {
            if should_start(st) && st.stopping_dependencies == 0 {
                if st.start_error.is_none() {
                    Some(Transition::StartFailedToStarting)
                } else {
                    None
                }
            } else if st.running_dependents == 0 {
                Some(Transition::StartFailedToDown)
            } else {
                None
            }
        }
        ServiceState::Removing => Some(Transition::RemovingToRemoved),
        ServiceState::Removed => None,
    }
}

/// Brings the demand propagated to the required links in line with the
/// current mode and incoming demand.
fn reconcile_demand(st: &mut ControllerState, tasks: &mut Vec<TaskKind>) {
    match st.mode {
        ServiceMode::Never | ServiceMode::Remove => {
            if st.dependencies_demanded {
                tasks.push(TaskKind::Undemand);
                st.dependencies_demanded = false;
            }
        }
        ServiceMode::Lazy if st.state == ServiceState::Up => {
            if !st.dependencies_demanded {
                tasks.push(TaskKind::Demand);
                st.dependencies_demanded = true;
            }
        }
        ServiceMode::Lazy | ServiceMode::OnDemand | ServiceMode::Passive => {
            if st.demanded_by > 0 && !st.dependencies_demanded {
                tasks.push(TaskKind::Demand);
                st.dependencies_demanded = true;
            } else if st.demanded_by == 0 && st.dependencies_demanded {
                tasks.push(TaskKind::Undemand);
                st.dependencies_demanded = false;
            }
        }
        ServiceMode::Active => {
            if !st.dependencies_demanded {
                tasks.push(TaskKind::Demand);
                st.dependencies_demanded = true;
            }
        }
    }
}

fn push_notice(st: &mut ControllerState, tasks: &mut Vec<TaskKind>, notice: Notice) {
    st.mark_scheduled(notice.flag());
    tasks.push(TaskKind::Notify(notice));
}

fn flush_listener_tasks(st: &mut ControllerState, tasks: &mut Vec<TaskKind>) {
    tasks.extend(
        st.pending_events
            .drain(..)
            .map(|event| TaskKind::Listener { event, only: None }),
    );
}

impl ServiceController {
    /// Runs the locked portion of a transition chain. Returns the fan-out
    /// tasks to execute outside the lock.
    pub(crate) fn plan_transitions(&self, st: &mut ControllerState) -> Vec<TaskKind> {
        if st.async_tasks != 0 {
            // no movement possible while fan-out is draining
            return Vec::new();
        }
        let mut tasks = Vec::new();
        if !st.pending_events.is_empty() {
            // listener delivery for the previous chain goes first
            flush_listener_tasks(st, &mut tasks);
            return tasks;
        }
        st.exec_flags = 0;
        let container = self.container();
        let container_down = container.as_ref().map_or(true, |c| c.is_shutdown());
        loop {
            reconcile_demand(st, &mut tasks);
            let Some(step) = select_transition(st, container_down) else {
                return tasks;
            };
            self.plan_step(step, st, &mut tasks);
            st.state = step.target();
            if !tasks.is_empty() || !st.pending_events.is_empty() {
                break;
            }
        }
        if tasks.is_empty() {
            flush_listener_tasks(st, &mut tasks);
        }
        tasks
    }

    /// Converts one transition into its fan-out tasks and side effects.
    fn plan_step(&self, step: Transition, st: &mut ControllerState, tasks: &mut Vec<TaskKind>) {
        match step {
            Transition::NewToDown => {
                push_notice(st, tasks, Notice::Available);
                st.pending_events.push(LifecycleEvent::Down);
            }
            Transition::DownToRemoving => {
                push_notice(st, tasks, Notice::Unavailable);
            }
            Transition::DownToProblem => {
                push_notice(st, tasks, Notice::Unavailable);
                if let (Some(container), Some(me)) = (self.container(), self.self_arc()) {
                    container.add_problem(me);
                }
            }
            Transition::ProblemToDown => {
                push_notice(st, tasks, Notice::Available);
                if let Some(container) = self.container() {
                    container.remove_problem(self.id());
                }
            }
            Transition::DownToStartRequested | Transition::StartRequestedToDown => {}
            Transition::StartRequestedToStarting => {
                tasks.push(TaskKind::Start { first: true });
            }
            Transition::StartingToUp => {
                push_notice(st, tasks, Notice::Started);
                st.pending_events.push(LifecycleEvent::Up);
            }
            Transition::StartingToStartFailed => {
                if let (Some(container), Some(me)) = (self.container(), self.self_arc()) {
                    container.add_failed(me);
                }
                push_notice(st, tasks, Notice::Failed);
                st.pending_events.push(LifecycleEvent::Failed);
            }
            Transition::UpToStopRequested => {
                if st.mode == ServiceMode::Lazy
                    && st.demanded_by == 0
                    && st.dependencies_demanded
                {
                    tasks.push(TaskKind::Undemand);
                    st.dependencies_demanded = false;
                }
                push_notice(st, tasks, Notice::Stopped);
            }
            Transition::StopRequestedToUp => {
                push_notice(st, tasks, Notice::Started);
            }
            Transition::StopRequestedToStopping => {
                tasks.push(TaskKind::Stop);
            }
            Transition::StoppingToDown => {
                tasks.push(TaskKind::DependentsStopped);
                st.pending_events.push(LifecycleEvent::Down);
            }
            Transition::StartFailedToStarting => {
                if let Some(container) = self.container() {
                    container.remove_failed(self.id());
                }
                push_notice(st, tasks, Notice::Retrying);
                tasks.push(TaskKind::Start { first: false });
            }
            Transition::StartFailedToDown => {
                if let Some(container) = self.container() {
                    container.remove_failed(self.id());
                }
                st.start_error = None;
                push_notice(st, tasks, Notice::Retrying);
                tasks.push(TaskKind::DependentsStopped);
                st.pending_events.push(LifecycleEvent::Down);
            }
            Transition::RemovingToRemoved => {
                tasks.push(TaskKind::Remove);
                st.pending_events.push(LifecycleEvent::Removed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ServiceMode;

    fn state(mode: ServiceMode, state: ServiceState) -> ControllerState {
        ControllerState {
            mode,
            state,
            start_error: None,
            demanded_by: 0,
            stopping_dependencies: 0,
            unavailable_dependencies: 0,
            running_dependents: 0,
            fail_count: 0,
            dependencies_demanded: false,
            async_tasks: 0,
            exec_flags: 0,
            pending_events: Vec::new(),
            shutdown_tracker: None,
        }
    }

    #[test]
    fn new_waits_out_container_shutdown() {
        let st = state(ServiceMode::Active, ServiceState::New);
        assert_eq!(select_transition(&st, false), Some(Transition::NewToDown));
        assert_eq!(select_transition(&st, true), None);
    }

    #[test]
    fn down_routes_to_problem_when_blocked() {
        let mut st = state(ServiceMode::Active, ServiceState::Down);
        st.unavailable_dependencies = 1;
        st.stopping_dependencies = 1;
        assert_eq!(select_transition(&st, false), Some(Transition::DownToProblem));

        st.unavailable_dependencies = 0;
        st.fail_count = 1;
        assert_eq!(select_transition(&st, false), Some(Transition::DownToProblem));
    }

    #[test]
    fn down_waits_for_requirements_to_come_up() {
        let mut st = state(ServiceMode::Active, ServiceState::Down);
        st.stopping_dependencies = 2;
        assert_eq!(select_transition(&st, false), None);
        st.stopping_dependencies = 0;
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::DownToStartRequested)
        );
    }

    #[test]
    fn remove_always_wins_from_down() {
        let mut st = state(ServiceMode::Remove, ServiceState::Down);
        st.unavailable_dependencies = 3;
        assert_eq!(select_transition(&st, false), Some(Transition::DownToRemoving));
    }

    #[test]
    fn on_demand_starts_only_when_demanded() {
        let mut st = state(ServiceMode::OnDemand, ServiceState::Down);
        assert_eq!(select_transition(&st, false), None);
        st.demanded_by = 1;
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::DownToStartRequested)
        );
    }

    #[test]
    fn passive_never_enters_problem() {
        let mut st = state(ServiceMode::Passive, ServiceState::Down);
        st.unavailable_dependencies = 1;
        st.stopping_dependencies = 1;
        // blocked requirements make a passive service wait, not report
        assert_eq!(select_transition(&st, false), None);
    }

    #[test]
    fn problem_clears_when_blockers_clear() {
        let mut st = state(ServiceMode::Active, ServiceState::Problem);
        st.fail_count = 1;
        assert_eq!(select_transition(&st, false), None);
        st.fail_count = 0;
        assert_eq!(select_transition(&st, false), Some(Transition::ProblemToDown));
    }

    #[test]
    fn starting_resolves_by_error_presence() {
        let mut st = state(ServiceMode::Active, ServiceState::Starting);
        assert_eq!(select_transition(&st, false), Some(Transition::StartingToUp));
        st.start_error = Some(crate::error::StartError::Panicked);
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::StartingToStartFailed)
        );
    }

    #[test]
    fn up_stops_when_requirements_leave_or_mode_says_so() {
        let mut st = state(ServiceMode::Active, ServiceState::Up);
        assert_eq!(select_transition(&st, false), None);
        st.stopping_dependencies = 1;
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::UpToStopRequested)
        );

        let mut st = state(ServiceMode::OnDemand, ServiceState::Up);
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::UpToStopRequested)
        );
        st.demanded_by = 1;
        assert_eq!(select_transition(&st, false), None);
    }

    #[test]
    fn lazy_stays_up_without_demand() {
        let st = state(ServiceMode::Lazy, ServiceState::Up);
        assert_eq!(select_transition(&st, false), None);
    }

    #[test]
    fn stop_requested_waits_for_running_dependents() {
        let mut st = state(ServiceMode::Remove, ServiceState::StopRequested);
        st.running_dependents = 2;
        assert_eq!(select_transition(&st, false), None);
        st.running_dependents = 0;
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::StopRequestedToStopping)
        );
    }

    #[test]
    fn stop_requested_can_abort_back_to_up() {
        let st = state(ServiceMode::Active, ServiceState::StopRequested);
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::StopRequestedToUp)
        );
    }

    #[test]
    fn start_failed_retries_only_with_error_cleared() {
        let mut st = state(ServiceMode::Active, ServiceState::StartFailed);
        st.start_error = Some(crate::error::StartError::Panicked);
        assert_eq!(select_transition(&st, false), None);
        st.start_error = None;
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::StartFailedToStarting)
        );
    }

    #[test]
    fn start_failed_falls_down_when_removed() {
        let mut st = state(ServiceMode::Remove, ServiceState::StartFailed);
        st.start_error = Some(crate::error::StartError::Panicked);
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::StartFailedToDown)
        );
        st.running_dependents = 1;
        assert_eq!(select_transition(&st, false), None);
    }

    #[test]
    fn removal_chain_terminates() {
        let st = state(ServiceMode::Remove, ServiceState::Removing);
        assert_eq!(
            select_transition(&st, false),
            Some(Transition::RemovingToRemoved)
        );
        let st = state(ServiceMode::Remove, ServiceState::Removed);
        assert_eq!(select_transition(&st, false), None);
    }
}
