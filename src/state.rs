//! # Controller lifecycle states.
//!
//! One canonical state enum covers the whole lifecycle:
//!
//! ```text
//! New (transient) → Down (rest)
//! Down → StartRequested → Starting → Up (rest)
//! Down → Problem (rest, blocked by an unavailable or failed requirement)
//! Down → Removing → Removed (rest, terminal)
//! Up → StopRequested → Stopping → Down
//! Starting → StartFailed (rest) → Down
//! ```
//!
//! ## Rules
//! - A *rest* state is one where the controller may quiesce with no pending
//!   work. Container stability means every controller rests with no fan-out
//!   tasks in flight.
//! - `New` counts as a rest state: a controller sits in `New` between
//!   construction and installation commit, and the stability accounting
//!   uses that as its baseline.

use crate::events::LifecycleEvent;

/// The lifecycle state of a service controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Being installed; not yet committed into the container.
    New,
    /// Down. Requirements are not held up on this service's behalf.
    Down,
    /// Cannot start: a requirement is unavailable or has failed. Resolves
    /// by itself when the blocker clears.
    Problem,
    /// First phase of start processing.
    StartRequested,
    /// The service `start` callback is running (or pending asynchronous
    /// completion).
    Starting,
    /// The last start attempt failed; see the controller's `reason()`.
    StartFailed,
    /// Up: the service started and its provided values are defined.
    Up,
    /// Up, but a stop has been requested; waiting for running dependents.
    StopRequested,
    /// The service `stop` callback is running.
    Stopping,
    /// Being removed from the container.
    Removing,
    /// Removed. Terminal.
    Removed,
}

impl ServiceState {
    /// Whether the controller may quiesce in this state.
    pub fn is_rest(&self) -> bool {
        matches!(
            self,
            ServiceState::New
                | ServiceState::Down
                | ServiceState::Problem
                | ServiceState::StartFailed
                | ServiceState::Up
                | ServiceState::Removed
        )
    }

    /// The lifecycle event a late-registering listener should observe for a
    /// controller resting in this state, if any.
    pub(crate) fn rest_event(&self) -> Option<LifecycleEvent> {
        match self {
            ServiceState::Down | ServiceState::Problem => Some(LifecycleEvent::Down),
            ServiceState::Up => Some(LifecycleEvent::Up),
            ServiceState::StartFailed => Some(LifecycleEvent::Failed),
            ServiceState::Removed => Some(LifecycleEvent::Removed),
            _ => None,
        }
    }

    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceState::New => "new",
            ServiceState::Down => "down",
            ServiceState::Problem => "problem",
            ServiceState::StartRequested => "start_requested",
            ServiceState::Starting => "starting",
            ServiceState::StartFailed => "start_failed",
            ServiceState::Up => "up",
            ServiceState::StopRequested => "stop_requested",
            ServiceState::Stopping => "stopping",
            ServiceState::Removing => "removing",
            ServiceState::Removed => "removed",
        }
    }
}
