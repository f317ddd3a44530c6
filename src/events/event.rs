//! # Terminal lifecycle events.
//!
//! A controller reports exactly four observable events: it came up, it went
//! down, its start failed, or it was removed. Transient states
//! (start-requested, stopping, …) are not announced; listeners see one
//! terminal event per transition chain, in the order the chains occurred.
//!
//! ## Event flow examples
//!
//! ### Eager service coming up
//! ```text
//! install → Down → [start callback] → Up
//! ```
//!
//! ### Removal
//! ```text
//! set_mode(Remove) → [stop callback if up] → Down → Removed
//! ```
//!
//! A listener registered while the controller is already resting receives
//! one synthetic event matching the current rest state, so subscription
//! order cannot lose the steady state.

/// An observable terminal lifecycle change of a service controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The service started; its provided values are defined.
    Up,
    /// The service is down (installed, stopped, or blocked on a
    /// requirement).
    Down,
    /// The last start attempt failed.
    Failed,
    /// The service was removed from the container.
    Removed,
}

impl LifecycleEvent {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleEvent::Up => "up",
            LifecycleEvent::Down => "down",
            LifecycleEvent::Failed => "failed",
            LifecycleEvent::Removed => "removed",
        }
    }
}
