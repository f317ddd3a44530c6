//! # Error types used by the container and service lifecycles.
//!
//! This module defines the error enums for each failure surface:
//!
//! - [`InstallError`] — configuration and installation failures, returned
//!   synchronously from `ServiceBuilder::install`.
//! - [`StartError`] — why a service `start` failed; stored on the
//!   controller and surfaced via `reason()`.
//! - [`ModeError`] — rejected mode changes.
//! - [`LifecycleError`] — misuse of a start/stop context or of the value
//!   provisioning window.
//! - [`WaitError`] — bounded stability/termination waits that ran out of
//!   time.
//!
//! All types provide `as_label()` for logs and metrics.

use std::time::Duration;

use thiserror::Error;

use crate::name::ServiceName;

/// # Errors raised while configuring or installing a service.
///
/// These are synchronous to the installer and recoverable: fix the
/// definition and install again.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum InstallError {
    /// Another installed service already provides this value.
    #[error("value '{name}' already has a provider")]
    DuplicateProvider {
        /// The contested value name.
        name: ServiceName,
    },
    /// Installing the service would close a dependency cycle.
    #[error("dependency cycle detected: {}", render_cycle(.path))]
    Cycle {
        /// The services involved, in dependency order.
        path: Vec<ServiceName>,
    },
    /// The same name appears in both `requires` and `provides`.
    #[error("cannot both require and provide '{name}'")]
    RequireAndProvide {
        /// The offending value name.
        name: ServiceName,
    },
    /// The same name was required more than once.
    #[error("value '{name}' required more than once")]
    DuplicateRequire {
        /// The repeated value name.
        name: ServiceName,
    },
    /// The same name was provided more than once by one definition.
    #[error("value '{name}' provided more than once")]
    DuplicateProvides {
        /// The repeated value name.
        name: ServiceName,
    },
    /// `mode()` was called twice on one builder.
    #[error("initial mode configured twice")]
    ModeSetTwice,
    /// `instance()` was called twice on one builder.
    #[error("service instance configured twice")]
    InstanceSetTwice,
    /// `Remove` is not a valid initial mode.
    #[error("initial mode cannot be remove")]
    InitialModeRemove,
    /// The container is shut down; nothing can be installed.
    #[error("container is down")]
    ContainerDown,
}

impl InstallError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InstallError::DuplicateProvider { .. } => "install_duplicate_provider",
            InstallError::Cycle { .. } => "install_cycle",
            InstallError::RequireAndProvide { .. } => "install_require_and_provide",
            InstallError::DuplicateRequire { .. } => "install_duplicate_require",
            InstallError::DuplicateProvides { .. } => "install_duplicate_provides",
            InstallError::ModeSetTwice => "install_mode_set_twice",
            InstallError::InstanceSetTwice => "install_instance_set_twice",
            InstallError::InitialModeRemove => "install_initial_mode_remove",
            InstallError::ContainerDown => "install_container_down",
        }
    }
}

fn render_cycle(path: &[ServiceName]) -> String {
    let mut rendered = String::new();
    for name in path {
        if !rendered.is_empty() {
            rendered.push_str(" -> ");
        }
        rendered.push_str(&name.canonical());
    }
    rendered
}

/// # Why a service start failed.
///
/// Stored as the controller's failure reason until it leaves the failed
/// state or an explicit `retry()` clears it. Propagated to dependents as a
/// failure notification.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum StartError {
    /// The service reported a failure through its start context or by
    /// returning an error.
    #[error("start failed: {reason}")]
    Failed {
        /// The reason the service gave.
        reason: String,
    },
    /// The service completed without defining a declared provided value.
    #[error("provided value '{name}' was not set during start")]
    MissingValue {
        /// The undefined value name.
        name: ServiceName,
    },
    /// The start callback panicked.
    #[error("start panicked")]
    Panicked,
}

impl StartError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::Failed { .. } => "start_failed",
            StartError::MissingValue { .. } => "start_missing_value",
            StartError::Panicked => "start_panicked",
        }
    }
}

impl From<String> for StartError {
    fn from(reason: String) -> Self {
        StartError::Failed { reason }
    }
}

impl From<&str> for StartError {
    fn from(reason: &str) -> Self {
        StartError::Failed {
            reason: reason.to_owned(),
        }
    }
}

impl From<LifecycleError> for StartError {
    fn from(error: LifecycleError) -> Self {
        StartError::Failed {
            reason: error.to_string(),
        }
    }
}

/// # Rejected controller mode changes.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ModeError {
    /// The controller's removal has already begun; its mode is final.
    #[error("service already removed")]
    AlreadyRemoved,
    /// The container is shutting down; only `Remove` is accepted.
    #[error("container is shutting down")]
    ContainerDown,
}

impl ModeError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModeError::AlreadyRemoved => "mode_already_removed",
            ModeError::ContainerDown => "mode_container_down",
        }
    }
}

/// # Misuse of a start/stop context.
///
/// The completion protocol is idempotent on its final state; these errors
/// mark the calls that would contradict it.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    /// `complete()` or `fail()` was called after the action already
    /// completed or failed.
    #[error("lifecycle action already completed")]
    AlreadyCompleted,
    /// `asynchronous()` was called twice, or after the callback returned.
    #[error("asynchronous() called twice or after return")]
    AlreadyAsynchronous,
    /// The callback returned without calling `asynchronous()`, so the
    /// context is closed to late completion.
    #[error("lifecycle context is closed")]
    Closed,
    /// The value name was not declared in `provides`.
    #[error("value '{name}' was not declared as provided")]
    UndeclaredValue {
        /// The undeclared name.
        name: ServiceName,
    },
    /// A provided value was written outside the start window.
    #[error("outside of service lifecycle method")]
    OutsideLifecycleWindow,
}

impl LifecycleError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::AlreadyCompleted => "lifecycle_already_completed",
            LifecycleError::AlreadyAsynchronous => "lifecycle_already_asynchronous",
            LifecycleError::Closed => "lifecycle_closed",
            LifecycleError::UndeclaredValue { .. } => "lifecycle_undeclared_value",
            LifecycleError::OutsideLifecycleWindow => "lifecycle_outside_window",
        }
    }
}

/// # Bounded waits that ran out of time.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum WaitError {
    /// The container did not reach stability within the timeout.
    #[error("stability wait timed out after {timeout:?}")]
    StabilityTimeout {
        /// The configured wait duration.
        timeout: Duration,
    },
    /// The container did not terminate within the timeout.
    #[error("termination wait timed out after {timeout:?}")]
    TerminationTimeout {
        /// The configured wait duration.
        timeout: Duration,
    },
}

impl WaitError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WaitError::StabilityTimeout { .. } => "wait_stability_timeout",
            WaitError::TerminationTimeout { .. } => "wait_termination_timeout",
        }
    }
}
