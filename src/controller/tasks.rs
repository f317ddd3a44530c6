//! # Fan-out task bodies.
//!
//! Every transition's outward work runs here, on spawned worker tasks,
//! outside the controller lock. Two walk directions exist:
//!
//! - **Requirement walks** take each target registration's write lock and
//!   deliver demand or started/stopped bookkeeping toward providers.
//! - **Dependent walks** take read locks on all provided registrations,
//!   deliver one notification kind to every dependent, then record the
//!   fan-out as completed in the exec flags so late-attaching dependents
//!   are answered correctly while fan-out drains.
//!
//! ## Rules
//! - A task that finishes re-enters the controller through
//!   `task_completed()`, which decrements the in-flight count and re-runs
//!   the selector. A start task whose completion was deferred by
//!   `asynchronous()` skips the epilogue; the context performs it later.
//! - User callbacks run outside all locks; their panics are contained.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::error::StartError;
use crate::events::{LifecycleEvent, LifecycleListener};

use super::context::{CloseOutcome, ContextCore, StartContext, StopContext};
use super::core::{exec, ServiceController};

/// One schedulable unit of fan-out work.
pub(crate) enum TaskKind {
    /// Raise demand on every required link.
    Demand,
    /// Withdraw demand from every required link.
    Undemand,
    /// Tell every required link this dependent stopped.
    DependentsStopped,
    /// Deliver one notification kind to every dependent.
    Notify(Notice),
    /// Run the user `start` callback. `first` also claims the
    /// started-dependent slot on every required link (a retry still holds
    /// its claims).
    Start { first: bool },
    /// Run the user `stop` callback.
    Stop,
    /// Unwind every registration binding of a removed controller.
    Remove,
    /// Deliver a lifecycle event to listeners (all, or one late joiner).
    Listener {
        event: LifecycleEvent,
        only: Option<Arc<dyn LifecycleListener>>,
    },
}

/// Notification kinds delivered by dependent walks.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Notice {
    Available,
    Unavailable,
    Started,
    Stopped,
    Failed,
    Retrying,
}

impl Notice {
    pub(crate) fn flag(self) -> u16 {
        match self {
            Notice::Available => exec::AVAILABLE,
            Notice::Unavailable => exec::UNAVAILABLE,
            Notice::Started => exec::STARTED,
            Notice::Stopped => exec::STOPPED,
            Notice::Failed => exec::FAILED,
            Notice::Retrying => exec::RETRYING,
        }
    }

    fn deliver(self, dependent: &dyn crate::core::dependency::Dependent) {
        match self {
            Notice::Available => dependent.dependency_available(),
            Notice::Unavailable => dependent.dependency_unavailable(),
            Notice::Started => dependent.dependency_up(),
            Notice::Stopped => dependent.dependency_down(),
            Notice::Failed => dependent.dependency_failed(),
            Notice::Retrying => dependent.dependency_succeeded(),
        }
    }
}

/// Executes one task and, unless completion was deferred, runs the
/// controller epilogue.
pub(crate) async fn run(controller: Arc<ServiceController>, task: TaskKind) {
    let completed = match task {
        TaskKind::Demand => {
            for require in &controller.requires {
                require.add_demand();
            }
            true
        }
        TaskKind::Undemand => {
            for require in &controller.requires {
                require.remove_demand();
            }
            true
        }
        TaskKind::DependentsStopped => {
            for require in &controller.requires {
                require.dependent_stopped();
            }
            true
        }
        TaskKind::Notify(notice) => {
            notify_dependents(&controller, notice);
            true
        }
        TaskKind::Start { first } => run_start(&controller, first).await,
        TaskKind::Stop => run_stop(&controller).await,
        TaskKind::Remove => {
            run_remove(&controller);
            true
        }
        TaskKind::Listener { event, only } => {
            run_listener(&controller, event, only);
            true
        }
    };
    if completed {
        controller.task_completed();
    }
}

/// Walks every dependent of every provided registration, all source
/// registrations read-locked for the duration of the walk.
fn notify_dependents(controller: &Arc<ServiceController>, notice: Notice) {
    let guards: Vec<_> = controller
        .provides
        .iter()
        .map(|registration| registration.lock_read())
        .collect();
    for guard in &guards {
        for dependent in &guard.dependents {
            notice.deliver(dependent.as_ref());
        }
    }
    // completion must be recorded before the source registrations unlock,
    // or a dependent attaching in the gap is answered from stale flags
    controller.lock_state().mark_completed(notice.flag());
    drop(guards);
}

async fn run_start(controller: &Arc<ServiceController>, first: bool) -> bool {
    if first {
        for require in &controller.requires {
            require.dependent_started();
        }
    }
    let core = ContextCore::new(controller.clone());
    let ctx = StartContext::new(core.clone());
    let outcome = AssertUnwindSafe(controller.service.start(ctx))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => match core.close_start() {
            CloseOutcome::Pending => false,
            CloseOutcome::Failed => {
                // the service called fail() during the callback
                controller.uninject_provides();
                true
            }
            CloseOutcome::Completed => {
                if let Err(error) = controller.check_provided_values() {
                    controller.start_failed(error);
                }
                true
            }
        },
        Ok(Err(error)) => {
            core.force_failed();
            controller.start_failed(error);
            true
        }
        Err(_panic) => {
            core.force_failed();
            controller.start_failed(StartError::Panicked);
            true
        }
    }
}

async fn run_stop(controller: &Arc<ServiceController>) -> bool {
    let core = ContextCore::new(controller.clone());
    let ctx = StopContext::new(core.clone());
    let ok = AssertUnwindSafe(controller.service.stop(ctx))
        .catch_unwind()
        .await
        .is_ok();
    if !ok {
        // stops cannot fail the lifecycle
        tracing::error!(
            service = %controller.display_name(),
            "service stop panicked; treated as stopped"
        );
    }
    if core.close_stop(ok) {
        return false;
    }
    controller.uninject_provides();
    true
}

/// Unwinds every registration binding. Also used synchronously by
/// installation rollback, where some bindings may never have been made.
pub(crate) fn run_remove(controller: &Arc<ServiceController>) {
    let container = controller.container();
    let bound = controller.provides_bound();
    for (index, registration) in controller.provides.iter().enumerate() {
        let removed = if index < bound {
            registration.clear_provider(controller)
        } else {
            registration.abort_pending()
        };
        if removed {
            if let Some(container) = &container {
                container.remove_registration(registration);
            }
        }
    }
    for require in &controller.requires {
        let removed = require.detach_or_abort(controller);
        if removed {
            if let Some(container) = &container {
                container.remove_registration(require.registration());
            }
        }
    }
}

fn run_listener(
    controller: &Arc<ServiceController>,
    event: LifecycleEvent,
    only: Option<Arc<dyn LifecycleListener>>,
) {
    let targets = match only {
        Some(listener) => vec![listener],
        None => controller.listeners_snapshot(),
    };
    for listener in targets {
        let delivery = std::panic::catch_unwind(AssertUnwindSafe(|| {
            listener.handle_event(controller, event)
        }));
        if delivery.is_err() {
            tracing::error!(
                service = %controller.display_name(),
                event = event.as_label(),
                "lifecycle listener panicked"
            );
        }
    }
}
