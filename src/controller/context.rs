//! # Start and stop lifecycle contexts.
//!
//! The context is the service callback's channel back into the engine:
//! completion signalling and value plumbing.
//!
//! ## Completion protocol
//! ```text
//! start(ctx) returns Ok(())      → completed (unless asynchronous() was called)
//! start(ctx) returns Err(e)      → failed with cause e
//! ctx.asynchronous() called      → completion deferred until ctx.complete()
//!                                  or ctx.fail() — from any thread, any time
//! stop(ctx)                      → same protocol, but stops cannot fail
//! ```
//!
//! ## Rules
//! - The protocol is idempotent on its final state: completing twice, or
//!   failing after completing, is a contract violation surfaced as
//!   [`LifecycleError`].
//! - Provided values may be written only while the service is starting;
//!   writes outside that window are rejected.

use std::sync::{Arc, Mutex};

use crate::core::mutex_lock;
use crate::error::{LifecycleError, StartError};
use crate::name::ServiceName;
use crate::state::ServiceState;

use super::core::ServiceController;

const ASYNC: u8 = 1;
const CLOSED: u8 = 1 << 1;
const COMPLETED: u8 = 1 << 2;
const FAILED: u8 = 1 << 3;

/// How a returning callback left its context.
pub(crate) enum CloseOutcome {
    /// `asynchronous()` was called and no final state is set yet; the
    /// transition completes later through the context.
    Pending,
    /// The action completed successfully (explicitly or implicitly).
    Completed,
    /// The action failed through the context.
    Failed,
}

/// Shared state behind both context types.
pub(crate) struct ContextCore {
    controller: Arc<ServiceController>,
    flags: Mutex<u8>,
}

impl ContextCore {
    pub(crate) fn new(controller: Arc<ServiceController>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            flags: Mutex::new(0),
        })
    }

    pub(crate) fn controller(&self) -> &Arc<ServiceController> {
        &self.controller
    }

    /// Applies `add` to the flag word, rejecting combinations that
    /// contradict the completion protocol. Returns the updated word.
    fn set_flags(&self, add: u8) -> Result<u8, LifecycleError> {
        let mut flags = mutex_lock(&self.flags);
        if add & ASYNC != 0 && (*flags & ASYNC != 0 || *flags & CLOSED != 0) {
            return Err(LifecycleError::AlreadyAsynchronous);
        }
        if add & (COMPLETED | FAILED) != 0 && *flags & (COMPLETED | FAILED) != 0 {
            return Err(LifecycleError::AlreadyCompleted);
        }
        if add & (COMPLETED | FAILED) != 0 && *flags & CLOSED != 0 && *flags & ASYNC == 0 {
            return Err(LifecycleError::Closed);
        }
        *flags |= add;
        Ok(*flags)
    }

    /// Closes the context after a `start` callback returned normally.
    pub(crate) fn close_start(&self) -> CloseOutcome {
        let mut flags = mutex_lock(&self.flags);
        *flags |= CLOSED;
        if *flags & ASYNC != 0 && *flags & (COMPLETED | FAILED) == 0 {
            return CloseOutcome::Pending;
        }
        if *flags & (COMPLETED | FAILED) == 0 {
            *flags |= COMPLETED;
        }
        if *flags & FAILED != 0 {
            CloseOutcome::Failed
        } else {
            CloseOutcome::Completed
        }
    }

    /// Closes the context after a `stop` callback returned (or panicked,
    /// with `ok == false`). Returns true when completion is still pending
    /// on a later `complete()` call.
    pub(crate) fn close_stop(&self, ok: bool) -> bool {
        let mut flags = mutex_lock(&self.flags);
        *flags |= CLOSED;
        if ok && *flags & ASYNC != 0 {
            if *flags & COMPLETED == 0 {
                return true;
            }
        } else if *flags & COMPLETED == 0 {
            *flags |= COMPLETED;
        }
        false
    }

    /// Forces the failed terminal state, bypassing protocol validation.
    /// Used when the callback itself errored or panicked.
    pub(crate) fn force_failed(&self) {
        *mutex_lock(&self.flags) |= FAILED | CLOSED;
    }
}

/// The start lifecycle context handed to [`Service::start`](crate::Service::start).
///
/// Cloneable and sendable so asynchronous starts can complete from any
/// task or thread.
#[derive(Clone)]
pub struct StartContext {
    core: Arc<ContextCore>,
}

impl StartContext {
    pub(crate) fn new(core: Arc<ContextCore>) -> Self {
        Self { core }
    }

    /// Defers completion: the start is not finished when the callback
    /// returns, but when [`complete`](Self::complete) or
    /// [`fail`](Self::fail) is called later.
    pub fn asynchronous(&self) -> Result<(), LifecycleError> {
        self.core.set_flags(ASYNC).map(|_| ())
    }

    /// Signals successful completion of an asynchronous start.
    pub fn complete(&self) -> Result<(), LifecycleError> {
        let flags = self.core.set_flags(COMPLETED)?;
        if flags & CLOSED != 0 {
            // the worker task already returned; finish on its behalf
            let controller = self.core.controller();
            if let Err(error) = controller.check_provided_values() {
                controller.start_failed(error);
            }
            controller.task_completed();
        }
        Ok(())
    }

    /// Signals a failed start with the given cause.
    pub fn fail(&self, reason: impl Into<StartError>) -> Result<(), LifecycleError> {
        let error = reason.into();
        let flags = self.core.set_flags(FAILED)?;
        let controller = self.core.controller();
        tracing::error!(
            service = %controller.display_name(),
            reason = %error,
            "service start failed"
        );
        controller.lock_state().start_error = Some(error);
        if flags & CLOSED != 0 {
            controller.uninject_provides();
            controller.task_completed();
        }
        Ok(())
    }

    /// Defines one of the values this service declared in `provides`.
    /// Valid only while the service is starting.
    pub fn provide<V: Send + Sync + 'static>(
        &self,
        name: impl Into<ServiceName>,
        value: V,
    ) -> Result<(), LifecycleError> {
        let name = name.into();
        let controller = self.core.controller();
        let Some(registration) = controller.provides.iter().find(|r| *r.name() == name) else {
            return Err(LifecycleError::UndeclaredValue { name });
        };
        let st = controller.lock_state();
        if st.state != ServiceState::Starting {
            return Err(LifecycleError::OutsideLifecycleWindow);
        }
        registration.set_value(Arc::new(value));
        Ok(())
    }

    /// Reads a required value, if it is currently defined and not masked
    /// by an absent optional target.
    pub fn value<V: Send + Sync + 'static>(&self, name: impl Into<ServiceName>) -> Option<Arc<V>> {
        required_value(self.core.controller(), name.into())
    }
}

/// The stop lifecycle context handed to [`Service::stop`](crate::Service::stop).
#[derive(Clone)]
pub struct StopContext {
    core: Arc<ContextCore>,
}

impl StopContext {
    pub(crate) fn new(core: Arc<ContextCore>) -> Self {
        Self { core }
    }

    /// Defers completion: the stop is not finished when the callback
    /// returns, but when [`complete`](Self::complete) is called later.
    pub fn asynchronous(&self) -> Result<(), LifecycleError> {
        self.core.set_flags(ASYNC).map(|_| ())
    }

    /// Signals completion of an asynchronous stop.
    pub fn complete(&self) -> Result<(), LifecycleError> {
        let flags = self.core.set_flags(COMPLETED)?;
        if flags & CLOSED != 0 {
            let controller = self.core.controller();
            controller.uninject_provides();
            controller.task_completed();
        }
        Ok(())
    }

    /// Reads a required value, if it is currently defined and not masked
    /// by an absent optional target.
    pub fn value<V: Send + Sync + 'static>(&self, name: impl Into<ServiceName>) -> Option<Arc<V>> {
        required_value(self.core.controller(), name.into())
    }
}

fn required_value<V: Send + Sync + 'static>(
    controller: &Arc<ServiceController>,
    name: ServiceName,
) -> Option<Arc<V>> {
    let require = controller.requires.iter().find(|r| *r.name() == name)?;
    require.value()?.downcast::<V>().ok()
}
