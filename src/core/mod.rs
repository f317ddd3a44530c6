//! Container core: registry, wiring, and teardown.
//!
//! This module contains the container side of the engine. The public API
//! re-exported from here is [`ServiceContainer`], [`ServiceBuilder`], and
//! [`StabilityReport`]; everything else is an internal building block the
//! container wires together.
//!
//! ## Files & responsibilities
//! - **container.rs**: public facade; owns the registry map, serializes
//!   install against shutdown, tracks stability (unstable-controller count
//!   published on a watch channel) and the failed/problem sets, signals
//!   termination through a cancellation token.
//! - **builder.rs**: fluent per-service definition; latches configuration
//!   errors and surfaces them at `install()`.
//! - **registration.rs**: the per-name slot (provider, dependents, latched
//!   demand) and the provided value cell.
//! - **dependency.rs**: requirement links (direct and optional) and the
//!   dependent-notification trait.
//! - **cycle.rs**: installation-time cycle detection over the dependent
//!   direction of the graph.
//! - **shutdown.rs**: counts providers into their terminal state and
//!   completes container termination.

pub(crate) mod container;
pub(crate) mod cycle;
pub(crate) mod dependency;
pub(crate) mod registration;
pub(crate) mod shutdown;

mod builder;

pub use builder::ServiceBuilder;
pub use container::{ServiceContainer, StabilityReport};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Poison-tolerant lock helpers: a panic while holding one of these locks is
// already contained and logged upstream; the guarded state stays coherent.

pub(crate) fn mutex_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
