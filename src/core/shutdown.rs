//! # Container termination tracking.
//!
//! Shutdown marks every provider for removal and must then report
//! completion exactly once, after the last of them reached its terminal
//! rest state. The tracker is a counted latch: one slot per live
//! controller plus one guard slot held by the shutdown walk itself, so
//! completion cannot fire while the walk is still registering
//! controllers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::container::ServiceContainer;

pub(crate) struct ShutdownTracker {
    live: AtomicUsize,
    container: Weak<ServiceContainer>,
}

impl ShutdownTracker {
    /// Creates the tracker holding its guard slot.
    pub(crate) fn new(container: Weak<ServiceContainer>) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicUsize::new(1),
            container,
        })
    }

    /// A controller registered itself for termination counting.
    pub(crate) fn controller_alive(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// A counted controller reached its terminal rest state.
    pub(crate) fn controller_died(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.complete();
        }
    }

    /// The shutdown walk finished registering controllers; releases the
    /// guard slot.
    pub(crate) fn done(&self) {
        self.controller_died();
    }

    fn complete(&self) {
        if let Some(container) = self.container.upgrade() {
            container.complete_shutdown();
        }
    }
}
