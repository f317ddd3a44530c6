//! # Lifecycle listeners.
//!
//! [`LifecycleListener`] is the callback surface for observing terminal
//! lifecycle events. Listeners are registered on a builder (delivered from
//! install), on a live controller (delivered from the current rest state
//! onward), or container-wide (attached to every subsequent install).
//!
//! ## Rules
//! - Callbacks are synchronous and run on a worker task after the
//!   transition's state-machine fan-out has drained. Keep them short; hand
//!   real work to your own executor.
//! - A panicking listener is logged and does not disturb the lifecycle.

use std::sync::Arc;

use crate::controller::ServiceController;
use crate::events::LifecycleEvent;

/// Observer of terminal lifecycle events.
pub trait LifecycleListener: Send + Sync + 'static {
    /// Called once per terminal event on the given controller.
    fn handle_event(&self, controller: &Arc<ServiceController>, event: LifecycleEvent);
}

impl<F> LifecycleListener for F
where
    F: Fn(&Arc<ServiceController>, LifecycleEvent) + Send + Sync + 'static,
{
    fn handle_event(&self, controller: &Arc<ServiceController>, event: LifecycleEvent) {
        self(controller, event)
    }
}

/// Tracing-backed logging listener.
///
/// Emits one `info!` line per terminal event, keyed by the controller's
/// primary name. Useful for development and demos; implement a custom
/// [`LifecycleListener`] for structured integration.
pub struct LogListener;

impl LifecycleListener for LogListener {
    fn handle_event(&self, controller: &Arc<ServiceController>, event: LifecycleEvent) {
        let name = controller
            .name()
            .map(|n| n.canonical())
            .unwrap_or_else(|| String::from("<anonymous>"));
        match event {
            LifecycleEvent::Failed => {
                let reason = controller
                    .reason()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                tracing::info!(service = %name, event = event.as_label(), %reason, "service lifecycle");
            }
            _ => {
                tracing::info!(service = %name, event = event.as_label(), "service lifecycle");
            }
        }
    }
}
