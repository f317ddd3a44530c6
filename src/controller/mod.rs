//! # Per-service controllers.
//!
//! Each installed service is driven by a [`ServiceController`]: a state
//! machine fused with counters that summarize the surrounding dependency
//! graph. Neighbor notifications mutate the counters under the controller's
//! lock; crossing a 0↔1 boundary triggers transition selection, which
//! enqueues fan-out tasks; the tasks notify neighbors, which re-enter their
//! own controllers.
//!
//! ## Architecture
//! ```text
//! neighbor notification ──► counters (under lock)
//!                               │ boundary crossed?
//!                               ▼
//!                        transition selection ──► state change
//!                               │
//!                               ▼
//!                        fan-out tasks (spawned, fire-and-forget)
//!                          ├─► requirement walks (demand, started/stopped)
//!                          ├─► dependent walks (available/up/down/failed)
//!                          ├─► start/stop callback execution
//!                          └─► listener delivery (postponed to chain end)
//! ```
//!
//! ## Rules
//! - At most one transition chain per controller at a time: the selector
//!   runs only when no fan-out task of this controller is in flight.
//! - Counter notifications fan out only on the 0↔1 boundary, so each
//!   positive/negative pair of neighbor notifications produces at most one
//!   outward notification.

mod context;
mod core;
mod tasks;
mod transition;

pub use context::{StartContext, StopContext};
pub use self::core::ServiceController;
