//! # Service abstraction.
//!
//! A [`Service`] is the user-supplied pair of lifecycle callbacks driven by
//! the container: `start` brings the service up and defines its provided
//! values, `stop` releases whatever `start` acquired.
//!
//! - **[`Service`]** — trait for implementing lifecycle callbacks
//! - **[`ServiceRef`]** — shared handle (`Arc<dyn Service>`)
//! - **[`FnService`]** — closure-backed implementation for simple services
//!
//! ## Rules
//! - Callbacks run on a worker task, outside every container lock. They may
//!   block the task for as long as they need.
//! - `start` must define every value the service declared in `provides`
//!   (via [`StartContext::provide`](crate::StartContext::provide)) before
//!   completing, or the start is treated as failed.
//! - Completion is implicit on return unless the context's
//!   `asynchronous()` was called; see [`StartContext`](crate::StartContext).
//! - `stop` cannot fail: an error there is logged and the stop proceeds.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::controller::{StartContext, StopContext};
use crate::error::StartError;

/// Boxed future returned by [`Service::start`].
pub type BoxStartFuture = Pin<Box<dyn Future<Output = Result<(), StartError>> + Send + 'static>>;

/// Boxed future returned by [`Service::stop`].
pub type BoxStopFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Shared handle to a service object.
pub type ServiceRef = Arc<dyn Service>;

/// A unit of functionality with `start` and `stop` lifecycle callbacks.
///
/// ## Example
///
/// ```rust
/// use servisor::{BoxStartFuture, BoxStopFuture, Service, StartContext, StopContext};
///
/// struct Greeter;
///
/// impl Service for Greeter {
///     fn start(&self, ctx: StartContext) -> BoxStartFuture {
///         Box::pin(async move {
///             ctx.provide("greeting", String::from("hello"))?;
///             Ok(())
///         })
///     }
///
///     fn stop(&self, _ctx: StopContext) -> BoxStopFuture {
///         Box::pin(async {})
///     }
/// }
/// ```
pub trait Service: Send + Sync + 'static {
    /// Starts the service.
    ///
    /// Returning `Ok(())` completes the start (unless `asynchronous()` was
    /// called on the context); returning an error fails it, and the error
    /// becomes the controller's failure reason.
    fn start(&self, ctx: StartContext) -> BoxStartFuture;

    /// Stops the service and releases the resources `start` acquired.
    ///
    /// Stops cannot fail; a panic here is logged and the lifecycle
    /// proceeds as if the stop succeeded.
    fn stop(&self, ctx: StopContext) -> BoxStopFuture;
}

/// Closure-backed [`Service`] implementation.
///
/// ## Example
///
/// ```rust
/// use servisor::FnService;
///
/// let service = FnService::arc(
///     |ctx| async move {
///         ctx.provide("answer", 42u32)?;
///         Ok(())
///     },
///     |_ctx| async {},
/// );
/// # let _ = service;
/// ```
pub struct FnService<S, T> {
    start: S,
    stop: T,
}

impl<S, SF, T, TF> FnService<S, T>
where
    S: Fn(StartContext) -> SF + Send + Sync + 'static,
    SF: Future<Output = Result<(), StartError>> + Send + 'static,
    T: Fn(StopContext) -> TF + Send + Sync + 'static,
    TF: Future<Output = ()> + Send + 'static,
{
    /// Creates a service from a start and a stop closure.
    pub fn new(start: S, stop: T) -> Self {
        Self { start, stop }
    }

    /// Creates a shared service handle from a start and a stop closure.
    pub fn arc(start: S, stop: T) -> ServiceRef {
        Arc::new(Self::new(start, stop))
    }
}

impl<S, SF, T, TF> Service for FnService<S, T>
where
    S: Fn(StartContext) -> SF + Send + Sync + 'static,
    SF: Future<Output = Result<(), StartError>> + Send + 'static,
    T: Fn(StopContext) -> TF + Send + Sync + 'static,
    TF: Future<Output = ()> + Send + 'static,
{
    fn start(&self, ctx: StartContext) -> BoxStartFuture {
        Box::pin((self.start)(ctx))
    }

    fn stop(&self, ctx: StopContext) -> BoxStopFuture {
        Box::pin((self.stop)(ctx))
    }
}

/// Service used for definitions installed without an instance; starts and
/// stops by doing nothing. Useful for aggregation-only definitions.
pub(crate) struct NullService;

impl Service for NullService {
    fn start(&self, _ctx: StartContext) -> BoxStartFuture {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self, _ctx: StopContext) -> BoxStopFuture {
        Box::pin(async {})
    }
}
