//! # ServiceContainer: registry, installation, stability, shutdown.
//!
//! The container owns the name → registration map and orchestrates every
//! service controller living in it.
//!
//! ## Architecture
//! ```text
//! ServiceBuilder ──► install()
//!                      ├─► get-or-create registrations (provides + requires)
//!                      ├─► construct controller
//!                      ├─► bind providers        (under the install lock)
//!                      ├─► attach as dependent   (status replayed)
//!                      ├─► cycle detection
//!                      └─► commit → state machine leaves its pre-commit state
//!
//! shutdown() ──► mark down ──► every provider: tracker + mode Remove
//!                                   │
//!                                   ▼  last provider removed
//!                         termination token cancelled
//! ```
//!
//! ## Rules
//! - Providers are bound under the install lock; shutdown flips the down
//!   flag under the same lock before walking the registry, so the walk
//!   observes every bound provider.
//! - Stability = zero unstable controllers. The count is published on a
//!   watch channel; waiters block on it, then snapshot the failed and
//!   problem sets under the stability lock.
//! - Shutdown is monotonic and never errors; installing or starting
//!   anything afterwards is rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ContainerConfig;
use crate::controller::ServiceController;
use crate::core::builder::{ServiceBuilder, ServiceDefinition};
use crate::core::cycle::detect_cycle;
use crate::core::dependency::Require;
use crate::core::mutex_lock;
use crate::core::registration::Registration;
use crate::core::shutdown::ShutdownTracker;
use crate::error::{InstallError, WaitError};
use crate::events::LifecycleListener;
use crate::mode::ServiceMode;
use crate::name::ServiceName;

static CONTAINER_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Spawns fan-out tasks onto the ambient Tokio runtime. The runtime is
/// captured at container creation and outlives the container.
#[derive(Clone)]
pub(crate) struct Executor {
    handle: tokio::runtime::Handle,
}

impl Executor {
    fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

struct StabilityState {
    unstable: usize,
    failed: HashMap<u64, Arc<ServiceController>>,
    problems: HashMap<u64, Arc<ServiceController>>,
}

/// Snapshot returned by the stability waits: the controllers resting in
/// the failed state and those blocked in the problem state.
#[derive(Default)]
pub struct StabilityReport {
    /// Controllers whose last start failed.
    pub failed: Vec<Arc<ServiceController>>,
    /// Controllers blocked by an unavailable or failed requirement.
    pub problems: Vec<Arc<ServiceController>>,
}

/// The modular service container.
///
/// Must be created within a Tokio runtime; its fan-out work runs as
/// spawned tasks on that runtime.
///
/// ## Example
///
/// ```no_run
/// use servisor::{FnService, ServiceContainer, ServiceMode};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let container = ServiceContainer::new();
///
///     let controller = container
///         .builder()
///         .provides("greeting")
///         .instance(FnService::arc(
///             |ctx| async move {
///                 ctx.provide("greeting", String::from("hello"))?;
///                 Ok(())
///             },
///             |_ctx| async {},
///         ))
///         .mode(ServiceMode::Active)
///         .install()
///         .expect("install");
///
///     container.await_stability().await;
///     assert_eq!(controller.state(), servisor::ServiceState::Up);
///
///     container.shutdown();
///     container.await_termination().await;
/// }
/// ```
pub struct ServiceContainer {
    me: Weak<ServiceContainer>,
    name: String,
    registry: DashMap<ServiceName, Arc<Registration>>,
    /// Serializes provider binding against the shutdown registry walk.
    sync: Mutex<()>,
    down: AtomicBool,
    stability: Mutex<StabilityState>,
    stability_tx: watch::Sender<usize>,
    terminated: CancellationToken,
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
    executor: Executor,
}

impl ServiceContainer {
    /// Creates an anonymous container on the current Tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_config(ContainerConfig::default())
    }

    /// Creates a container with the given configuration.
    pub fn with_config(config: ContainerConfig) -> Arc<Self> {
        let name = config.name.unwrap_or_else(|| {
            format!("anonymous-{}", CONTAINER_SERIAL.fetch_add(1, Ordering::Relaxed))
        });
        let (stability_tx, _) = watch::channel(0usize);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            name,
            registry: DashMap::new(),
            sync: Mutex::new(()),
            down: AtomicBool::new(false),
            stability: Mutex::new(StabilityState {
                unstable: 0,
                failed: HashMap::new(),
                problems: HashMap::new(),
            }),
            stability_tx,
            terminated: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            executor: Executor::current(),
        })
    }

    /// The container's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a service definition against this container.
    pub fn builder(&self) -> ServiceBuilder {
        ServiceBuilder::new(self.me.clone())
    }

    /// Registers a container-wide lifecycle listener, attached to every
    /// service installed from this point on.
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        mutex_lock(&self.listeners).push(listener);
    }

    /// The controller currently providing `name`, if any.
    pub fn controller_of_value(&self, name: impl Into<ServiceName>) -> Option<Arc<ServiceController>> {
        self.registry
            .get(&name.into())
            .and_then(|entry| entry.value().provider())
    }

    /// Every value name required or provided by installed services.
    pub fn value_names(&self) -> Vec<ServiceName> {
        self.registry.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    /// Whether shutdown has completed: every provider reached its
    /// terminal state.
    pub fn is_shutdown_complete(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Initiates container shutdown: every installed provider is marked
    /// for removal, in no particular order; dependency ordering is
    /// enforced by the controllers themselves. Monotonic and infallible.
    pub fn shutdown(&self) {
        {
            let _guard = mutex_lock(&self.sync);
            if self.down.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        tracing::debug!(container = %self.name, "shutting down");
        let tracker = ShutdownTracker::new(self.me.clone());
        // Walk providers and dependents: aggregation services provide
        // nothing and are reachable only through the registrations they
        // require.
        let mut targets: HashMap<u64, Arc<ServiceController>> = HashMap::new();
        for entry in self.registry.iter() {
            let registration = entry.value();
            if let Some(provider) = registration.provider() {
                targets.insert(provider.id(), provider);
            }
            for dependent in registration.lock_read().dependents.iter() {
                if let Some(controller) = dependent.dependent_controller() {
                    targets.insert(controller.id(), controller);
                }
            }
        }
        for controller in targets.into_values() {
            controller.attach_shutdown_tracker(&tracker);
            // a controller already being removed keeps its course
            let _ = controller.set_mode(ServiceMode::Remove);
        }
        tracker.done();
    }

    /// Blocks until shutdown has completed.
    pub async fn await_termination(&self) {
        self.terminated.cancelled().await;
    }

    /// Blocks until shutdown has completed, or the timeout elapses.
    pub async fn await_termination_within(&self, limit: Duration) -> Result<(), WaitError> {
        timeout(limit, self.await_termination())
            .await
            .map_err(|_| WaitError::TerminationTimeout { timeout: limit })
    }

    /// Blocks until every controller rests with no fan-out in flight,
    /// then reports the failed and problem sets.
    pub async fn await_stability(&self) -> StabilityReport {
        let mut rx = self.stability_tx.subscribe();
        loop {
            // Err means the sender dropped, which cannot outlive self
            if rx.wait_for(|unstable| *unstable == 0).await.is_err() {
                return StabilityReport::default();
            }
            let st = mutex_lock(&self.stability);
            if st.unstable == 0 {
                return StabilityReport {
                    failed: st.failed.values().cloned().collect(),
                    problems: st.problems.values().cloned().collect(),
                };
            }
        }
    }

    /// Blocks until stability, or the timeout elapses.
    pub async fn await_stability_within(
        &self,
        limit: Duration,
    ) -> Result<StabilityReport, WaitError> {
        timeout(limit, self.await_stability())
            .await
            .map_err(|_| WaitError::StabilityTimeout { timeout: limit })
    }

    // ---------------------------
    // Installation
    // ---------------------------

    pub(crate) fn install(
        &self,
        definition: ServiceDefinition,
    ) -> Result<Arc<ServiceController>, InstallError> {
        if self.is_shutdown() {
            return Err(InstallError::ContainerDown);
        }
        let provides: Vec<Arc<Registration>> = definition
            .provides
            .iter()
            .map(|name| self.get_or_create_registration(name))
            .collect();
        let requires: Vec<Require> = definition
            .requires
            .iter()
            .map(|(name, optional)| {
                let registration = self.get_or_create_registration(name);
                if *optional {
                    Require::optional(registration)
                } else {
                    Require::direct(registration)
                }
            })
            .collect();
        let mut listeners = mutex_lock(&self.listeners).clone();
        listeners.extend(definition.listeners);
        let controller = ServiceController::new(
            self.me.clone(),
            self.executor.clone(),
            definition.service,
            requires,
            provides,
            listeners,
        );

        let result = (|| {
            {
                // binding providers is the only place a registration gains
                // one; done under the install lock so a concurrent
                // shutdown's registry walk sees it
                let _guard = mutex_lock(&self.sync);
                if self.down.load(Ordering::SeqCst) {
                    return Err(InstallError::ContainerDown);
                }
                controller.start_installation()?;
            }
            controller.start_configuration();
            detect_cycle(&controller)?;
            controller.commit_installation(definition.mode)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                tracing::debug!(
                    container = %self.name,
                    service = %controller.display_name(),
                    mode = definition.mode.as_label(),
                    "service installed"
                );
                Ok(controller)
            }
            Err(error) => {
                controller.rollback_installation();
                Err(error)
            }
        }
    }

    /// Atomically gets or creates the registration for `name`, claiming it
    /// for an installation in progress. Retries past slots that were
    /// concurrently removed.
    pub(crate) fn get_or_create_registration(&self, name: &ServiceName) -> Arc<Registration> {
        loop {
            let registration = self
                .registry
                .entry(name.clone())
                .or_insert_with(|| Registration::new(name.clone()))
                .value()
                .clone();
            if registration.add_pending() {
                return registration;
            }
            self.registry
                .remove_if(name, |_, current| Arc::ptr_eq(current, &registration));
        }
    }

    /// Drops a registration that reported itself removed. Guarded by
    /// identity so a concurrently re-created slot survives.
    pub(crate) fn remove_registration(&self, registration: &Arc<Registration>) {
        self.registry
            .remove_if(registration.name(), |_, current| {
                Arc::ptr_eq(current, registration)
            });
    }

    // ---------------------------
    // Stability bookkeeping
    // ---------------------------

    pub(crate) fn increment_unstable(&self) {
        let mut st = mutex_lock(&self.stability);
        st.unstable += 1;
        self.stability_tx.send_replace(st.unstable);
    }

    pub(crate) fn decrement_unstable(&self) {
        let mut st = mutex_lock(&self.stability);
        debug_assert!(st.unstable > 0);
        st.unstable = st.unstable.saturating_sub(1);
        self.stability_tx.send_replace(st.unstable);
    }

    pub(crate) fn add_problem(&self, controller: Arc<ServiceController>) {
        let mut st = mutex_lock(&self.stability);
        st.problems.insert(controller.id(), controller);
    }

    pub(crate) fn remove_problem(&self, id: u64) {
        mutex_lock(&self.stability).problems.remove(&id);
    }

    pub(crate) fn add_failed(&self, controller: Arc<ServiceController>) {
        let mut st = mutex_lock(&self.stability);
        st.failed.insert(controller.id(), controller);
    }

    pub(crate) fn remove_failed(&self, id: u64) {
        mutex_lock(&self.stability).failed.remove(&id);
    }

    /// The install lock, shared with controller commit so installation
    /// and shutdown serialize.
    pub(crate) fn lock_sync(&self) -> std::sync::MutexGuard<'_, ()> {
        mutex_lock(&self.sync)
    }

    /// The last tracked provider reached its terminal state after
    /// shutdown; the container is terminated.
    pub(crate) fn complete_shutdown(&self) {
        tracing::debug!(container = %self.name, "shutdown complete");
        self.terminated.cancel();
    }
}
