//! # The service controller.
//!
//! Owns the per-service lifecycle state and the counters summarizing the
//! surrounding graph. Everything mutable sits behind one mutex; the
//! locked sections compute (counter updates, transition selection, task
//! planning) and never execute — fan-out runs on spawned worker tasks
//! outside all locks.
//!
//! ## Rules
//! - Lock order: container install lock → registration lock → controller
//!   lock → container stability lock. Never upgraded, never reversed.
//! - A controller is *unstable* while its state is not a rest state or any
//!   of its fan-out tasks is in flight; the container counts unstable
//!   controllers for its stability waits. Every locked section computes
//!   the rest-state delta on entry/exit and pushes it to the container.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::core::container::{Executor, ServiceContainer};
use crate::core::dependency::{Dependent, Require};
use crate::core::mutex_lock;
use crate::core::registration::Registration;
use crate::core::shutdown::ShutdownTracker;
use crate::error::{InstallError, ModeError, StartError};
use crate::events::{LifecycleEvent, LifecycleListener};
use crate::mode::ServiceMode;
use crate::name::ServiceName;
use crate::service::ServiceRef;
use crate::state::ServiceState;

use super::tasks::{self, TaskKind};

static CONTROLLER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Dependent-notification execution flags.
///
/// Low byte: fan-out of this kind completed. High byte (same bit shifted
/// by 8): fan-out of this kind was scheduled in the current transition
/// cycle. Together they answer whether a late-attaching dependent must
/// still be told about a status whose fan-out is draining.
pub(crate) mod exec {
    pub(crate) const AVAILABLE: u16 = 1;
    pub(crate) const UNAVAILABLE: u16 = 1 << 1;
    pub(crate) const STARTED: u16 = 1 << 2;
    pub(crate) const STOPPED: u16 = 1 << 3;
    pub(crate) const FAILED: u16 = 1 << 4;
    pub(crate) const RETRYING: u16 = 1 << 5;
    pub(crate) const SCHEDULED_SHIFT: u16 = 8;
}

/// Mutable controller state, guarded by the controller lock.
pub(crate) struct ControllerState {
    pub(crate) mode: ServiceMode,
    pub(crate) state: ServiceState,
    /// Cause of the last start failure; cleared on leaving the failed
    /// state or by an explicit retry.
    pub(crate) start_error: Option<StartError>,
    /// Dependents currently demanding this service.
    pub(crate) demanded_by: u32,
    /// Required links whose target is not up. Initialized to the number
    /// of requirements; each link's first `up` decrements it.
    pub(crate) stopping_dependencies: u32,
    /// Required links currently reporting unavailable.
    pub(crate) unavailable_dependencies: u32,
    /// Dependents between their start and their stop.
    pub(crate) running_dependents: u32,
    /// Transitive failure counter; fan-out fires on the 0↔1 boundary.
    pub(crate) fail_count: u32,
    /// Whether demand is currently propagated to the required links.
    pub(crate) dependencies_demanded: bool,
    /// Fan-out tasks in flight. Transitions are deferred while nonzero.
    pub(crate) async_tasks: u32,
    pub(crate) exec_flags: u16,
    /// Listener events queued for delivery at the end of the current
    /// transition chain.
    pub(crate) pending_events: Vec<LifecycleEvent>,
    /// One-shot hook counting this controller into container termination.
    pub(crate) shutdown_tracker: Option<Arc<ShutdownTracker>>,
}

impl ControllerState {
    pub(crate) fn is_stable_rest(&self) -> bool {
        self.async_tasks == 0 && self.state.is_rest()
    }

    /// Notifications are counted but trigger no transitions until the
    /// installation is committed.
    pub(crate) fn ignore_notifications(&self) -> bool {
        self.state == ServiceState::New
    }

    pub(crate) fn mark_scheduled(&mut self, flag: u16) {
        self.exec_flags |= flag << exec::SCHEDULED_SHIFT;
    }

    pub(crate) fn mark_completed(&mut self, flag: u16) {
        self.exec_flags |= flag;
    }

    fn unfinished(&self, flag: u16) -> bool {
        let scheduled = self.exec_flags & (flag << exec::SCHEDULED_SHIFT) != 0;
        let completed = self.exec_flags & flag != 0;
        scheduled && !completed
    }

    fn finished(&self, flag: u16) -> bool {
        let scheduled = self.exec_flags & (flag << exec::SCHEDULED_SHIFT) != 0;
        let completed = self.exec_flags & flag != 0;
        !scheduled || completed
    }

    /// Whether a late-attaching dependent must see this controller as
    /// failed right now.
    pub(crate) fn is_failed(&self) -> bool {
        match self.state {
            ServiceState::StartFailed => self.finished(exec::FAILED),
            ServiceState::Starting | ServiceState::Down => self.unfinished(exec::RETRYING),
            _ => false,
        }
    }

    /// Whether a late-attaching dependent must see this controller as
    /// unavailable right now.
    pub(crate) fn is_unavailable(&self) -> bool {
        match self.state {
            ServiceState::New | ServiceState::Removed => true,
            ServiceState::Problem | ServiceState::Removing => self.finished(exec::UNAVAILABLE),
            ServiceState::Down | ServiceState::StartRequested => self.unfinished(exec::AVAILABLE),
            _ => false,
        }
    }

    /// Whether a late-attaching dependent must see this controller as up
    /// right now.
    pub(crate) fn is_up(&self) -> bool {
        match self.state {
            ServiceState::Up => self.finished(exec::STARTED),
            ServiceState::StopRequested => self.unfinished(exec::STOPPED),
            _ => false,
        }
    }
}

/// The engine's per-service state machine and the public handle to it.
pub struct ServiceController {
    id: u64,
    me: Weak<ServiceController>,
    container: Weak<ServiceContainer>,
    executor: Executor,
    name: Option<ServiceName>,
    pub(crate) service: ServiceRef,
    /// Required links, wired at configuration time. Immutable afterwards.
    pub(crate) requires: Vec<Require>,
    /// Registrations this controller provides into. Immutable afterwards.
    pub(crate) provides: Vec<Arc<Registration>>,
    /// How many leading `provides` registrations this installation has
    /// claimed (bound or consumed); the removal walk releases exactly
    /// these and aborts the rest.
    provides_bound: AtomicUsize,
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
    state: Mutex<ControllerState>,
}

impl ServiceController {
    pub(crate) fn new(
        container: Weak<ServiceContainer>,
        executor: Executor,
        service: ServiceRef,
        requires: Vec<Require>,
        provides: Vec<Arc<Registration>>,
        listeners: Vec<Arc<dyn LifecycleListener>>,
    ) -> Arc<Self> {
        let stopping_dependencies = requires.len() as u32;
        let name = provides.first().map(|r| r.name().clone());
        Arc::new_cyclic(|me| Self {
            id: CONTROLLER_SEQ.fetch_add(1, Ordering::Relaxed),
            me: me.clone(),
            container,
            executor,
            name,
            service,
            requires,
            provides,
            provides_bound: AtomicUsize::new(0),
            listeners: Mutex::new(listeners),
            state: Mutex::new(ControllerState {
                mode: ServiceMode::Never,
                state: ServiceState::New,
                start_error: None,
                demanded_by: 0,
                stopping_dependencies,
                unavailable_dependencies: 0,
                running_dependents: 0,
                fail_count: 0,
                dependencies_demanded: false,
                async_tasks: 0,
                exec_flags: 0,
                pending_events: Vec::new(),
                shutdown_tracker: None,
            }),
        })
    }

    // ---------------------------
    // Public API
    // ---------------------------

    /// The controller's primary name: the first value it provides, if any.
    pub fn name(&self) -> Option<&ServiceName> {
        self.name.as_ref()
    }

    /// The controller's current mode.
    pub fn mode(&self) -> ServiceMode {
        self.lock_state().mode
    }

    /// The controller's current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.lock_state().state
    }

    /// Changes the controller's mode, possibly starting or stopping the
    /// service. Setting the current mode again is a no-op. `Remove` is
    /// terminal: once removal has progressed the mode is final.
    pub fn set_mode(&self, new_mode: ServiceMode) -> Result<(), ModeError> {
        if new_mode != ServiceMode::Remove
            && self.container.upgrade().is_none_or(|c| c.is_shutdown())
        {
            return Err(ModeError::ContainerDown);
        }
        let mut result = Ok(());
        self.with_transition(|st| {
            if st.mode == new_mode {
                return false;
            }
            if st.mode == ServiceMode::Remove
                && matches!(st.state, ServiceState::Removing | ServiceState::Removed)
            {
                result = Err(ModeError::AlreadyRemoved);
                return false;
            }
            st.mode = new_mode;
            true
        });
        result
    }

    /// Names this controller requires.
    pub fn requires(&self) -> Vec<ServiceName> {
        self.requires.iter().map(|r| r.name().clone()).collect()
    }

    /// Names this controller provides.
    pub fn provides(&self) -> Vec<ServiceName> {
        self.provides.iter().map(|r| r.name().clone()).collect()
    }

    /// The required names currently unavailable. A failed provider is
    /// present, not missing.
    pub fn missing(&self) -> Vec<ServiceName> {
        self.requires
            .iter()
            .filter(|r| r.is_unavailable())
            .map(|r| r.name().clone())
            .collect()
    }

    /// Why the last start failed, if it did.
    pub fn reason(&self) -> Option<StartError> {
        self.lock_state().start_error.clone()
    }

    /// Clears a start failure and lets the selector attempt the start
    /// again. No effect unless the controller is resting in the failed
    /// state.
    pub fn retry(&self) {
        self.with_transition(|st| {
            if st.state != ServiceState::StartFailed || st.start_error.is_none() {
                return false;
            }
            st.start_error = None;
            true
        });
    }

    /// Registers a lifecycle listener. If the controller is currently at
    /// rest, the listener receives one synthetic event for that state, so
    /// subscription order cannot lose the steady state.
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        mutex_lock(&self.listeners).push(listener.clone());
        let task = {
            let mut st = self.lock_state();
            let Some(event) = st.state.rest_event() else {
                return;
            };
            let leaving = st.is_stable_rest();
            st.async_tasks += 1;
            self.update_stability(&mut st, leaving);
            TaskKind::Listener {
                event,
                only: Some(listener),
            }
        };
        self.execute(vec![task]);
    }

    /// Removes a previously registered listener.
    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) {
        mutex_lock(&self.listeners)
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    // ---------------------------
    // Shared internals
    // ---------------------------

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn self_arc(&self) -> Option<Arc<ServiceController>> {
        self.me.upgrade()
    }

    pub(crate) fn container(&self) -> Option<Arc<ServiceContainer>> {
        self.container.upgrade()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        mutex_lock(&self.state)
    }

    pub(crate) fn listeners_snapshot(&self) -> Vec<Arc<dyn LifecycleListener>> {
        mutex_lock(&self.listeners).clone()
    }

    /// A name for diagnostics: the primary name, or a placeholder for
    /// aggregation-only controllers.
    pub(crate) fn display_name(&self) -> ServiceName {
        self.name
            .clone()
            .unwrap_or_else(|| ServiceName::of("<anonymous>"))
    }

    /// The locked notify-then-transition pattern shared by every entry
    /// point: mutate under the lock, and if the closure reports a boundary
    /// was crossed, select transitions, account their tasks, update the
    /// container stability delta, then execute the tasks outside the lock.
    pub(crate) fn with_transition(&self, f: impl FnOnce(&mut ControllerState) -> bool) {
        let tasks = {
            let mut st = self.lock_state();
            let leaving = st.is_stable_rest();
            if !f(&mut st) {
                return;
            }
            let tasks = self.plan_transitions(&mut st);
            st.async_tasks += tasks.len() as u32;
            self.update_stability(&mut st, leaving);
            tasks
        };
        self.execute(tasks);
    }

    /// Epilogue of every fan-out task: drop the task from the in-flight
    /// count and give the selector a chance to move again.
    pub(crate) fn task_completed(&self) {
        self.with_transition(|st| {
            debug_assert!(st.async_tasks > 0);
            st.async_tasks = st.async_tasks.saturating_sub(1);
            true
        });
    }

    pub(crate) fn update_stability(&self, st: &mut ControllerState, leaving_rest: bool) {
        let entering_rest = st.is_stable_rest();
        if leaving_rest && !entering_rest {
            if let Some(container) = self.container.upgrade() {
                container.increment_unstable();
            }
        } else if !leaving_rest && entering_rest {
            if let Some(container) = self.container.upgrade() {
                container.decrement_unstable();
            }
            if st.state == ServiceState::Removed {
                if let Some(tracker) = st.shutdown_tracker.take() {
                    tracker.controller_died();
                }
            }
        }
    }

    pub(crate) fn execute(&self, tasks: Vec<TaskKind>) {
        if tasks.is_empty() {
            return;
        }
        let Some(me) = self.self_arc() else {
            return;
        };
        for task in tasks {
            let controller = me.clone();
            self.executor
                .spawn(async move { tasks::run(controller, task).await });
        }
    }

    // ---------------------------
    // Installation lifecycle
    // ---------------------------

    /// Binds this controller as provider into each provided registration.
    /// Runs under the container install lock so a concurrent shutdown's
    /// registry walk observes every bound provider.
    pub(crate) fn start_installation(&self) -> Result<(), InstallError> {
        let Some(me) = self.self_arc() else {
            return Err(InstallError::ContainerDown);
        };
        for (index, registration) in self.provides.iter().enumerate() {
            // the claim is consumed even when binding fails
            self.provides_bound.store(index + 1, Ordering::SeqCst);
            registration.set_provider(&me)?;
        }
        Ok(())
    }

    /// Attaches this controller as dependent to each required
    /// registration. Current provider status is replayed synchronously.
    pub(crate) fn start_configuration(&self) {
        let Some(me) = self.self_arc() else {
            return;
        };
        for require in &self.requires {
            require.attach(&me);
        }
    }

    /// Commits the installation: applies the initial mode and drives the
    /// state machine out of its pre-commit state. Serialized against
    /// shutdown so a controller cannot commit into a half-observed
    /// container: either the commit fully wins (and shutdown's walk will
    /// remove it) or shutdown wins (and the installation rolls back).
    pub(crate) fn commit_installation(&self, initial_mode: ServiceMode) -> Result<(), InstallError> {
        let Some(container) = self.container.upgrade() else {
            return Err(InstallError::ContainerDown);
        };
        let tasks = {
            let _guard = container.lock_sync();
            if container.is_shutdown() {
                return Err(InstallError::ContainerDown);
            }
            let mut st = self.lock_state();
            debug_assert_eq!(st.state, ServiceState::New);
            let leaving = st.is_stable_rest();
            st.mode = initial_mode;
            let tasks = self.plan_transitions(&mut st);
            st.async_tasks += tasks.len() as u32;
            self.update_stability(&mut st, leaving);
            tasks
        };
        self.execute(tasks);
        Ok(())
    }

    /// Rolls the installation back: forces removal and unwinds the
    /// registration claims synchronously on the installing thread.
    pub(crate) fn rollback_installation(&self) {
        {
            let mut st = self.lock_state();
            let leaving = st.is_stable_rest();
            st.mode = ServiceMode::Remove;
            st.state = ServiceState::Removed;
            st.async_tasks += 1;
            self.update_stability(&mut st, leaving);
        }
        if let Some(me) = self.self_arc() {
            tasks::run_remove(&me);
            me.task_completed();
        }
    }

    pub(crate) fn provides_bound(&self) -> usize {
        self.provides_bound.load(Ordering::SeqCst)
    }

    /// One-shot hook used during container shutdown; counts this
    /// controller until it reaches its terminal rest state.
    pub(crate) fn attach_shutdown_tracker(&self, tracker: &Arc<ShutdownTracker>) {
        let mut st = self.lock_state();
        if st.state == ServiceState::Removed && st.async_tasks == 0 {
            return; // already dead
        }
        if st.shutdown_tracker.is_some() {
            return; // register only once
        }
        st.shutdown_tracker = Some(tracker.clone());
        tracker.controller_alive();
    }

    // ---------------------------
    // Status replay toward late-attaching dependents
    // ---------------------------

    /// Replays this provider's currently visible status onto a dependent
    /// that just attached. Called under the registration write lock.
    pub(crate) fn replay_status(&self, dependent: &dyn Dependent) {
        let st = self.lock_state();
        if st.state == ServiceState::New {
            // installation not committed yet
            dependent.dependency_unavailable();
            return;
        }
        if st.is_failed() {
            dependent.dependency_failed();
        }
        if st.is_unavailable() {
            dependent.dependency_unavailable();
        }
        if st.is_up() {
            dependent.dependency_up();
        }
    }

    pub(crate) fn is_unavailable_now(&self) -> bool {
        self.lock_state().is_unavailable()
    }

    // ---------------------------
    // Demand and dependent bookkeeping (dependency direction)
    // ---------------------------

    pub(crate) fn add_demands(&self, count: u32) {
        self.with_transition(|st| {
            let previous = st.demanded_by;
            st.demanded_by += count;
            if st.ignore_notifications() {
                return false;
            }
            let not_started_lazy = st.mode == ServiceMode::Lazy && st.state != ServiceState::Up;
            previous == 0
                && (st.mode == ServiceMode::OnDemand
                    || not_started_lazy
                    || st.mode == ServiceMode::Passive)
        });
    }

    pub(crate) fn remove_demand(&self) {
        self.with_transition(|st| {
            debug_assert!(st.demanded_by > 0);
            st.demanded_by = st.demanded_by.saturating_sub(1);
            if st.ignore_notifications() {
                return false;
            }
            let not_started_lazy = st.mode == ServiceMode::Lazy && st.state != ServiceState::Up;
            st.demanded_by == 0
                && (st.mode == ServiceMode::OnDemand
                    || not_started_lazy
                    || st.mode == ServiceMode::Passive)
        });
    }

    /// Dependents coming up cannot enable any transition, so this only
    /// counts.
    pub(crate) fn dependents_started(&self, count: u32) {
        self.lock_state().running_dependents += count;
    }

    pub(crate) fn dependent_stopped(&self) {
        self.with_transition(|st| {
            debug_assert!(st.running_dependents > 0);
            st.running_dependents = st.running_dependents.saturating_sub(1);
            !st.ignore_notifications() && st.running_dependents == 0
        });
    }

    // ---------------------------
    // Start failure plumbing
    // ---------------------------

    /// Records a start failure: logs it, stores the cause, and resets the
    /// provided cells before the failure fans out.
    pub(crate) fn start_failed(&self, error: StartError) {
        tracing::error!(
            service = %self.display_name(),
            reason = %error,
            "service start failed"
        );
        self.lock_state().start_error = Some(error);
        self.uninject_provides();
    }

    /// Verifies every declared provided cell is defined after a
    /// successful start.
    pub(crate) fn check_provided_values(&self) -> Result<(), StartError> {
        for registration in &self.provides {
            if !registration.has_value() {
                return Err(StartError::MissingValue {
                    name: registration.name().clone(),
                });
            }
        }
        Ok(())
    }

    /// Resets every provided cell to undefined.
    pub(crate) fn uninject_provides(&self) {
        for registration in &self.provides {
            registration.clear_value();
        }
    }
}

impl Dependent for ServiceController {
    fn dependency_available(&self) {
        self.with_transition(|st| {
            debug_assert!(st.unavailable_dependencies > 0);
            st.unavailable_dependencies = st.unavailable_dependencies.saturating_sub(1);
            !st.ignore_notifications() && st.unavailable_dependencies == 0
        });
    }

    fn dependency_unavailable(&self) {
        self.with_transition(|st| {
            st.unavailable_dependencies += 1;
            !st.ignore_notifications() && st.unavailable_dependencies == 1
        });
    }

    fn dependency_up(&self) {
        self.with_transition(|st| {
            debug_assert!(st.stopping_dependencies > 0);
            st.stopping_dependencies = st.stopping_dependencies.saturating_sub(1);
            !st.ignore_notifications() && st.stopping_dependencies == 0
        });
    }

    fn dependency_down(&self) {
        self.with_transition(|st| {
            st.stopping_dependencies += 1;
            !st.ignore_notifications() && st.stopping_dependencies == 1
        });
    }

    fn dependency_failed(&self) {
        self.with_transition(|st| {
            st.fail_count += 1;
            !st.ignore_notifications() && st.fail_count == 1
        });
    }

    fn dependency_succeeded(&self) {
        self.with_transition(|st| {
            debug_assert!(st.fail_count > 0);
            st.fail_count = st.fail_count.saturating_sub(1);
            !st.ignore_notifications() && st.fail_count == 0
        });
    }

    fn dependent_controller(&self) -> Option<Arc<ServiceController>> {
        self.self_arc()
    }
}

impl std::fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceController")
            .field("name", &self.display_name())
            .field("state", &self.state())
            .finish()
    }
}
