//! # Per-name registrations.
//!
//! A [`Registration`] is the slot behind one value name: at most one
//! provider controller, the set of dependents, and the latched demand and
//! started-dependent counts that are replayed onto a provider arriving
//! late. The provided value itself lives beside the slot and is defined
//! only while the provider is between a successful start and its stop.
//!
//! ## Rules
//! - All slot mutations happen under the registration's write lock;
//!   dependent fan-out walks hold the read lock.
//! - A registration outlives its providers: it is reused when a new
//!   provider for the same name installs, and it is marked removed only
//!   once it has no provider, no dependents, and no pending installations.
//! - Demand and started-dependent counts arriving while no provider is
//!   present are latched here and replayed in `set_provider`, so a late
//!   provider observes the same net state as if it had been first.

use std::any::Any;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::controller::ServiceController;
use crate::core::dependency::Dependent;
use crate::core::{read_lock, write_lock};
use crate::error::InstallError;
use crate::name::ServiceName;

/// A type-erased provided value.
pub(crate) type SharedValue = Arc<dyn Any + Send + Sync>;

/// The slot for a single value name.
pub(crate) struct Registration {
    name: ServiceName,
    state: RwLock<RegistrationState>,
    value: std::sync::Mutex<Option<SharedValue>>,
}

pub(crate) struct RegistrationState {
    /// The current provider, if an installed service provides this name.
    pub(crate) provider: Option<Arc<ServiceController>>,
    /// Controllers (or optional-link bridges) requiring this name.
    pub(crate) dependents: Vec<Arc<dyn Dependent>>,
    /// Demands latched for replay onto a late-arriving provider.
    demanded_by: u32,
    /// Started dependents latched for replay onto a late-arriving provider.
    dependents_started: u32,
    /// Installations currently holding this registration.
    pending_installations: u32,
    /// Permanently true once the slot has no holders left.
    removed: bool,
}

impl Registration {
    pub(crate) fn new(name: ServiceName) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: RwLock::new(RegistrationState {
                provider: None,
                dependents: Vec::new(),
                demanded_by: 0,
                dependents_started: 0,
                pending_installations: 0,
                removed: false,
            }),
            value: std::sync::Mutex::new(None),
        })
    }

    pub(crate) fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Read access for dependent fan-out walks and cycle detection.
    pub(crate) fn lock_read(&self) -> RwLockReadGuard<'_, RegistrationState> {
        read_lock(&self.state)
    }

    /// Claims the registration for an installation in progress. Fails if
    /// the slot was already removed; the caller must retry on a fresh one.
    pub(crate) fn add_pending(&self) -> bool {
        let mut st = write_lock(&self.state);
        if st.removed {
            return false;
        }
        st.pending_installations += 1;
        true
    }

    /// Releases an installation claim that will never be consumed by
    /// `set_provider` or `add_dependent`. Returns whether the slot became
    /// removed.
    pub(crate) fn abort_pending(&self) -> bool {
        let mut st = write_lock(&self.state);
        debug_assert!(st.pending_installations > 0);
        st.pending_installations -= 1;
        st.removed = st.provider.is_none()
            && st.dependents.is_empty()
            && st.pending_installations == 0;
        st.removed
    }

    /// Binds `provider` to this slot, consuming one installation claim, and
    /// replays latched demand and started-dependent counts onto it.
    pub(crate) fn set_provider(&self, provider: &Arc<ServiceController>) -> Result<(), InstallError> {
        let mut st = write_lock(&self.state);
        debug_assert!(st.pending_installations > 0);
        st.pending_installations -= 1;
        if st.provider.is_some() {
            return Err(InstallError::DuplicateProvider {
                name: self.name.clone(),
            });
        }
        st.provider = Some(provider.clone());
        if st.demanded_by > 0 {
            provider.add_demands(st.demanded_by);
        }
        if st.dependents_started > 0 {
            provider.dependents_started(st.dependents_started);
        }
        Ok(())
    }

    /// Unbinds `provider`; only the matching provider clears the slot.
    /// Returns whether the slot became removed.
    pub(crate) fn clear_provider(&self, provider: &Arc<ServiceController>) -> bool {
        let mut st = write_lock(&self.state);
        if st
            .provider
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(p, provider))
        {
            st.provider = None;
            *crate::core::mutex_lock(&self.value) = None;
            st.removed = st.dependents.is_empty() && st.pending_installations == 0;
        }
        st.removed
    }

    /// Attaches a dependent, consuming one installation claim, and replays
    /// the provider's currently visible status onto it synchronously.
    pub(crate) fn add_dependent(&self, dependent: Arc<dyn Dependent>) {
        let st = &mut *write_lock(&self.state);
        debug_assert!(st.pending_installations > 0);
        st.pending_installations -= 1;
        debug_assert!(
            !st.dependents
                .iter()
                .any(|d| dependent_ptr_eq(d, &dependent)),
            "dependent already attached to '{}'",
            self.name
        );
        st.dependents.push(dependent.clone());
        match &st.provider {
            None => dependent.dependency_unavailable(),
            Some(provider) => provider.replay_status(dependent.as_ref()),
        }
    }

    /// Detaches a dependent. Returns whether the slot became removed.
    pub(crate) fn remove_dependent(&self, dependent: &Arc<dyn Dependent>) -> bool {
        let mut st = write_lock(&self.state);
        st.dependents.retain(|d| !dependent_ptr_eq(d, dependent));
        st.removed = st.provider.is_none()
            && st.dependents.is_empty()
            && st.pending_installations == 0;
        st.removed
    }

    /// Rollback helper: detaches the dependent if it was attached,
    /// otherwise releases the unconsumed installation claim.
    pub(crate) fn remove_dependent_or_abort(&self, dependent: &Arc<dyn Dependent>) -> bool {
        let attached = {
            let st = read_lock(&self.state);
            st.dependents.iter().any(|d| dependent_ptr_eq(d, dependent))
        };
        if attached {
            self.remove_dependent(dependent)
        } else {
            self.abort_pending()
        }
    }

    pub(crate) fn provider(&self) -> Option<Arc<ServiceController>> {
        read_lock(&self.state).provider.clone()
    }

    // --- buffered forwards: latch here, forward to the provider if any ---

    pub(crate) fn add_demand(&self) {
        let st = &mut *write_lock(&self.state);
        st.demanded_by += 1;
        if let Some(provider) = &st.provider {
            provider.add_demands(1);
        }
    }

    pub(crate) fn remove_demand(&self) {
        let st = &mut *write_lock(&self.state);
        debug_assert!(st.demanded_by > 0);
        st.demanded_by -= 1;
        if let Some(provider) = &st.provider {
            provider.remove_demand();
        }
    }

    pub(crate) fn dependent_started(&self) {
        let st = &mut *write_lock(&self.state);
        st.dependents_started += 1;
        if let Some(provider) = &st.provider {
            provider.dependents_started(1);
        }
    }

    pub(crate) fn dependent_stopped(&self) {
        let st = &mut *write_lock(&self.state);
        debug_assert!(st.dependents_started > 0);
        st.dependents_started -= 1;
        if let Some(provider) = &st.provider {
            provider.dependent_stopped();
        }
    }

    // --- the value cell ---

    pub(crate) fn set_value(&self, value: SharedValue) {
        *crate::core::mutex_lock(&self.value) = Some(value);
    }

    pub(crate) fn clear_value(&self) {
        *crate::core::mutex_lock(&self.value) = None;
    }

    pub(crate) fn get_value(&self) -> Option<SharedValue> {
        crate::core::mutex_lock(&self.value).clone()
    }

    pub(crate) fn has_value(&self) -> bool {
        crate::core::mutex_lock(&self.value).is_some()
    }
}

/// Identity comparison for dependent trait objects.
fn dependent_ptr_eq(a: &Arc<dyn Dependent>, b: &Arc<dyn Dependent>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
