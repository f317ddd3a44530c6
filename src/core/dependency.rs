//! # Dependency edges.
//!
//! A controller's requirements are [`Require`] links to registrations. Two
//! variants exist:
//!
//! - **Direct**: the controller itself sits in the registration's dependent
//!   set and receives availability and up/down notifications verbatim.
//! - **Optional**: an [`OptionalLink`] bridge sits between them and re-maps
//!   availability into up/down — an absent target reads to the dependent as
//!   a satisfied requirement, and a target that appears reads as a
//!   requirement that went down and must come up before the dependent can
//!   use it.
//!
//! ## Rules
//! - Demand and started-dependent traffic flows dependent → registration
//!   unchanged through both variants.
//! - The optional bridge masks the target's value while the target is
//!   absent: `value()` reads `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::controller::ServiceController;
use crate::core::mutex_lock;
use crate::core::registration::{Registration, SharedValue};
use crate::name::ServiceName;

/// Receiver side of dependency notifications.
///
/// Implemented by [`ServiceController`] (counters + transitions) and by
/// [`OptionalLink`] (the re-mapping bridge).
pub(crate) trait Dependent: Send + Sync {
    /// A provider for the required name is present and visible.
    fn dependency_available(&self);
    /// No committed provider is visible for the required name.
    fn dependency_unavailable(&self);
    /// The required value's provider reached UP.
    fn dependency_up(&self);
    /// The required value's provider left UP.
    fn dependency_down(&self);
    /// The provider's failure count crossed 0 to 1.
    fn dependency_failed(&self);
    /// The provider's failure count crossed 1 to 0.
    fn dependency_succeeded(&self);
    /// The controller ultimately behind this dependent, if still present.
    fn dependent_controller(&self) -> Option<Arc<ServiceController>>;
}

/// One requirement edge of a controller.
#[derive(Clone)]
pub(crate) enum Require {
    Direct(Arc<Registration>),
    Optional(Arc<OptionalLink>),
}

impl Require {
    pub(crate) fn direct(registration: Arc<Registration>) -> Self {
        Require::Direct(registration)
    }

    pub(crate) fn optional(registration: Arc<Registration>) -> Self {
        Require::Optional(Arc::new(OptionalLink {
            registration,
            dependent: Mutex::new(None),
            available: AtomicBool::new(true),
        }))
    }

    pub(crate) fn registration(&self) -> &Arc<Registration> {
        match self {
            Require::Direct(registration) => registration,
            Require::Optional(link) => &link.registration,
        }
    }

    pub(crate) fn name(&self) -> &ServiceName {
        self.registration().name()
    }

    /// The object that sits in the registration's dependent set for this
    /// link: the controller itself, or the optional bridge.
    pub(crate) fn dependent_obj(&self, controller: &Arc<ServiceController>) -> Arc<dyn Dependent> {
        match self {
            Require::Direct(_) => controller.clone(),
            Require::Optional(link) => link.clone(),
        }
    }

    /// Wires this link into its registration on behalf of `controller`.
    pub(crate) fn attach(&self, controller: &Arc<ServiceController>) {
        if let Require::Optional(link) = self {
            *mutex_lock(&link.dependent) = Some(Arc::downgrade(controller));
        }
        self.registration()
            .add_dependent(self.dependent_obj(controller));
    }

    /// Unwires this link. Returns whether the registration became removed.
    pub(crate) fn detach(&self, controller: &Arc<ServiceController>) -> bool {
        let obj = self.dependent_obj(controller);
        if let Require::Optional(link) = self {
            *mutex_lock(&link.dependent) = None;
        }
        self.registration().remove_dependent(&obj)
    }

    /// Rollback variant of [`detach`](Self::detach): also handles links
    /// that were never attached.
    pub(crate) fn detach_or_abort(&self, controller: &Arc<ServiceController>) -> bool {
        let obj = self.dependent_obj(controller);
        if let Require::Optional(link) = self {
            *mutex_lock(&link.dependent) = None;
        }
        self.registration().remove_dependent_or_abort(&obj)
    }

    pub(crate) fn add_demand(&self) {
        self.registration().add_demand();
    }

    pub(crate) fn remove_demand(&self) {
        self.registration().remove_demand();
    }

    pub(crate) fn dependent_started(&self) {
        self.registration().dependent_started();
    }

    pub(crate) fn dependent_stopped(&self) {
        self.registration().dependent_stopped();
    }

    /// The required value, if currently defined and not masked.
    pub(crate) fn value(&self) -> Option<SharedValue> {
        match self {
            Require::Direct(registration) => registration.get_value(),
            Require::Optional(link) => {
                if link.available.load(Ordering::SeqCst) {
                    link.registration.get_value()
                } else {
                    None
                }
            }
        }
    }

    /// Whether this requirement currently reads as unavailable.
    pub(crate) fn is_unavailable(&self) -> bool {
        match self.registration().provider() {
            None => true,
            Some(provider) => provider.is_unavailable_now(),
        }
    }
}

/// Bridge between an optional dependent and its target registration.
///
/// Re-maps availability so that a missing target is equivalent to a
/// satisfied requirement: `unavailable` forwards as `up`, `available`
/// forwards as `down` (the dependent must now wait for the target to
/// actually start).
pub(crate) struct OptionalLink {
    registration: Arc<Registration>,
    dependent: Mutex<Option<Weak<ServiceController>>>,
    available: AtomicBool,
}

impl OptionalLink {
    fn forward(&self) -> Option<Arc<ServiceController>> {
        mutex_lock(&self.dependent)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl Dependent for OptionalLink {
    fn dependency_available(&self) {
        self.available.store(true, Ordering::SeqCst);
        if let Some(dependent) = self.forward() {
            dependent.dependency_down();
        }
    }

    fn dependency_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
        if let Some(dependent) = self.forward() {
            dependent.dependency_up();
        }
    }

    fn dependency_up(&self) {
        if let Some(dependent) = self.forward() {
            dependent.dependency_up();
        }
    }

    fn dependency_down(&self) {
        if let Some(dependent) = self.forward() {
            dependent.dependency_down();
        }
    }

    fn dependency_failed(&self) {
        if let Some(dependent) = self.forward() {
            dependent.dependency_failed();
        }
    }

    fn dependency_succeeded(&self) {
        if let Some(dependent) = self.forward() {
            dependent.dependency_succeeded();
        }
    }

    fn dependent_controller(&self) -> Option<Arc<ServiceController>> {
        self.forward()
    }
}
