//! # Fluent service definitions.
//!
//! A [`ServiceBuilder`] assembles one service definition — the values it
//! provides, the values it requires, its callbacks, its initial mode, its
//! listeners — and installs it into the container.
//!
//! ## Rules
//! - The builder is single-threaded by construction (`!Send`); passing it
//!   to another thread is a compile error.
//! - `install()` consumes the builder, so reuse after install is a compile
//!   error too.
//! - Configuration mistakes (providing a name twice, requiring a provided
//!   name, setting the mode twice, …) are latched at the offending call
//!   and surfaced by `install()`, so call chains stay fluent.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::controller::ServiceController;
use crate::core::container::ServiceContainer;
use crate::error::InstallError;
use crate::events::LifecycleListener;
use crate::mode::ServiceMode;
use crate::name::ServiceName;
use crate::service::{NullService, ServiceRef};

/// The assembled definition handed to the container.
pub(crate) struct ServiceDefinition {
    pub(crate) provides: Vec<ServiceName>,
    /// `(name, optional)` requirement pairs.
    pub(crate) requires: Vec<(ServiceName, bool)>,
    pub(crate) service: ServiceRef,
    pub(crate) mode: ServiceMode,
    pub(crate) listeners: Vec<Arc<dyn LifecycleListener>>,
}

/// Fluent builder for one service definition.
///
/// ## Example
///
/// ```no_run
/// use servisor::{FnService, ServiceContainer, ServiceMode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), servisor::InstallError> {
/// let container = ServiceContainer::new();
/// let controller = container
///     .builder()
///     .provides("db.pool")
///     .requires("config")
///     .instance(FnService::arc(
///         |ctx| async move {
///             ctx.provide("db.pool", String::from("pool"))?;
///             Ok(())
///         },
///         |_ctx| async {},
///     ))
///     .mode(ServiceMode::OnDemand)
///     .install()?;
/// # let _ = controller;
/// # Ok(())
/// # }
/// ```
pub struct ServiceBuilder {
    container: Weak<ServiceContainer>,
    provides: Vec<ServiceName>,
    requires: Vec<(ServiceName, bool)>,
    service: Option<ServiceRef>,
    mode: Option<ServiceMode>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    error: Option<InstallError>,
    /// Pins the builder to its creating thread.
    _not_send: PhantomData<*const ()>,
}

impl ServiceBuilder {
    pub(crate) fn new(container: Weak<ServiceContainer>) -> Self {
        Self {
            container,
            provides: Vec::new(),
            requires: Vec::new(),
            service: None,
            mode: None,
            listeners: Vec::new(),
            error: None,
            _not_send: PhantomData,
        }
    }

    /// Declares a required value.
    pub fn requires(mut self, name: impl Into<ServiceName>) -> Self {
        self.add_require(name.into(), false);
        self
    }

    /// Declares an optionally required value: an absent provider reads as
    /// a satisfied requirement and the value reads as `None`.
    pub fn requires_optional(mut self, name: impl Into<ServiceName>) -> Self {
        self.add_require(name.into(), true);
        self
    }

    /// Declares a provided value. The service must define it during start.
    pub fn provides(mut self, name: impl Into<ServiceName>) -> Self {
        let name = name.into();
        if self.requires.iter().any(|(n, _)| *n == name) {
            self.fail(InstallError::RequireAndProvide { name });
        } else if self.provides.contains(&name) {
            self.fail(InstallError::DuplicateProvides { name });
        } else {
            self.provides.push(name);
        }
        self
    }

    /// Sets the service callbacks. Definitions without an instance install
    /// a no-op service, useful for pure aggregation.
    pub fn instance(mut self, service: ServiceRef) -> Self {
        if self.service.is_some() {
            self.fail(InstallError::InstanceSetTwice);
        } else {
            self.service = Some(service);
        }
        self
    }

    /// Sets the initial mode. Defaults to [`ServiceMode::Active`].
    pub fn mode(mut self, mode: ServiceMode) -> Self {
        if mode == ServiceMode::Remove {
            self.fail(InstallError::InitialModeRemove);
        } else if self.mode.is_some() {
            self.fail(InstallError::ModeSetTwice);
        } else {
            self.mode = Some(mode);
        }
        self
    }

    /// Registers a lifecycle listener delivered from installation on.
    pub fn add_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Installs the definition, returning the live controller.
    pub fn install(self) -> Result<Arc<ServiceController>, InstallError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let container = self.container.upgrade().ok_or(InstallError::ContainerDown)?;
        let definition = ServiceDefinition {
            provides: self.provides,
            requires: self.requires,
            service: self.service.unwrap_or_else(|| Arc::new(NullService)),
            mode: self.mode.unwrap_or(ServiceMode::Active),
            listeners: self.listeners,
        };
        container.install(definition)
    }

    fn add_require(&mut self, name: ServiceName, optional: bool) {
        if self.provides.contains(&name) {
            self.fail(InstallError::RequireAndProvide { name });
        } else if self.requires.iter().any(|(n, _)| *n == name) {
            self.fail(InstallError::DuplicateRequire { name });
        } else {
            self.requires.push((name, optional));
        }
    }

    fn fail(&mut self, error: InstallError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
