//! # Container configuration.
//!
//! [`ContainerConfig`] carries the few knobs a container takes at
//! creation. Everything else about a container's behavior is driven by
//! the installed service definitions themselves.

/// Configuration for a [`ServiceContainer`](crate::ServiceContainer).
///
/// ## Example
/// ```no_run
/// use servisor::{ContainerConfig, ServiceContainer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut cfg = ContainerConfig::default();
/// cfg.name = Some(String::from("app"));
/// let container = ServiceContainer::with_config(cfg);
/// assert_eq!(container.name(), "app");
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name, used in logs. Defaults to a serial `anonymous-N`.
    pub name: Option<String>,
}
