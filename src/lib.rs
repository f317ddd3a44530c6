//! # servisor
//!
//! **Servisor** is a modular service container: an in-process
//! dependency-graph engine that accepts declarative service definitions
//! (each naming the values it *provides* and *requires*) and drives every
//! service through its lifecycle — down, starting, up, stopping, removed —
//! respecting dependency order, demand propagation, and failure
//! containment.
//!
//! ## Features
//!
//! | Area              | Description                                                        | Key types / traits                       |
//! |-------------------|--------------------------------------------------------------------|------------------------------------------|
//! | **Services**      | Define services as start/stop callbacks over named values.         | [`Service`], [`FnService`]               |
//! | **Wiring**        | Declare provided and required values; install declaratively.       | [`ServiceBuilder`], [`ServiceName`]      |
//! | **Modes**         | Eager, on-demand, lazy, passive startup policies per service.      | [`ServiceMode`]                          |
//! | **Lifecycle**     | Observe terminal events; query state, failures, missing values.    | [`ServiceController`], [`ServiceState`]  |
//! | **Listeners**     | Hook terminal lifecycle events (logging, metrics, custom).         | [`LifecycleListener`], [`LogListener`]   |
//! | **Stability**     | Wait for the whole graph to quiesce; ordered shutdown.             | [`ServiceContainer`], [`StabilityReport`]|
//! | **Errors**        | Typed errors for installation, starts, and lifecycle misuse.       | [`InstallError`], [`StartError`]         |
//!
//! ```no_run
//! use servisor::{FnService, ServiceContainer, ServiceMode, ServiceState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = ServiceContainer::new();
//!
//!     // A config service other services can require.
//!     container
//!         .builder()
//!         .provides("config")
//!         .instance(FnService::arc(
//!             |ctx| async move {
//!                 ctx.provide("config", String::from("listen=0.0.0.0:80"))?;
//!                 Ok(())
//!             },
//!             |_ctx| async {},
//!         ))
//!         .mode(ServiceMode::OnDemand)
//!         .install()?;
//!
//!     // An eager service pulling the config up on demand.
//!     let server = container
//!         .builder()
//!         .provides("server")
//!         .requires("config")
//!         .instance(FnService::arc(
//!             |ctx| async move {
//!                 let config: std::sync::Arc<String> = ctx.value("config").expect("config is up");
//!                 println!("starting with {config}");
//!                 ctx.provide("server", ())?;
//!                 Ok(())
//!             },
//!             |_ctx| async {},
//!         ))
//!         .install()?;
//!
//!     container.await_stability().await;
//!     assert_eq!(server.state(), ServiceState::Up);
//!
//!     container.shutdown();
//!     container.await_termination().await;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod controller;
mod core;
mod error;
mod events;
mod mode;
mod name;
mod service;
mod state;

// ---- Public re-exports ----

pub use config::ContainerConfig;
pub use controller::{ServiceController, StartContext, StopContext};
pub use crate::core::{ServiceBuilder, ServiceContainer, StabilityReport};
pub use error::{InstallError, LifecycleError, ModeError, StartError, WaitError};
pub use events::{LifecycleEvent, LifecycleListener, LogListener};
pub use mode::ServiceMode;
pub use name::ServiceName;
pub use service::{BoxStartFuture, BoxStopFuture, FnService, Service, ServiceRef};
pub use state::ServiceState;
