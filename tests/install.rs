//! Installation-time behavior: configuration errors, duplicate providers,
//! cycle detection, registration reuse.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use servisor::{
    FnService, InstallError, ServiceContainer, ServiceMode, ServiceRef, ServiceState,
};

fn providing(name: &'static str) -> ServiceRef {
    FnService::arc(
        move |ctx| async move {
            ctx.provide(name, ())?;
            Ok(())
        },
        |_ctx| async {},
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn installing_a_cycle_fails_with_the_path() {
    let container = ServiceContainer::new();

    let a = container
        .builder()
        .provides("a")
        .requires("b")
        .instance(providing("a"))
        .install()
        .expect("first install");

    let error = container
        .builder()
        .provides("b")
        .requires("a")
        .instance(providing("b"))
        .install()
        .expect_err("cycle must be rejected");

    match &error {
        InstallError::Cycle { path } => assert_eq!(path.len(), 2),
        other => panic!("expected cycle, got {other:?}"),
    }

    // the rejected controller left nothing behind; the first one remains
    assert!(container.controller_of_value("b").is_none());
    assert!(container.controller_of_value("a").is_some());

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Problem);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_provider_is_rejected() {
    let container = ServiceContainer::new();

    container
        .builder()
        .provides("x")
        .instance(providing("x"))
        .install()
        .expect("first install");

    let error = container
        .builder()
        .provides("x")
        .instance(providing("x"))
        .install()
        .expect_err("second provider must be rejected");
    assert!(matches!(error, InstallError::DuplicateProvider { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_is_reused_across_lifecycles() {
    let container = ServiceContainer::new();
    let starts = Arc::new(AtomicU32::new(0));

    let service = {
        let starts = starts.clone();
        FnService::arc(
            move |ctx| {
                let starts = starts.clone();
                async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    ctx.provide("x", ())?;
                    Ok(())
                }
            },
            |_ctx| async {},
        )
    };

    let first = container
        .builder()
        .provides("x")
        .instance(service.clone())
        .install()
        .expect("first install");
    container.await_stability().await;
    assert_eq!(first.state(), ServiceState::Up);

    first.set_mode(ServiceMode::Remove).expect("remove");
    container.await_stability().await;
    assert_eq!(first.state(), ServiceState::Removed);

    // identical configuration installs again as an independent lifecycle
    let second = container
        .builder()
        .provides("x")
        .instance(service)
        .install()
        .expect("reinstall");
    container.await_stability().await;
    assert_eq!(second.state(), ServiceState::Up);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builder_rejects_conflicting_configuration() {
    let container = ServiceContainer::new();

    let error = container
        .builder()
        .requires("x")
        .provides("x")
        .install()
        .expect_err("require and provide overlap");
    assert!(matches!(error, InstallError::RequireAndProvide { .. }));

    let error = container
        .builder()
        .provides("y")
        .provides("y")
        .install()
        .expect_err("duplicate provides");
    assert!(matches!(error, InstallError::DuplicateProvides { .. }));

    let error = container
        .builder()
        .requires("z")
        .requires("z")
        .install()
        .expect_err("duplicate requires");
    assert!(matches!(error, InstallError::DuplicateRequire { .. }));

    let error = container
        .builder()
        .provides("m")
        .mode(ServiceMode::Passive)
        .mode(ServiceMode::Active)
        .install()
        .expect_err("mode set twice");
    assert!(matches!(error, InstallError::ModeSetTwice));

    let error = container
        .builder()
        .provides("r")
        .mode(ServiceMode::Remove)
        .install()
        .expect_err("initial mode remove");
    assert!(matches!(error, InstallError::InitialModeRemove));

    let error = container
        .builder()
        .provides("i")
        .instance(providing("i"))
        .instance(providing("i"))
        .install()
        .expect_err("instance set twice");
    assert!(matches!(error, InstallError::InstanceSetTwice));

    // none of the rejected definitions left registrations behind
    container.await_stability().await;
    assert!(container.controller_of_value("x").is_none());
    assert!(container.controller_of_value("y").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn install_after_shutdown_is_rejected() {
    let container = ServiceContainer::new();
    container.shutdown();

    let error = container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .install()
        .expect_err("container is down");
    assert!(matches!(error, InstallError::ContainerDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregation_groups_requirements_without_providing() {
    let container = ServiceContainer::new();

    container
        .builder()
        .provides("left")
        .instance(providing("left"))
        .mode(ServiceMode::OnDemand)
        .install()
        .expect("install left");
    container
        .builder()
        .provides("right")
        .instance(providing("right"))
        .mode(ServiceMode::OnDemand)
        .install()
        .expect("install right");

    // no provides, no instance: a pure grouping of requirements
    let group = container
        .builder()
        .requires("left")
        .requires("right")
        .install()
        .expect("install group");

    container.await_stability().await;
    assert_eq!(group.state(), ServiceState::Up);
    assert_eq!(
        container.controller_of_value("left").unwrap().state(),
        ServiceState::Up
    );
    assert_eq!(
        container.controller_of_value("right").unwrap().state(),
        ServiceState::Up
    );
}
