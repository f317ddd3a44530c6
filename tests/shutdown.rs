//! Demand propagation and container teardown: dependents stop before
//! their dependencies, termination is observable, shutdown is monotonic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use servisor::{
    FnService, ModeError, ServiceContainer, ServiceMode, ServiceRef, ServiceState, WaitError,
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

/// A service recording its stop into a shared order log.
fn recording(name: &'static str, stops: Arc<Mutex<Vec<&'static str>>>) -> ServiceRef {
    FnService::arc(
        move |ctx| async move {
            ctx.provide(name, ())?;
            Ok(())
        },
        move |_ctx| {
            let stops = stops.clone();
            async move {
                stops.lock().unwrap().push(name);
            }
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn demand_pulls_an_on_demand_provider_up_and_back_down() {
    let container = ServiceContainer::new();

    let b = container
        .builder()
        .provides("b")
        .instance(providing("b"))
        .mode(ServiceMode::OnDemand)
        .install()
        .expect("install provider");

    container.await_stability().await;
    assert_eq!(b.state(), ServiceState::Down);

    let a = container
        .builder()
        .provides("a")
        .requires("b")
        .instance(providing("a"))
        .install()
        .expect("install demander");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Up);
    assert_eq!(b.state(), ServiceState::Up);

    // removing the demander withdraws the last demand
    a.set_mode(ServiceMode::Remove).expect("remove");
    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Removed);
    assert_eq!(b.state(), ServiceState::Down);

    container.shutdown();
    container.await_termination().await;
    assert_eq!(b.state(), ServiceState::Removed);
    assert!(container.is_shutdown_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_stops_dependents_before_dependencies() {
    let container = ServiceContainer::new();
    let stops = Arc::new(Mutex::new(Vec::new()));

    let c = container
        .builder()
        .provides("c")
        .instance(recording("c", stops.clone()))
        .install()
        .expect("install c");
    let b = container
        .builder()
        .provides("b")
        .requires("c")
        .instance(recording("b", stops.clone()))
        .install()
        .expect("install b");
    let a = container
        .builder()
        .provides("a")
        .requires("b")
        .instance(recording("a", stops.clone()))
        .install()
        .expect("install a");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Up);
    assert_eq!(b.state(), ServiceState::Up);
    assert_eq!(c.state(), ServiceState::Up);

    container.shutdown();
    container.await_termination().await;

    assert_eq!(stops.lock().unwrap().as_slice(), &["a", "b", "c"]);
    assert_eq!(a.state(), ServiceState::Removed);
    assert_eq!(b.state(), ServiceState::Removed);
    assert_eq!(c.state(), ServiceState::Removed);
    assert!(container.is_shutdown_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_reaches_aggregation_services() {
    let container = ServiceContainer::new();

    let provider = container
        .builder()
        .provides("x")
        .instance(providing("x"))
        .mode(ServiceMode::OnDemand)
        .install()
        .expect("install provider");

    // no provides: reachable only through the registration it requires
    let group = container
        .builder()
        .requires("x")
        .install()
        .expect("install group");

    container.await_stability().await;
    assert_eq!(group.state(), ServiceState::Up);
    assert_eq!(provider.state(), ServiceState::Up);

    container.shutdown();
    container
        .await_termination_within(Duration::from_secs(5))
        .await
        .expect("termination within deadline");
    assert_eq!(group.state(), ServiceState::Removed);
    assert_eq!(provider.state(), ServiceState::Removed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_is_monotonic_and_observable() {
    let container = ServiceContainer::new();
    assert!(!container.is_shutdown());

    container.shutdown();
    container.shutdown();
    assert!(container.is_shutdown());

    container
        .await_termination_within(Duration::from_secs(1))
        .await
        .expect("empty container terminates promptly");
    assert!(container.is_shutdown_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn termination_wait_times_out_while_services_run() {
    let container = ServiceContainer::new();

    container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .install()
        .expect("install");
    container.await_stability().await;

    let error = container
        .await_termination_within(Duration::from_millis(50))
        .await
        .expect_err("nothing initiated termination");
    assert!(matches!(error, WaitError::TerminationTimeout { .. }));

    container.shutdown();
    container.await_termination().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_removal_is_accepted_after_shutdown() {
    let container = ServiceContainer::new();

    let controller = container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .install()
        .expect("install");
    container.await_stability().await;

    container.shutdown();
    container.await_termination().await;

    let error = controller
        .set_mode(ServiceMode::Active)
        .expect_err("container is down");
    assert!(matches!(error, ModeError::ContainerDown));
    // re-removing what is already removed stays a no-op
    assert!(controller.set_mode(ServiceMode::Remove).is_ok());
}
