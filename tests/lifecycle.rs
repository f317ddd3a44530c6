//! Lifecycle behavior of installed services: startup ordering, problem
//! reporting, failures and retry, value plumbing, optional requirements.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use servisor::{
    FnService, LifecycleEvent, LifecycleListener, ServiceContainer, ServiceController,
    ServiceMode, ServiceRef, ServiceState, StartError,
};

/// A service providing `name` with a unit value.
fn providing(name: &'static str) -> ServiceRef {
    FnService::arc(
        move |ctx| async move {
            ctx.provide(name, ())?;
            Ok(())
        },
        |_ctx| async {},
    )
}

/// Collects lifecycle events for assertions.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl Recorder {
    fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl LifecycleListener for Recorder {
    fn handle_event(&self, _controller: &Arc<ServiceController>, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eager_service_reaches_up() {
    let container = ServiceContainer::new();
    let recorder = Arc::new(Recorder::default());

    let controller = container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .mode(ServiceMode::Active)
        .add_listener(recorder.clone())
        .install()
        .expect("install");

    let report = container.await_stability().await;
    assert_eq!(controller.state(), ServiceState::Up);
    assert_eq!(controller.provides(), vec!["a".into()]);
    assert!(controller.missing().is_empty());
    assert!(report.failed.is_empty());
    assert!(report.problems.is_empty());
    assert_eq!(
        recorder.snapshot(),
        vec![LifecycleEvent::Down, LifecycleEvent::Up]
    );

    // the provided value is visible to a dependent
    let seen = Arc::new(Mutex::new(None::<bool>));
    let seen_in_start = seen.clone();
    container
        .builder()
        .requires("a")
        .instance(FnService::arc(
            move |ctx| {
                let seen = seen_in_start.clone();
                async move {
                    *seen.lock().unwrap() = Some(ctx.value::<()>("a").is_some());
                    Ok(())
                }
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install dependent");

    container.await_stability().await;
    assert_eq!(*seen.lock().unwrap(), Some(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_requirement_blocks_in_problem() {
    let container = ServiceContainer::new();

    let a = container
        .builder()
        .provides("a")
        .requires("x")
        .instance(providing("a"))
        .install()
        .expect("install");

    let report = container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Problem);
    assert_eq!(a.missing(), vec!["x".into()]);
    assert_eq!(report.problems.len(), 1);
    assert!(report.failed.is_empty());

    // the blocker resolves itself when a provider appears
    let x = container
        .builder()
        .provides("x")
        .instance(providing("x"))
        .install()
        .expect("install provider");

    let report = container.await_stability().await;
    assert_eq!(x.state(), ServiceState::Up);
    assert_eq!(a.state(), ServiceState::Up);
    assert!(a.missing().is_empty());
    assert!(report.problems.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_requirement_is_present_not_missing() {
    let container = ServiceContainer::new();

    let b = container
        .builder()
        .provides("b")
        .instance(FnService::arc(
            |_ctx| async { Err(StartError::from("refused to start")) },
            |_ctx| async {},
        ))
        .install()
        .expect("install failing");

    let a = container
        .builder()
        .provides("a")
        .requires("b")
        .instance(providing("a"))
        .install()
        .expect("install dependent");

    let report = container.await_stability().await;
    assert_eq!(b.state(), ServiceState::StartFailed);
    assert!(matches!(b.reason(), Some(StartError::Failed { .. })));
    assert_eq!(a.state(), ServiceState::Problem);
    // b is present but failed, so nothing reads as missing
    assert!(a.missing().is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.problems.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_clears_failure_and_starts() {
    let container = ServiceContainer::new();
    let attempts = Arc::new(AtomicU32::new(0));

    let attempts_in_start = attempts.clone();
    let b = container
        .builder()
        .provides("b")
        .instance(FnService::arc(
            move |ctx| {
                let attempts = attempts_in_start.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(StartError::from("flaky"));
                    }
                    ctx.provide("b", ())?;
                    Ok(())
                }
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install");

    let a = container
        .builder()
        .provides("a")
        .requires("b")
        .instance(providing("a"))
        .install()
        .expect("install dependent");

    container.await_stability().await;
    assert_eq!(b.state(), ServiceState::StartFailed);
    assert_eq!(a.state(), ServiceState::Problem);

    b.retry();
    let report = container.await_stability().await;
    assert_eq!(b.state(), ServiceState::Up);
    assert_eq!(a.state(), ServiceState::Up);
    assert!(b.reason().is_none());
    assert!(report.failed.is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_provided_value_converts_start_to_failure() {
    let container = ServiceContainer::new();

    let controller = container
        .builder()
        .provides("a")
        .instance(FnService::arc(|_ctx| async { Ok(()) }, |_ctx| async {}))
        .install()
        .expect("install");

    container.await_stability().await;
    assert_eq!(controller.state(), ServiceState::StartFailed);
    assert!(matches!(
        controller.reason(),
        Some(StartError::MissingValue { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn asynchronous_start_completes_later() {
    let container = ServiceContainer::new();

    let controller = container
        .builder()
        .provides("slow")
        .instance(FnService::arc(
            |ctx| async move {
                ctx.asynchronous()?;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ctx.provide("slow", 7u32).expect("still starting");
                    ctx.complete().expect("first completion");
                });
                Ok(())
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install");

    let report = container
        .await_stability_within(Duration::from_secs(5))
        .await
        .expect("stable within deadline");
    assert_eq!(controller.state(), ServiceState::Up);
    assert!(report.failed.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn values_flow_between_services() {
    let container = ServiceContainer::new();
    let seen = Arc::new(Mutex::new(None::<String>));

    container
        .builder()
        .provides("config")
        .instance(FnService::arc(
            |ctx| async move {
                ctx.provide("config", String::from("listen=127.0.0.1"))?;
                Ok(())
            },
            |_ctx| async {},
        ))
        .mode(ServiceMode::OnDemand)
        .install()
        .expect("install provider");

    let seen_in_start = seen.clone();
    container
        .builder()
        .provides("server")
        .requires("config")
        .instance(FnService::arc(
            move |ctx| {
                let seen = seen_in_start.clone();
                async move {
                    let config: Arc<String> = ctx.value("config").expect("config is up");
                    *seen.lock().unwrap() = Some(config.as_str().to_owned());
                    ctx.provide("server", ())?;
                    Ok(())
                }
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install consumer");

    container.await_stability().await;
    assert_eq!(seen.lock().unwrap().as_deref(), Some("listen=127.0.0.1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn optional_requirement_masks_an_absent_provider() {
    let container = ServiceContainer::new();
    let observed = Arc::new(Mutex::new(Vec::<Option<u32>>::new()));

    let observed_in_start = observed.clone();
    let a = container
        .builder()
        .provides("a")
        .requires_optional("x")
        .instance(FnService::arc(
            move |ctx| {
                let observed = observed_in_start.clone();
                async move {
                    observed
                        .lock()
                        .unwrap()
                        .push(ctx.value::<u32>("x").map(|v| *v));
                    ctx.provide("a", ())?;
                    Ok(())
                }
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Up);
    assert_eq!(observed.lock().unwrap().as_slice(), &[None]);

    // a provider appearing bounces the dependent, which then sees the value
    container
        .builder()
        .provides("x")
        .instance(FnService::arc(
            |ctx| async move {
                ctx.provide("x", 7u32)?;
                Ok(())
            },
            |_ctx| async {},
        ))
        .install()
        .expect("install optional target");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Up);
    assert_eq!(observed.lock().unwrap().as_slice(), &[None, Some(7)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn passive_waits_down_instead_of_problem() {
    let container = ServiceContainer::new();

    let a = container
        .builder()
        .provides("a")
        .requires("x")
        .instance(providing("a"))
        .mode(ServiceMode::Passive)
        .install()
        .expect("install");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Down);

    container
        .builder()
        .provides("x")
        .instance(providing("x"))
        .install()
        .expect("install provider");

    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Up);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lazy_stays_up_after_demand_is_withdrawn() {
    let container = ServiceContainer::new();

    let b = container
        .builder()
        .provides("b")
        .instance(providing("b"))
        .mode(ServiceMode::Lazy)
        .install()
        .expect("install lazy");

    container.await_stability().await;
    // no demand yet
    assert_eq!(b.state(), ServiceState::Down);

    let a = container
        .builder()
        .requires("b")
        .instance(FnService::arc(|_ctx| async { Ok(()) }, |_ctx| async {}))
        .install()
        .expect("install demander");

    container.await_stability().await;
    assert_eq!(b.state(), ServiceState::Up);

    a.set_mode(ServiceMode::Remove).expect("remove demander");
    container.await_stability().await;
    assert_eq!(a.state(), ServiceState::Removed);
    // lazy holds its state once up, demand only governs starting
    assert_eq!(b.state(), ServiceState::Up);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_listener_receives_current_rest_state() {
    let container = ServiceContainer::new();

    let controller = container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .install()
        .expect("install");

    container.await_stability().await;
    assert_eq!(controller.state(), ServiceState::Up);

    let recorder = Arc::new(Recorder::default());
    controller.add_listener(recorder.clone());
    container.await_stability().await;
    assert_eq!(recorder.snapshot(), vec![LifecycleEvent::Up]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn set_mode_is_idempotent() {
    let container = ServiceContainer::new();

    let controller = container
        .builder()
        .provides("a")
        .instance(providing("a"))
        .install()
        .expect("install");

    container.await_stability().await;
    assert!(controller.set_mode(ServiceMode::Active).is_ok());
    assert_eq!(controller.state(), ServiceState::Up);

    controller.set_mode(ServiceMode::Never).expect("stop");
    container.await_stability().await;
    assert_eq!(controller.state(), ServiceState::Down);
}
