/*!

Lifecycle tests for [`Container`] and the workloads built on it, run against the in-memory engine
in `mock`. Timing properties use paused tokio time so they run instantly and deterministically.

!*/

mod mock;

use async_trait::async_trait;
use mock::FakeEngine;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testkit::container::ACTIVEMQ_IMAGE;
use testkit::{
    wait_until_ready, ActiveMq, ActiveMqCredentials, CancellationToken, Container, ContainerSpec,
    Error, HttpService, ReadinessProbe, RetryPolicy, Settings,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

const IMAGE: &str = "nginx:1.25";

fn container(engine: &Arc<FakeEngine>, spec: ContainerSpec) -> Container {
    Container::new(spec, engine.clone())
}

fn web_spec(reuse: bool) -> ContainerSpec {
    ContainerSpec::new(IMAGE, "web").expose(80).reuse(reuse)
}

/// A short stability window for tests that are not about stability.
fn quick() -> RetryPolicy {
    RetryPolicy::new(1, Duration::from_millis(10))
}

#[tokio::test(start_paused = true)]
async fn fresh_containers_get_distinct_ids() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let cancel = CancellationToken::new();
    let mut web = container(&engine, web_spec(false));

    web.start(&cancel).await.unwrap();
    let first = web.id().unwrap();
    assert!(engine.is_running(&first));
    web.cleanup().await.unwrap();
    assert_eq!(web.id(), None);
    assert!(!engine.exists(&first));

    web.start(&cancel).await.unwrap();
    let second = web.id().unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.creates(), 2);
    assert_eq!(engine.pulls(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_images_are_pulled() {
    let engine = Arc::new(FakeEngine::new());
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(engine.pulls(), 1);
    let calls = engine.calls();
    let pull = calls.iter().position(|c| c == "pull nginx:1.25").unwrap();
    let create = calls.iter().position(|c| c == "create web").unwrap();
    assert!(pull < create);
}

#[tokio::test(start_paused = true)]
async fn running_container_is_reused() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(IMAGE)
            .with_existing("abc123", "web", true),
    );
    let mut web = container(&engine, web_spec(true));
    web.start(&CancellationToken::new()).await.unwrap();

    assert_eq!(web.id().as_deref(), Some("abc123"));
    assert_eq!(engine.creates(), 0);
    assert!(!engine.called("start abc123"));
    assert!(web.is_running().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn stopped_container_is_reused_and_started() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(IMAGE)
            .with_existing("abc123", "web", false),
    );
    let mut web = container(&engine, web_spec(true)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(web.id().as_deref(), Some("abc123"));
    assert_eq!(engine.creates(), 0);
    assert!(engine.called("start abc123"));
}

#[tokio::test(start_paused = true)]
async fn reuse_without_a_match_creates() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(IMAGE)
            .with_existing("other", "web-old", true),
    );
    let mut web = container(&engine, web_spec(true)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(engine.creates(), 1);
    assert_ne!(web.id().as_deref(), Some("other"));
}

#[tokio::test(start_paused = true)]
async fn cleanup_keeps_reused_containers() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(IMAGE)
            .with_existing("abc123", "web", true),
    );
    let mut web = container(&engine, web_spec(true)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    web.cleanup().await.unwrap();

    assert_eq!(web.id().as_deref(), Some("abc123"));
    assert!(!web.handle().running);
    assert!(engine.exists("abc123"));
    assert!(!engine.is_running("abc123"));
    assert!(!engine.called("remove abc123"));
}

#[tokio::test(start_paused = true)]
async fn cleanup_without_a_container_does_nothing() {
    let engine = Arc::new(FakeEngine::new());
    let mut web = container(&engine, web_spec(false));
    web.cleanup().await.unwrap();
    web.stop().await.unwrap();
    assert!(!web.is_running().await.unwrap());
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_is_harmless() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    let id = web.id().unwrap();

    web.stop().await.unwrap();
    web.stop().await.unwrap();
    assert_eq!(web.id(), Some(id.clone()));
    assert!(!web.handle().running);
    assert!(engine.exists(&id));
    assert!(!engine.is_running(&id));
    let stop = format!("stop {}", id);
    assert_eq!(engine.calls().iter().filter(|c| **c == stop).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_reuse_lookup_creates() {
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(IMAGE)
            .with_existing("abc123", "web", true)
            .fail_find(),
    );
    let mut web = container(&engine, web_spec(true)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();

    assert!(engine.called("find_by_name web"));
    assert_eq!(engine.creates(), 1);
    let id = web.id().unwrap();
    assert_ne!(id, "abc123");
    assert!(engine.is_running(&id));
}

#[tokio::test(start_paused = true)]
async fn cleanup_removes_even_if_stop_fails() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).fail_stop());
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    let id = web.id().unwrap();

    web.cleanup().await.unwrap();
    assert_eq!(web.id(), None);
    assert!(!engine.exists(&id));
    let calls = engine.calls();
    let stop = calls.iter().position(|c| *c == format!("stop {}", id)).unwrap();
    let remove = calls
        .iter()
        .position(|c| *c == format!("remove {}", id))
        .unwrap();
    assert!(stop < remove);
}

#[tokio::test(start_paused = true)]
async fn port_lookup_errors() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());

    let err = web.port(80).await.unwrap_err();
    assert!(matches!(err, Error::NotStarted { .. }), "{}", err);

    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(web.port(80).await.unwrap(), 49153);
    assert_eq!(web.endpoint(80).await.unwrap(), "localhost:49153");

    let err = web.port(9999).await.unwrap_err();
    assert!(matches!(err, Error::NoPortMapping { port: 9999, .. }));
    assert!(err.to_string().contains("9999/tcp"));
    assert!(err.to_string().contains("'web'"));
}

#[tokio::test(start_paused = true)]
async fn fixed_host_ports_are_kept() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let spec = ContainerSpec::new(IMAGE, "web").port(80, 8080);
    let mut web = container(&engine, spec).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(web.port(80).await.unwrap(), 8080);
}

#[tokio::test(start_paused = true)]
async fn stability_fails_on_first_check() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).exit_after_inspects(0));
    let mut web = container(&engine, web_spec(false));
    let started = Instant::now();

    let err = web.start(&CancellationToken::new()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(500));
    match err {
        Error::ContainerExited {
            name, exit_code, ..
        } => {
            assert_eq!(name, "web");
            assert_eq!(exit_code, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    let id = web.id().unwrap();
    // Diagnostics were collected before the error was returned.
    assert!(engine.called(&format!("logs {}", id)));
    assert!(!web.handle().running);
}

#[tokio::test(start_paused = true)]
async fn stability_window_is_six_checks_over_three_seconds() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false));
    let started = Instant::now();

    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(engine.inspects(), 6);
    assert!(web.handle().running);
}

#[tokio::test(start_paused = true)]
async fn exit_during_the_window_is_caught() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).exit_after_inspects(3));
    let mut web = container(&engine, web_spec(false));
    let started = Instant::now();

    let err = web.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::ContainerExited { .. }));
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn start_failures_are_wrapped() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).fail_start());
    let mut web = container(&engine, web_spec(false));
    let err = web.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Start { .. }));
    assert!(err.to_string().contains("port is already allocated"));
    let id = web.id().unwrap();
    assert!(engine.called(&format!("logs {}", id)));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_stability_window() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        trigger.cancel();
    });
    let started = Instant::now();

    let err = web.start(&cancel).await.unwrap_err();
    assert!(err.is_cancelled(), "{}", err);
    assert!(started.elapsed() < Duration::from_millis(1200 + 500));
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_touches_nothing() {
    let engine = Arc::new(FakeEngine::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = container(&engine, web_spec(false))
        .start(&cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exec_and_logs() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());
    assert!(matches!(
        web.logs(None).await.unwrap_err(),
        Error::NotStarted { .. }
    ));
    web.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(web.exec(&["echo", "hello"]).await.unwrap(), "hello\n");
    let err = web.exec(&["nope"]).await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { code: 127, .. }));
    assert_eq!(web.logs(Some(1)).await.unwrap(), "starting");
}

#[tokio::test(start_paused = true)]
async fn is_running_notices_a_dead_container() {
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE));
    let mut web = container(&engine, web_spec(false)).with_stability_policy(quick());
    web.start(&CancellationToken::new()).await.unwrap();
    assert!(web.is_running().await.unwrap());
    engine.kill(&web.id().unwrap());
    assert!(!web.is_running().await.unwrap());
    assert!(!web.handle().running);
}

/// Never ready, counting how often it was asked.
#[derive(Default)]
struct NeverReady {
    attempts: AtomicU32,
}

#[async_trait]
impl ReadinessProbe for NeverReady {
    async fn test_connection(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        false
    }
}

#[tokio::test(start_paused = true)]
async fn readiness_budget_is_exact() {
    let probe = NeverReady::default();
    let policy = RetryPolicy::new(7, Duration::from_secs(2));
    let started = Instant::now();

    let err = wait_until_ready("broker", &policy, &CancellationToken::new(), &probe, None)
        .await
        .unwrap_err();
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 7);
    assert_eq!(started.elapsed(), Duration::from_secs(12));
    assert!(matches!(err, Error::NotReady { attempts: 7, .. }));
    assert!(err.to_string().contains('7'));
}

#[tokio::test(start_paused = true)]
async fn readiness_cancelled_within_one_tick() {
    let probe = NeverReady::default();
    let policy = RetryPolicy::new(100, Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });
    let started = Instant::now();

    let err = wait_until_ready("broker", &policy, &cancel, &probe, None)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_millis(3500));
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 3);
}

/// Answers every request with `status` and `body`.
async fn serve(status: &'static str, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    port
}

fn local_settings() -> Settings {
    Settings {
        endpoint_host: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn http_service_becomes_ready() {
    let port = serve("200 OK", "ok").await;
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).pin_port(8080, port));
    let mut service = HttpService::new(
        ContainerSpec::new(IMAGE, "api"),
        8080,
        "healthz",
        engine.clone(),
        &local_settings(),
    )
    .with_stability_policy(quick())
    .with_readiness_policy(RetryPolicy::new(5, Duration::from_millis(50)));

    assert!(service.url("/").is_err());
    service.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        service.url("/v1/items").unwrap(),
        format!("http://127.0.0.1:{}/v1/items", port)
    );
    service.cleanup().await.unwrap();
    assert!(service.url("/").is_err());
    assert_eq!(engine.creates(), 1);
}

#[tokio::test]
async fn http_service_not_ready() {
    let port = serve("503 Service Unavailable", "").await;
    let engine = Arc::new(FakeEngine::new().with_image(IMAGE).pin_port(8080, port));
    let mut service = HttpService::new(
        ContainerSpec::new(IMAGE, "api"),
        8080,
        "/healthz",
        engine.clone(),
        &local_settings(),
    )
    .with_stability_policy(quick())
    .with_readiness_policy(
        RetryPolicy::new(3, Duration::from_millis(20)).with_diagnostics_every(3),
    );

    let err = service.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { attempts: 3, .. }));
    // Dumped once when start gives up, not again for the third failed attempt.
    let id = service.container().id().unwrap();
    let logs = format!("logs {}", id);
    assert_eq!(engine.calls().iter().filter(|c| **c == logs).count(), 1);
}

const JOLOKIA_QUEUES: &str = r#"{"value": [{"objectName": "org.apache.activemq:brokerName=localhost,destinationName=orders,destinationType=Queue,type=Broker"}], "status": 200}"#;

#[tokio::test]
async fn activemq_start_and_queues() {
    let console = serve("200 OK", JOLOKIA_QUEUES).await;
    let engine = Arc::new(
        FakeEngine::new()
            .with_image(ACTIVEMQ_IMAGE)
            .pin_port(8161, console)
            .pin_port(61616, 61616)
            .pin_port(1099, 1099),
    );
    let mut broker = ActiveMq::new(
        "activemq-test",
        ActiveMqCredentials::default(),
        false,
        None,
        engine.clone(),
        &local_settings(),
    )
    .unwrap()
    .with_readiness_policy(RetryPolicy::new(3, Duration::from_millis(20)))
    .with_stability_policy(quick());

    assert!(broker.broker_url().is_err());
    broker.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(broker.broker_url().unwrap(), "tcp://127.0.0.1:61616");
    assert_eq!(
        broker.web_console_url().unwrap(),
        format!("http://127.0.0.1:{}", console)
    );
    assert_eq!(broker.jmx_port().await.unwrap(), 1099);
    assert_eq!(broker.list_queues().await.unwrap(), vec!["orders"]);

    broker.cleanup().await.unwrap();
    assert!(broker.broker_url().is_err());
    assert!(broker.container().id().is_none());
}
