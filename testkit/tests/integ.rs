#![cfg(feature = "integ")]
/*!

These tests drive the local `docker` and, for the cluster test, `kind`. Run them with
`cargo test --features integ`.

!*/

use std::sync::Arc;
use std::time::Duration;
use testkit::{
    CancellationToken, Container, ContainerEngine, ContainerSpec, DockerCli, HttpService,
    KindCluster, MustSucceed, ProcessRunner, RetryPolicy, Settings,
};

const PODINFO_IMAGE: &str = "ghcr.io/stefanprodan/podinfo:6.5.4";
const PODINFO_PORT: u16 = 9898;

#[tokio::test]
async fn podinfo_lifecycle() {
    let settings = Settings::from_env().must_succeed();
    let cancel = CancellationToken::new();
    let mut podinfo = HttpService::docker(
        ContainerSpec::new(PODINFO_IMAGE, "testkit-integ-podinfo"),
        PODINFO_PORT,
        "/healthz",
        &settings,
    );
    podinfo.start(&cancel).await.must_succeed();

    let url = podinfo.url("/version").must_succeed();
    let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert!(body.contains("version"), "{}", body);

    let hostname = podinfo
        .container()
        .exec(&["hostname"])
        .await
        .must_succeed();
    assert!(!hostname.trim().is_empty());
    assert!(podinfo
        .container()
        .logs(Some(50))
        .await
        .must_succeed()
        .contains("Starting podinfo"));

    podinfo.cleanup().await.must_succeed();
    assert!(podinfo.container().id().is_none());
}

#[tokio::test]
async fn crashing_container_fails_stability() {
    let settings = Settings::from_env().must_succeed();
    let spec = ContainerSpec::new("busybox:1.36", "testkit-integ-crash")
        .env("MESSAGE", "bye");
    let mut crash = Container::docker(spec, &settings);
    // busybox exits immediately without a command.
    let err = crash.start(&CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("exited"), "{}", err);
    crash.cleanup().await.must_succeed();
}

#[tokio::test]
async fn reused_container_survives_cleanup() {
    let settings = Settings::from_env().must_succeed();
    let spec = ContainerSpec::new(PODINFO_IMAGE, "testkit-integ-reuse")
        .expose(PODINFO_PORT)
        .reuse(true);
    let cancel = CancellationToken::new();

    let mut first = Container::docker(spec.clone(), &settings)
        .with_stability_policy(RetryPolicy::new(2, Duration::from_millis(500)));
    first.start(&cancel).await.must_succeed();
    let id = first.id().unwrap();
    first.cleanup().await.must_succeed();

    let mut second = Container::docker(spec, &settings);
    second.start(&cancel).await.must_succeed();
    assert_eq!(second.id().unwrap(), id);

    second.cleanup().await.must_succeed();

    // Remove it for real so the next run starts from scratch.
    DockerCli::from_settings(Arc::new(ProcessRunner::new()), &settings)
        .remove(&id)
        .await
        .must_succeed();
}

#[tokio::test]
async fn kind_cluster_nodes_become_ready() {
    let mut cluster = KindCluster::new("testkit-integ");
    cluster
        .get_or_create(&CancellationToken::new())
        .await
        .must_succeed();
    let kubectl = cluster.kubectl().await.must_succeed();
    let nodes = kubectl.run(["get", "nodes"]).await.must_succeed();
    assert!(nodes.contains("Ready"), "{}", nodes);
    cluster.delete().await.must_succeed();
}
