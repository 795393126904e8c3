use crate::config::Settings;
use crate::error::{self, Result};
use crate::kubectl::Kubectl;
use crate::poll::{wait_until_ready, ReadinessProbe, RetryPolicy};
use crate::process::{Cmd, CommandRunner, ProcessRunner};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use log::{debug, info, trace};
use snafu::ResultExt;
use std::convert::TryInto;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const KUBECONFIG_FILENAME: &str = "kubeconfig.yaml";
pub const DEFAULT_CLUSTER_NAME: &str = "kind";

/// New clusters get a minute for every node to report `Ready`.
pub const NODES_READY: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(2));

/// A [kind](https://kind.sigs.k8s.io/) cluster. Nothing happens until one of the async methods is
/// called, and the cluster is left running when the value is dropped.
#[derive(Debug)]
pub struct KindCluster {
    runner: Arc<dyn CommandRunner>,
    settings: Settings,
    name: String,
    version: String,
    kubeconfig_dir: Option<TempDir>,
    nodes_ready: RetryPolicy,
}

impl KindCluster {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::with_runner(name, Arc::new(ProcessRunner::new()), &Settings::default())
    }

    pub fn with_runner<S: Into<String>>(
        name: S,
        runner: Arc<dyn CommandRunner>,
        settings: &Settings,
    ) -> Self {
        let name = name.into();
        Self {
            runner,
            settings: settings.clone(),
            name: if name.is_empty() {
                DEFAULT_CLUSTER_NAME.to_string()
            } else {
                name
            },
            version: "latest".to_string(),
            kubeconfig_dir: None,
            nodes_ready: NODES_READY,
        }
    }

    /// Use the `kindest/node` image of Kubernetes `version`, e.g. `v1.29.2`.
    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_nodes_ready_policy(mut self, policy: RetryPolicy) -> Self {
        self.nodes_ready = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kubeconfig context kind creates for the cluster.
    pub fn context(&self) -> String {
        format!("kind-{}", self.name)
    }

    fn kind(&self) -> Cmd {
        Cmd::new(&self.settings.kind_path)
    }

    fn kubectl_cmd(&self) -> Cmd {
        Cmd::new(&self.settings.kubectl_path)
    }

    /// Whether a kind cluster with this name exists.
    pub async fn exists(&self) -> Result<bool> {
        let clusters = self
            .runner
            .run(&self.kind().args(["get", "clusters"]))
            .await?;
        Ok(clusters.lines().any(|line| line.trim() == self.name))
    }

    /// Use the existing cluster, or create one and wait for its nodes.
    pub async fn get_or_create(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.exists().await? {
            debug!("Using existing kind cluster '{}'", self.name);
            return self.use_context().await;
        }

        info!("Creating kind cluster '{}'", self.name);
        let mut create = self
            .kind()
            .args(["create", "cluster", "--name", self.name.as_str()]);
        if !self.version.is_empty() && self.version != "latest" {
            create = create
                .arg("--image")
                .arg(format!("kindest/node:{}", self.version));
        }
        self.runner.run(&create).await?;

        let probe = NodesReadyProbe {
            client: self.k8s_client().await?,
        };
        wait_until_ready(
            &format!("kind cluster '{}'", self.name),
            &self.nodes_ready,
            cancel,
            &probe,
            None,
        )
        .await?;
        self.use_context().await
    }

    /// Make the cluster the current `kubectl` context.
    pub async fn use_context(&self) -> Result<()> {
        let context = self.context();
        info!("Switching to cluster context '{}'", context);
        self.runner
            .run(
                &self
                    .kind()
                    .args(["export", "kubeconfig", "--name", self.name.as_str()]),
            )
            .await?;
        self.runner
            .run(
                &self
                    .kubectl_cmd()
                    .args(["config", "use-context", context.as_str()]),
            )
            .await?;
        self.runner
            .run(
                &self
                    .kubectl_cmd()
                    .args(["cluster-info", "--context", context.as_str()]),
            )
            .await?;
        debug!("Connected to kind cluster '{}'", self.name);
        Ok(())
    }

    pub async fn delete(&mut self) -> Result<()> {
        info!("Deleting kind cluster '{}'", self.name);
        self.runner
            .run(
                &self
                    .kind()
                    .args(["delete", "cluster", "--name", self.name.as_str()]),
            )
            .await?;
        self.kubeconfig_dir = None;
        Ok(())
    }

    /// Copy a local docker image into the cluster's nodes.
    pub async fn load_image(&self, image: &str) -> Result<()> {
        self.runner
            .run(&self.kind().args([
                "load",
                "docker-image",
                image,
                "--name",
                self.name.as_str(),
            ]))
            .await
            .map(|_| ())
    }

    /// The cluster's kubeconfig document.
    pub async fn kubeconfig(&self) -> Result<String> {
        self.runner
            .run(
                &self
                    .kind()
                    .args(["get", "kubeconfig", "--name", self.name.as_str()]),
            )
            .await
    }

    /// Write the kubeconfig into a temporary directory that lives as long as `self` and return
    /// its path.
    pub async fn write_kubeconfig(&mut self) -> Result<PathBuf> {
        let kubeconfig = self.kubeconfig().await?;
        let dir = match self.kubeconfig_dir.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new()
                .prefix(&format!("kind-{}-", self.name))
                .tempdir()
                .context(error::IoSnafu {
                    action: "create a kubeconfig directory",
                })?,
        };
        let path = dir.path().join(KUBECONFIG_FILENAME);
        let written = tokio::fs::write(&path, kubeconfig)
            .await
            .context(error::IoSnafu {
                action: format!("write kubeconfig to '{}'", path.display()),
            });
        self.kubeconfig_dir = Some(dir);
        written?;
        trace!("Wrote kubeconfig for '{}' to '{}'", self.name, path.display());
        Ok(path)
    }

    /// A [`Kubectl`] bound to this cluster's context and kubeconfig.
    pub async fn kubectl(&mut self) -> Result<Kubectl> {
        let kubeconfig = self.write_kubeconfig().await?;
        Ok(Kubectl::from_settings(self.runner.clone(), &self.settings)
            .with_context(self.context())
            .with_kubeconfig(kubeconfig))
    }

    /// Create the k8s client for the cluster.
    pub async fn k8s_client(&mut self) -> Result<Client> {
        let path = self.write_kubeconfig().await?;
        let kubeconfig = Kubeconfig::read_from(path).context(error::KubeconfigSnafu)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(error::KubeconfigSnafu)?;
        config.try_into().context(error::KubeSnafu {
            action: "create kubernetes client",
        })
    }

    /// Install ingress-nginx and cert-manager with `arkade`.
    pub async fn setup_ingress(&mut self) -> Result<()> {
        let kubeconfig = self.write_kubeconfig().await?;
        for app in ["ingress-nginx", "cert-manager"] {
            info!("Installing '{}' into kind cluster '{}'", app, self.name);
            let out = self
                .runner
                .run(
                    &Cmd::new(&self.settings.arkade_path)
                        .args(["install", app, "--kubeconfig"])
                        .arg(kubeconfig.to_string_lossy()),
                )
                .await?;
            debug!("{}", out);
        }
        Ok(())
    }
}

/// Returns `true` if there is at least one node and every node reports `Ready=True`.
pub(crate) fn nodes_ready(nodes: &[Node]) -> bool {
    !nodes.is_empty()
        && nodes.iter().all(|node| {
            node.status
                .as_ref()
                .and_then(|status| status.conditions.as_ref())
                .map(|conditions| {
                    conditions
                        .iter()
                        .any(|condition| condition.type_ == "Ready" && condition.status == "True")
                })
                .unwrap_or(false)
        })
}

struct NodesReadyProbe {
    client: Client,
}

#[async_trait]
impl ReadinessProbe for NodesReadyProbe {
    async fn test_connection(&self) -> bool {
        let api = Api::<Node>::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(nodes) => nodes_ready(&nodes.items),
            Err(e) => {
                trace!("Unable to list nodes: {}", e);
                false
            }
        }
    }
}
