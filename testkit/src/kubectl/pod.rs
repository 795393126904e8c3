use super::namespace::first_pod_name;
use super::{timeout_arg, ItemList, Kubectl};
use crate::error::{self, Result};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use log::{debug, info, warn};
use snafu::{OptionExt, ResultExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Child;

/// How long a pod is given to become ready by [`PodRef::wait_ready`].
pub const POD_READY_TIMEOUT: Duration = Duration::from_secs(120);
const PORT_FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(10);
const PORT_FORWARD_POLL: Duration = Duration::from_millis(100);

/// A pod identified by name, or by a label selector whose first match is used.
#[derive(Debug, Clone)]
pub struct PodRef {
    kubectl: Kubectl,
    namespace: String,
    name: Option<String>,
    selector: Option<String>,
    container: Option<String>,
}

impl PodRef {
    pub(crate) fn by_name<S: Into<String>>(kubectl: Kubectl, namespace: &str, name: S) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: Some(name.into()),
            selector: None,
            container: None,
        }
    }

    pub(crate) fn by_selector<S: Into<String>>(
        kubectl: Kubectl,
        namespace: &str,
        selector: S,
    ) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: None,
            selector: Some(selector.into()),
            container: None,
        }
    }

    /// Target `container` for `exec` and `logs` in a multi-container pod.
    pub fn container<S: Into<String>>(mut self, container: S) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The pod's name, looked up (and remembered) from the selector if necessary.
    pub async fn name(&mut self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        let selector = self.selector.clone().unwrap_or_default();
        let list: ItemList<Pod> = self
            .kubectl
            .json(
                "pod list",
                ["get", "pods", "-n", self.namespace.as_str(), "-l", selector.as_str(), "-o", "json"],
            )
            .await?;
        let name = first_pod_name(
            &list.items,
            &format!("a pod matching '{}' in '{}'", selector, self.namespace),
        )?;
        debug!("Selector '{}' resolved to pod '{}'", selector, name);
        self.name = Some(name.clone());
        Ok(name)
    }

    /// Wait up to two minutes for the pod to report `Ready`.
    pub async fn wait_ready(&mut self) -> Result<()> {
        self.wait_for("condition=Ready", POD_READY_TIMEOUT).await
    }

    /// Wait for `kubectl wait --for=<condition>`.
    pub async fn wait_for(&mut self, condition: &str, timeout: Duration) -> Result<()> {
        let mut args = vec![
            "wait".to_string(),
            "pod".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ];
        match (&self.name, &self.selector) {
            (Some(name), _) => args.push(name.clone()),
            (None, Some(selector)) => {
                args.push("-l".to_string());
                args.push(selector.clone());
            }
            (None, None) => {}
        }
        args.push(format!("--for={}", condition));
        args.push(timeout_arg(timeout));
        self.kubectl.run(args).await.map(|_| ())
    }

    /// Run `command` with `bash -c` in the pod and return its stdout.
    pub async fn exec(&mut self, command: &str) -> Result<String> {
        let name = self.name().await?;
        let mut args = vec!["exec".to_string(), "-n".to_string(), self.namespace.clone(), name];
        if let Some(container) = &self.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.extend(["--", "bash", "-c", command].iter().map(|s| s.to_string()));
        self.kubectl.run(args).await
    }

    pub async fn logs(&mut self, tail: Option<usize>) -> Result<String> {
        let name = self.name().await?;
        let mut args = vec!["logs".to_string(), "-n".to_string(), self.namespace.clone(), name];
        if let Some(container) = &self.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        if let Some(tail) = tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }
        self.kubectl.run(args).await
    }

    pub async fn get(&mut self) -> Result<Pod> {
        let name = self.name().await?;
        self.kubectl
            .json(
                "pod",
                ["get", "pod", name.as_str(), "-n", self.namespace.as_str(), "-o", "json"],
            )
            .await
    }

    /// e.g. `Running`, `Pending`.
    pub async fn phase(&mut self) -> Result<String> {
        let name = self.name().await?;
        let phase = self
            .kubectl
            .run([
                "get",
                "pod",
                name.as_str(),
                "-n",
                self.namespace.as_str(),
                "-o",
                "jsonpath={.status.phase}",
            ])
            .await?;
        Ok(phase.trim().to_string())
    }

    /// The first owner of the pod, e.g. its `StatefulSet`.
    pub async fn owner(&mut self) -> Result<OwnerReference> {
        let pod = self.get().await?;
        let name = pod.metadata.name.clone().unwrap_or_default();
        pod.metadata
            .owner_references
            .and_then(|owners| owners.into_iter().next())
            .context(error::NotFoundSnafu {
                what: format!("an owner of pod '{}'", name),
            })
    }

    /// Forward a free local port to `port` of the pod. The forward stops when the returned guard
    /// is dropped.
    pub async fn port_forward(&mut self, port: u16) -> Result<PortForward> {
        let name = self.name().await?;
        let local_port = free_port()?;
        info!(
            "Forwarding pod '{}' port {} to local port {}",
            name, port, local_port
        );
        let cmd = self.kubectl.cmd().args([
            "port-forward".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
            name,
            format!("{}:{}", local_port, port),
        ]);
        let child = tokio::process::Command::new(cmd.program())
            .args(cmd.get_args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context(error::SpawnSnafu {
                program: cmd.program(),
            })?;
        let forward = PortForward { local_port, child };
        let address = format!("127.0.0.1:{}", local_port);
        let ready = tokio::time::timeout(PORT_FORWARD_READY_TIMEOUT, async {
            while TcpStream::connect(&address).await.is_err() {
                tokio::time::sleep(PORT_FORWARD_POLL).await;
            }
        })
        .await;
        if ready.is_err() {
            warn!("Port forward to '{}' did not become ready", address);
            return error::TimeoutSnafu {
                what: format!("port forward '{}'", cmd),
            }
            .fail();
        }
        Ok(forward)
    }
}

/// A running `kubectl port-forward`. Dropping it stops the forward.
#[derive(Debug)]
pub struct PortForward {
    local_port: u16,
    child: Child,
}

impl PortForward {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop the forward and wait for `kubectl` to exit.
    pub async fn stop(mut self) -> Result<()> {
        self.child.kill().await.context(error::IoSnafu {
            action: "stop port forward",
        })
    }
}

/// Ask the OS for an unused port.
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context(error::IoSnafu {
        action: "find a free local port",
    })?;
    let port = listener
        .local_addr()
        .context(error::IoSnafu {
            action: "find a free local port",
        })?
        .port();
    Ok(port)
}
