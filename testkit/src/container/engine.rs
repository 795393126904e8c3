use super::ContainerSpec;
use crate::error::Result;
use crate::process::CommandOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

/// The runtime state of a container as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    /// e.g. `created`, `running`, `exited`.
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
}

/// One host address a container port is published on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// The result of inspecting a single container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    /// The name without the leading `/` the engine adds.
    pub name: String,
    pub state: ContainerState,
    /// Keyed by `<port>/<protocol>`, e.g. `8080/tcp`.
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

impl ContainerDetails {
    /// The first host port `container_port/tcp` is published on.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .get(&format!("{}/tcp", container_port))?
            .iter()
            .find_map(|binding| binding.host_port.trim().parse().ok())
    }
}

/// A container found by listing, before it has been inspected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    /// Machine readable state, e.g. `running`.
    pub state: String,
    /// Human readable status, e.g. `Up 2 minutes`.
    pub status: String,
}

impl ContainerSummary {
    /// `state` wins when the engine reports one. The status text also reads `Up` for a paused
    /// container.
    pub fn is_running(&self) -> bool {
        if !self.state.is_empty() {
            return self.state == "running";
        }
        self.status.starts_with("Up") && !self.status.ends_with("(Paused)")
    }
}

/// The container engine operations the lifecycle controller relies on. [`DockerCli`] implements
/// them by driving the `docker` binary; tests substitute an in-memory engine.
///
/// [`DockerCli`]: super::DockerCli
#[async_trait]
pub trait ContainerEngine: Debug + Send + Sync {
    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn pull(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it once `grace` has elapsed.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Forcefully remove a container, running or not.
    async fn remove(&self, id: &str) -> Result<()>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails>;

    /// Find the container whose name is exactly `name`, running or not.
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerSummary>>;

    /// The container's output, optionally limited to the last `tail` lines.
    async fn logs(&self, id: &str, tail: Option<usize>) -> Result<String>;

    /// Run `cmd` inside the container. A non-zero exit code is not an error at this level.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput>;
}
