/*!

The container lifecycle controller. A [`Container`] owns one [`ContainerSpec`] and drives it
through an injected [`ContainerEngine`]: it reuses or creates the container, starts it, and then
watches it for a short stability window before anyone is allowed to talk to it. Workloads such as
[`ActiveMq`] and [`SqlServer`] layer their readiness probes on top.

!*/

mod activemq;
mod diagnostics;
mod docker;
mod engine;
mod http_service;
pub(crate) mod parse;
mod spec;
mod sqlserver;

pub use activemq::{find_fixture, ActiveMq, ActiveMqCredentials, ACTIVEMQ_IMAGE};
pub use docker::DockerCli;
pub use engine::{ContainerDetails, ContainerEngine, ContainerState, ContainerSummary, PortBinding};
pub use http_service::HttpService;
pub use spec::{ContainerSpec, Mount, MountKind};
pub use sqlserver::{SqlServer, SQLSERVER_IMAGE};

use crate::config::Settings;
use crate::error::{self, Result};
use crate::poll::{check_cancelled, sleep_or_cancel, Diagnostics, RetryPolicy};
use crate::process::{CommandRunner, ProcessRunner};
use log::{debug, info, warn};
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a container is given to shut down before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// What the controller knows about the container it manages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHandle {
    /// `None` until the container has been created or located.
    pub id: Option<String>,
    /// The result of the last query or action. Use [`Container::is_running`] for a fresh answer.
    pub running: bool,
}

/// A managed container.
#[derive(Debug)]
pub struct Container {
    spec: ContainerSpec,
    engine: Arc<dyn ContainerEngine>,
    handle: ContainerHandle,
    stability: RetryPolicy,
    endpoint_host: String,
    diagnostic_log_bytes: usize,
}

impl Container {
    pub fn new(spec: ContainerSpec, engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            spec,
            engine,
            handle: ContainerHandle::default(),
            stability: RetryPolicy::stability(),
            endpoint_host: Settings::default().endpoint_host,
            diagnostic_log_bytes: Settings::default().diagnostic_log_bytes,
        }
    }

    /// A container driven by the `docker` binary found through `settings`.
    pub fn docker(spec: ContainerSpec, settings: &Settings) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let engine = Arc::new(DockerCli::from_settings(runner, settings));
        Self::new(spec, engine).with_settings(settings)
    }

    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.endpoint_host = settings.endpoint_host.clone();
        self.diagnostic_log_bytes = settings.diagnostic_log_bytes;
        self
    }

    /// Replace the stability window checked after the container starts.
    pub fn with_stability_policy(mut self, policy: RetryPolicy) -> Self {
        self.stability = policy;
        self
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn id(&self) -> Option<String> {
        self.handle.id.clone()
    }

    pub fn handle(&self) -> ContainerHandle {
        self.handle.clone()
    }

    pub(crate) fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub(crate) fn diagnostic_log_bytes(&self) -> usize {
        self.diagnostic_log_bytes
    }

    /// The container's name, or its image if it has no name. Used to label log messages.
    pub fn label(&self) -> &str {
        if self.spec.name().is_empty() {
            self.spec.image()
        } else {
            self.spec.name()
        }
    }

    /// Bring the container up: reuse or create it, start it, and make sure it stays up for the
    /// stability window. Diagnostics are logged before any start or stability failure is
    /// returned.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        let label = self.label().to_string();
        check_cancelled(cancel, &format!("start of container '{}'", label))?;

        if self.handle.id.is_none() && self.spec.is_reuse() {
            match self.locate().await {
                Ok(true) => {}
                Ok(false) => info!(
                    "No existing container named '{}', creating a new one",
                    self.spec.name()
                ),
                Err(e) => warn!(
                    "Unable to look for an existing container named '{}': {}",
                    self.spec.name(),
                    e
                ),
            }
        }

        if self.handle.id.is_none() {
            self.create(cancel).await?;
        }
        let id = self.handle.id.clone().context(error::NotStartedSnafu {
            name: label.as_str(),
        })?;

        if self.handle.running {
            info!("Container '{}' ({}) is already running", label, id);
        } else {
            info!("Starting container '{}' ({})", label, id);
            if let Err(e) = self.engine.start(&id).await {
                self.log_diagnostics(&format!("container '{}' failed to start", label))
                    .await;
                return Err(e).context(error::StartSnafu { name: label });
            }
        }

        self.verify_stability(&id, cancel).await?;
        self.handle.running = true;
        info!("Container '{}' ({}) is up", label, id);
        Ok(())
    }

    /// Look for a container with the configured name. Returns `true` if one was found.
    async fn locate(&mut self) -> Result<bool> {
        let name = self.spec.name();
        if name.is_empty() {
            warn!("Reuse requested for an unnamed container, a new one will be created");
            return Ok(false);
        }
        match self.engine.find_by_name(name).await? {
            Some(summary) => {
                info!(
                    "Reusing container '{}' ({}), status '{}'",
                    name, summary.id, summary.status
                );
                self.handle.running = summary.is_running();
                self.handle.id = Some(summary.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create(&mut self, cancel: &CancellationToken) -> Result<()> {
        let image = self.spec.image().to_string();
        let label = self.label().to_string();
        let present = self
            .engine
            .image_exists(&image)
            .await
            .context(error::PullSnafu { image: &image })?;
        if !present {
            check_cancelled(cancel, &format!("pull of image '{}'", image))?;
            info!("Pulling image '{}'", image);
            self.engine
                .pull(&image)
                .await
                .context(error::PullSnafu { image: &image })?;
        }
        check_cancelled(cancel, &format!("creation of container '{}'", label))?;
        let id = self
            .engine
            .create(&self.spec)
            .await
            .context(error::CreateSnafu { name: &label })?;
        debug!("Created container '{}' with id '{}'", label, id);
        self.handle.id = Some(id);
        self.handle.running = false;
        Ok(())
    }

    /// Inspect the container once per tick of the stability policy. The first report of a stopped
    /// container fails the window.
    async fn verify_stability(&mut self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let label = self.label().to_string();
        let operation = format!("stability check of container '{}'", label);
        for check in 1..=self.stability.attempts {
            check_cancelled(cancel, &operation)?;
            let details = match self.engine.inspect(id).await {
                Ok(details) => details,
                Err(e) => {
                    self.log_diagnostics(&format!("unable to inspect container '{}'", label))
                        .await;
                    return Err(e).context(error::InspectSnafu { id });
                }
            };
            if !details.state.running {
                self.handle.running = false;
                self.log_diagnostics(&format!(
                    "container '{}' stopped during stability check {}",
                    label, check
                ))
                .await;
                return error::ContainerExitedSnafu {
                    name: label,
                    status: details.state.status,
                    exit_code: details.state.exit_code,
                }
                .fail();
            }
            debug!(
                "Container '{}' running, stability check {}/{}",
                label, check, self.stability.attempts
            );
            sleep_or_cancel(self.stability.interval, cancel, &operation).await?;
        }
        Ok(())
    }

    /// Stop the container, keeping it around. Does nothing if there is no container.
    pub async fn stop(&mut self) -> Result<()> {
        let id = match &self.handle.id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        info!("Stopping container '{}' ({})", self.label(), id);
        self.engine
            .stop(&id, STOP_GRACE_PERIOD)
            .await
            .context(error::StopSnafu { name: self.label() })?;
        self.handle.running = false;
        Ok(())
    }

    /// Get rid of the container. A reused container is only stopped so that the next run can
    /// pick it up again; any other container is removed and the handle is cleared.
    pub async fn cleanup(&mut self) -> Result<()> {
        let id = match &self.handle.id {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        if self.spec.is_reuse() {
            return self.stop().await;
        }
        if let Err(e) = self.stop().await {
            warn!("{}", e);
        }
        info!("Removing container '{}' ({})", self.label(), id);
        self.engine
            .remove(&id)
            .await
            .context(error::RemoveSnafu { name: self.label() })?;
        self.handle = ContainerHandle::default();
        Ok(())
    }

    /// Ask the engine whether the container is running.
    pub async fn is_running(&mut self) -> Result<bool> {
        let id = match &self.handle.id {
            Some(id) => id.clone(),
            None => return Ok(false),
        };
        let details = self
            .engine
            .inspect(&id)
            .await
            .context(error::InspectSnafu { id })?;
        self.handle.running = details.state.running;
        Ok(self.handle.running)
    }

    fn started_id(&self) -> Result<&str> {
        self.handle
            .id
            .as_deref()
            .context(error::NotStartedSnafu { name: self.label() })
    }

    /// The host port that `container_port/tcp` is published on. Right after start the engine may
    /// not have reported the binding yet, so callers are free to retry a [`NoPortMapping`] error.
    ///
    /// [`NoPortMapping`]: crate::Error::NoPortMapping
    pub async fn port(&self, container_port: u16) -> Result<u16> {
        let id = self.started_id()?;
        let details = self
            .engine
            .inspect(id)
            .await
            .context(error::InspectSnafu { id })?;
        details
            .host_port(container_port)
            .context(error::NoPortMappingSnafu {
                name: self.label(),
                port: container_port,
            })
    }

    /// `host:port` for reaching `container_port` from the test process.
    pub async fn endpoint(&self, container_port: u16) -> Result<String> {
        let port = self.port(container_port).await?;
        Ok(format!("{}:{}", self.endpoint_host, port))
    }

    pub fn endpoint_host(&self) -> &str {
        &self.endpoint_host
    }

    /// The container's logs, optionally only the last `tail` lines.
    pub async fn logs(&self, tail: Option<usize>) -> Result<String> {
        let id = self.started_id()?;
        self.engine.logs(id, tail).await
    }

    /// Run `cmd` inside the container and return its stdout.
    pub async fn exec<S: AsRef<str>>(&self, cmd: &[S]) -> Result<String> {
        let id = self.started_id()?;
        let cmd: Vec<String> = cmd.iter().map(|arg| arg.as_ref().to_string()).collect();
        let output = self.engine.exec(id, &cmd).await?;
        snafu::ensure!(
            output.success(),
            error::CommandFailedSnafu {
                command: format!("exec in '{}': {}", self.label(), cmd.join(" ")),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            }
        );
        Ok(output.stdout)
    }
}
