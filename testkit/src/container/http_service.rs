use super::{Container, ContainerEngine, ContainerSpec, DockerCli};
use crate::config::Settings;
use crate::error::{self, Result};
use crate::poll::{wait_until_ready, Diagnostics, RetryPolicy};
use crate::probe::HttpStatusProbe;
use crate::process::ProcessRunner;
use log::info;
use snafu::OptionExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const READINESS: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(1));

/// Any container that serves HTTP on one port and reports health with a `200` on `path`.
#[derive(Debug)]
pub struct HttpService {
    container: Container,
    port: u16,
    path: String,
    readiness: RetryPolicy,
    base_url: Option<String>,
}

impl HttpService {
    pub fn docker(spec: ContainerSpec, port: u16, path: &str, settings: &Settings) -> Self {
        let engine = Arc::new(DockerCli::from_settings(
            Arc::new(ProcessRunner::new()),
            settings,
        ));
        Self::new(spec, port, path, engine, settings)
    }

    /// `port` is published on an engine assigned host port unless `spec` already maps it.
    pub fn new(
        spec: ContainerSpec,
        port: u16,
        path: &str,
        engine: Arc<dyn ContainerEngine>,
        settings: &Settings,
    ) -> Self {
        let spec = if spec.ports().contains_key(&port) {
            spec
        } else {
            spec.expose(port)
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            container: Container::new(spec, engine).with_settings(settings),
            port,
            path,
            readiness: READINESS,
            base_url: None,
        }
    }

    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_stability_policy(mut self, policy: RetryPolicy) -> Self {
        self.container = self.container.with_stability_policy(policy);
        self
    }

    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.container.start(cancel).await?;
        let base_url = format!("http://{}", self.container.endpoint(self.port).await?);
        info!("'{}' serving on '{}'", self.container.label(), base_url);
        self.base_url = Some(base_url);

        let probe = HttpStatusProbe::new(self.url(&self.path)?, &[200])?;
        let what = format!("'{}'", self.container.label());
        if let Err(e) =
            wait_until_ready(&what, &self.readiness, cancel, &probe, Some(&self.container)).await
        {
            if !e.is_cancelled() {
                self.container
                    .log_diagnostics(&format!("{} failed to become ready: {}", what, e))
                    .await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// The URL of `path` on the started service.
    pub fn url(&self, path: &str) -> Result<String> {
        let base_url = self.base_url.as_deref().context(error::NotStartedSnafu {
            name: self.container.label(),
        })?;
        Ok(format!("{}/{}", base_url, path.trim_start_matches('/')))
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    pub async fn cleanup(&mut self) -> Result<()> {
        self.base_url = None;
        self.container.cleanup().await
    }
}
