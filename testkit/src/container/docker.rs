use super::engine::{ContainerDetails, ContainerEngine, ContainerSummary};
use super::spec::{ContainerSpec, MountKind};
use super::parse;
use crate::config::Settings;
use crate::error::Result;
use crate::process::{Cmd, CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A [`ContainerEngine`] that drives the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::from_settings(runner, &Settings::default())
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            program: settings.docker_path.clone(),
        }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program)
    }
}

/// The arguments of `docker create` for `spec`.
pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if !spec.name().is_empty() {
        args.push("--name".to_string());
        args.push(spec.name().to_string());
    }
    for (container_port, host_port) in spec.ports() {
        args.push("-p".to_string());
        if *host_port == 0 {
            args.push(container_port.to_string());
        } else {
            args.push(format!("{}:{}", host_port, container_port));
        }
    }
    for entry in spec.env_vars() {
        args.push("-e".to_string());
        args.push(entry.clone());
    }
    for mount in spec.mounts() {
        match mount.kind {
            MountKind::Volume => {
                let mut volume = format!("{}:{}", mount.source, mount.target);
                if mount.read_only {
                    volume.push_str(":ro");
                }
                args.push("-v".to_string());
                args.push(volume);
            }
            MountKind::Bind => {
                let mut bind = format!("type=bind,source={},target={}", mount.source, mount.target);
                if mount.read_only {
                    bind.push_str(",readonly");
                }
                args.push("--mount".to_string());
                args.push(bind);
            }
        }
    }
    args.push(spec.image().to_string());
    args
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .runner
            .output(&self.cmd().args(["image", "inspect", image]))
            .await?;
        Ok(output.success())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.runner
            .run(&self.cmd().args(["pull", image]))
            .await
            .map(|_| ())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let stdout = self.runner.run(&self.cmd().args(create_args(spec))).await?;
        parse::created_id(&stdout)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.runner
            .run(&self.cmd().args(["start", id]))
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        self.runner
            .run(
                &self
                    .cmd()
                    .args(["stop", "-t"])
                    .arg(grace.as_secs().to_string())
                    .arg(id),
            )
            .await
            .map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.runner
            .run(&self.cmd().args(["rm", "-f", id]))
            .await
            .map(|_| ())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails> {
        let stdout = self
            .runner
            .run(&self.cmd().args(["inspect", "--type", "container", id]))
            .await?;
        parse::inspect(&stdout)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerSummary>> {
        let filter = format!("name={}", name);
        let stdout = self
            .runner
            .run(&self.cmd().args([
                "ps",
                "-a",
                "--no-trunc",
                "--filter",
                filter.as_str(),
                "--format",
                "{{json .}}",
            ]))
            .await?;
        Ok(parse::exact_name_match(parse::summaries(&stdout)?, name))
    }

    async fn logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        let mut cmd = self.cmd().args(["logs", "--timestamps"]);
        if let Some(tail) = tail {
            cmd = cmd.arg("--tail").arg(tail.to_string());
        }
        let cmd = cmd.arg(id);
        // The container's stderr arrives on our stderr.
        let output = self.runner.output(&cmd).await?.check(&cmd)?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput> {
        self.runner
            .output(&self.cmd().args(["exec", id]).args(cmd.iter().cloned()))
            .await
    }
}
