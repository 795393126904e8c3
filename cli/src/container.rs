use anyhow::{Context, Error, Result};
use clap::Parser;
use std::sync::Arc;
use testkit::{
    CancellationToken, Container as ManagedContainer, ContainerEngine, ContainerSpec, DockerCli,
    ProcessRunner, Settings,
};

/// Run or remove containers with the lifecycle used by tests.
#[derive(Debug, Parser)]
pub(crate) struct Container {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Start a container and wait for it to stay up through the stability window.
    Run(Run),
    /// Remove a container by name.
    Rm(Remove),
}

impl Container {
    pub(crate) async fn run(self, settings: &Settings) -> Result<()> {
        match self.command {
            Command::Run(run) => run.run(settings).await,
            Command::Rm(remove) => remove.run(settings).await,
        }
    }
}

/// A `--port` value: `CONTAINER[:HOST]`. Without a host port the engine picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortArg {
    container: u16,
    host: u16,
}

fn parse_port(value: &str) -> Result<PortArg> {
    let (container, host) = match value.split_once(':') {
        Some((container, host)) => (container, Some(host)),
        None => (value, None),
    };
    let container = container
        .parse()
        .context(format!("Invalid container port in '{}'", value))?;
    let host = match host {
        Some(host) => host
            .parse()
            .context(format!("Invalid host port in '{}'", value))?,
        None => 0,
    };
    Ok(PortArg { container, host })
}

fn parse_env(value: &str) -> Result<String> {
    match value.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(value.to_string()),
        _ => Err(Error::msg(format!(
            "Invalid environment variable '{}', expected KEY=VALUE",
            value
        ))),
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Run {
    /// The image to run, e.g. `nginx:1.25`.
    #[clap(long)]
    image: String,

    /// The container name.
    #[clap(long)]
    name: String,

    /// Publish a port as `CONTAINER[:HOST]`. May be repeated.
    #[clap(long = "port", parse(try_from_str = parse_port))]
    ports: Vec<PortArg>,

    /// Set an environment variable as `KEY=VALUE`. May be repeated.
    #[clap(long = "env", parse(try_from_str = parse_env))]
    env: Vec<String>,

    /// Use an existing container with the same name if there is one.
    #[clap(long)]
    reuse: bool,
}

impl Run {
    fn spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::new(&self.image, &self.name).reuse(self.reuse);
        for port in &self.ports {
            spec = spec.port(port.container, port.host);
        }
        for entry in &self.env {
            spec = spec.env_entry(entry);
        }
        spec
    }

    async fn run(self, settings: &Settings) -> Result<()> {
        let mut container = ManagedContainer::docker(self.spec(), settings);
        container
            .start(&CancellationToken::new())
            .await
            .context(format!("Unable to start container '{}'", self.name))?;
        let id = container.id().unwrap_or_default();
        println!("{}", id);
        for port in &self.ports {
            let endpoint = container
                .endpoint(port.container)
                .await
                .context(format!("Unable to find the binding of port {}", port.container))?;
            println!("{}/tcp -> {}", port.container, endpoint);
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Remove {
    /// The name of the container to remove.
    #[clap(long)]
    name: String,
}

impl Remove {
    async fn run(self, settings: &Settings) -> Result<()> {
        let docker = DockerCli::from_settings(Arc::new(ProcessRunner::new()), settings);
        let found = docker
            .find_by_name(&self.name)
            .await
            .context(format!("Unable to look for container '{}'", self.name))?
            .context(format!("No container named '{}'", self.name))?;
        docker
            .remove(&found.id)
            .await
            .context(format!("Unable to remove container '{}'", self.name))?;
        println!("Removed container '{}' ({})", self.name, found.id);
        Ok(())
    }
}
