use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use testkit::{CancellationToken, KindCluster, ProcessRunner, Settings};

/// Create, delete and load images into kind clusters.
#[derive(Debug, Parser)]
pub(crate) struct Kind {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Create a cluster, or reuse it if it already exists.
    Up(Up),
    /// Delete a cluster.
    Down(Down),
    /// Load a local docker image into a cluster.
    Load(Load),
}

impl Kind {
    pub(crate) async fn run(self, settings: &Settings) -> Result<()> {
        match self.command {
            Command::Up(up) => up.run(settings).await,
            Command::Down(down) => down.run(settings).await,
            Command::Load(load) => load.run(settings).await,
        }
    }
}

fn cluster(name: &str, settings: &Settings) -> KindCluster {
    KindCluster::with_runner(name, Arc::new(ProcessRunner::new()), settings)
}

#[derive(Debug, Parser)]
pub(crate) struct Up {
    /// The name of the cluster.
    #[clap(long, default_value = "kind")]
    name: String,

    /// The Kubernetes version of the node image, e.g. `v1.29.2`.
    #[clap(long, default_value = "latest")]
    version: String,
}

impl Up {
    async fn run(self, settings: &Settings) -> Result<()> {
        let mut cluster = cluster(&self.name, settings).version(&self.version);
        cluster
            .get_or_create(&CancellationToken::new())
            .await
            .context(format!("Unable to bring up kind cluster '{}'", self.name))?;
        println!(
            "kind cluster '{}' is ready, context '{}'",
            cluster.name(),
            cluster.context()
        );
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Down {
    /// The name of the cluster.
    #[clap(long, default_value = "kind")]
    name: String,
}

impl Down {
    async fn run(self, settings: &Settings) -> Result<()> {
        cluster(&self.name, settings)
            .delete()
            .await
            .context(format!("Unable to delete kind cluster '{}'", self.name))?;
        println!("kind cluster '{}' deleted", self.name);
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Load {
    /// The name of the cluster.
    #[clap(long, default_value = "kind")]
    name: String,

    /// The local image to load, e.g. `controller:integ`.
    #[clap(long)]
    image: String,
}

impl Load {
    async fn run(self, settings: &Settings) -> Result<()> {
        cluster(&self.name, settings)
            .load_image(&self.image)
            .await
            .context(format!(
                "Unable to load '{}' into kind cluster '{}'",
                self.image, self.name
            ))?;
        println!("Loaded '{}' into kind cluster '{}'", self.image, self.name);
        Ok(())
    }
}
