use anyhow::{Context, Error, Result};
use clap::Parser;
use testkit::MissionControl as Client;

/// Check on a Mission Control instance.
#[derive(Debug, Parser)]
pub(crate) struct MissionControl {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Exit successfully if the instance reports healthy.
    Health(Health),
}

impl MissionControl {
    pub(crate) async fn run(self) -> Result<()> {
        match self.command {
            Command::Health(health) => health.run().await,
        }
    }
}

#[derive(Debug, Parser)]
pub(crate) struct Health {
    /// The base URL of the Mission Control API.
    #[clap(long)]
    url: String,

    /// Basic auth user name.
    #[clap(long, requires = "password")]
    username: Option<String>,

    /// Basic auth password.
    #[clap(long, requires = "username")]
    password: Option<String>,
}

impl Health {
    async fn run(self) -> Result<()> {
        let mut client = Client::new(&self.url)
            .context(format!("Unable to create a client for '{}'", self.url))?;
        if let (Some(username), Some(password)) = (self.username, self.password) {
            client = client.with_basic_auth(username, password);
        }
        let healthy = client
            .is_healthy()
            .await
            .context(format!("Unable to reach Mission Control at '{}'", self.url))?;
        if !healthy {
            return Err(Error::msg(format!(
                "Mission Control at '{}' is not healthy",
                self.url
            )));
        }
        println!("Mission Control at '{}' is healthy", self.url);
        Ok(())
    }
}
