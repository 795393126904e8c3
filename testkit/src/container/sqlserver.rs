use super::{Container, ContainerEngine, ContainerSpec, DockerCli};
use crate::config::Settings;
use crate::error::{self, Result};
use crate::poll::{wait_until_ready, Diagnostics, ReadinessProbe, RetryPolicy};
use crate::process::ProcessRunner;
use async_trait::async_trait;
use log::{info, trace};
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;

pub const SQLSERVER_IMAGE: &str = "mcr.microsoft.com/azure-sql-edge:latest";
pub const SQLSERVER_PORT: u16 = 1433;
const USER: &str = "sa";
const DATABASE: &str = "master";
const PING_QUERY: &str = "SELECT 1";

pub const READINESS: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(2));

/// A SQL Server (Azure SQL Edge) database.
///
/// Connections are unencrypted unless [`SqlServer::with_encryption`] is used: the server is a
/// local throwaway container with a self-signed certificate.
#[derive(Debug)]
pub struct SqlServer {
    container: Container,
    password: String,
    encryption: EncryptionLevel,
    readiness: RetryPolicy,
    host_port: Option<u16>,
}

impl SqlServer {
    /// A SQL Server run by the local `docker`. `password` must satisfy the server's password
    /// policy or the container exits during startup.
    pub fn docker(name: &str, password: &str, reuse: bool, settings: &Settings) -> Self {
        let engine = Arc::new(DockerCli::from_settings(
            Arc::new(ProcessRunner::new()),
            settings,
        ));
        Self::new(name, password, reuse, engine, settings)
    }

    pub fn new(
        name: &str,
        password: &str,
        reuse: bool,
        engine: Arc<dyn ContainerEngine>,
        settings: &Settings,
    ) -> Self {
        let spec = sqlserver_spec(name, password).reuse(reuse);
        Self {
            container: Container::new(spec, engine).with_settings(settings),
            password: password.to_string(),
            encryption: EncryptionLevel::NotSupported,
            readiness: READINESS,
            host_port: None,
        }
    }

    /// Negotiate TLS (trusting the server's certificate) instead of connecting in plain text.
    pub fn with_encryption(mut self) -> Self {
        self.encryption = EncryptionLevel::Required;
        self
    }

    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_stability_policy(mut self, policy: RetryPolicy) -> Self {
        self.container = self.container.with_stability_policy(policy);
        self
    }

    /// Start the database and wait until it answers queries.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.container.start(cancel).await?;
        let port = self.container.port(SQLSERVER_PORT).await?;
        self.host_port = Some(port);
        info!(
            "SQL Server '{}' listening on {}:{}",
            self.container.label(),
            self.container.endpoint_host(),
            port
        );

        let probe = SqlProbe {
            config: self.config()?,
        };
        if let Err(e) = wait_until_ready(
            "SQL Server",
            &self.readiness,
            cancel,
            &probe,
            Some(&self.container),
        )
        .await
        {
            if !e.is_cancelled() {
                self.container
                    .log_diagnostics(&format!("SQL Server failed to become ready: {}", e))
                    .await;
            }
            return Err(e);
        }
        Ok(())
    }

    fn port(&self) -> Result<u16> {
        self.host_port.context(error::NotStartedSnafu {
            name: self.container.label(),
        })
    }

    /// The `tiberius` configuration for the `master` database as `sa`.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::new();
        config.host(self.container.endpoint_host());
        config.port(self.port()?);
        config.authentication(AuthMethod::sql_server(USER, &self.password));
        config.database(DATABASE);
        config.encryption(self.encryption);
        config.trust_cert();
        Ok(config)
    }

    /// An ADO.NET style connection string, e.g. for handing to the system under test.
    pub fn connection_string(&self) -> Result<String> {
        let encrypt = !matches!(self.encryption, EncryptionLevel::NotSupported);
        Ok(format!(
            "Server=tcp:{},{};Database={};User Id={};Password={};Encrypt={};TrustServerCertificate=true",
            self.container.endpoint_host(),
            self.port()?,
            DATABASE,
            USER,
            self.password,
            encrypt
        ))
    }

    /// Open a new connection.
    pub async fn connect(&self) -> Result<Client<Compat<TcpStream>>> {
        connect(self.config()?).await
    }

    /// Connect and run `SELECT 1`. The error names the step that failed.
    pub async fn health_check(&self) -> Result<()> {
        select_one(self.config()?).await
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.container.stop().await
    }

    pub async fn cleanup(&mut self) -> Result<()> {
        self.host_port = None;
        self.container.cleanup().await
    }
}

fn sqlserver_spec(name: &str, password: &str) -> ContainerSpec {
    ContainerSpec::new(SQLSERVER_IMAGE, name)
        .expose(SQLSERVER_PORT)
        .env("ACCEPT_EULA", "Y")
        .env("SA_PASSWORD", password)
        .env("MSSQL_PID", "Developer")
}

async fn connect(config: Config) -> Result<Client<Compat<TcpStream>>> {
    let addr = config.get_addr();
    let tcp = TcpStream::connect(addr.as_str()).await.context(error::IoSnafu {
        action: format!("connect to SQL Server at '{}'", addr),
    })?;
    tcp.set_nodelay(true).context(error::IoSnafu {
        action: "set TCP_NODELAY",
    })?;
    // The login handshake doubles as a ping.
    Client::connect(config, tcp.compat_write())
        .await
        .context(error::SqlSnafu {
            action: format!("log in to SQL Server at '{}'", addr),
        })
}

async fn select_one(config: Config) -> Result<()> {
    let mut client = connect(config).await?;
    let row = client
        .simple_query(PING_QUERY)
        .await
        .context(error::SqlSnafu {
            action: format!("run '{}'", PING_QUERY),
        })?
        .into_row()
        .await
        .context(error::SqlSnafu {
            action: format!("read the result of '{}'", PING_QUERY),
        })?;
    let value = match &row {
        Some(row) => row.try_get::<i32, _>(0).context(error::SqlSnafu {
            action: format!("read the result of '{}'", PING_QUERY),
        })?,
        None => None,
    };
    snafu::ensure!(
        value == Some(1),
        error::SqlResultSnafu {
            query: PING_QUERY,
            found: format!("{:?}", value),
        }
    );
    // Closing is best effort, the server drops the session either way.
    if let Err(e) = client.close().await {
        trace!("Unable to close SQL Server connection: {}", e);
    }
    Ok(())
}

/// Ready once a fresh connection can run `SELECT 1`.
struct SqlProbe {
    config: Config,
}

#[async_trait]
impl ReadinessProbe for SqlProbe {
    async fn test_connection(&self) -> bool {
        match select_one(self.config.clone()).await {
            Ok(()) => true,
            Err(e) => {
                trace!("SQL Server not ready: {}", e);
                false
            }
        }
    }
}
