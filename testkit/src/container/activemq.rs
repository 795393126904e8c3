use super::{Container, ContainerEngine, ContainerSpec, DockerCli, Mount};
use crate::config::Settings;
use crate::error::{self, Result};
use crate::poll::{wait_until_ready, Diagnostics, RetryPolicy};
use crate::probe::HttpStatusProbe;
use crate::process::ProcessRunner;
use log::{debug, info};
use reqwest::redirect::Policy;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const ACTIVEMQ_IMAGE: &str = "apache/activemq-classic:5.18.7";
pub const OPENWIRE_PORT: u16 = 61616;
pub const WEB_CONSOLE_PORT: u16 = 8161;
pub const JMX_PORT: u16 = 1099;

const CONFIG_TARGET: &str = "/opt/apache-activemq/conf/activemq.xml";
const DATA_TARGET: &str = "/opt/apache-activemq/data";
const CONFIG_FIXTURE: &str = "activemq.xml";
const JVM_OPTS: &str = "-Xms256m -Xmx512m -XX:+UseG1GC -XX:MaxGCPauseMillis=200 \
    -Dcom.sun.management.jmxremote -Dcom.sun.management.jmxremote.port=1099 \
    -Dcom.sun.management.jmxremote.local.only=false \
    -Dcom.sun.management.jmxremote.authenticate=false \
    -Dcom.sun.management.jmxremote.ssl=false -Djetty.host=0.0.0.0";

/// The broker takes a while to boot its JVM.
pub const READINESS: RetryPolicy =
    RetryPolicy::new(60, Duration::from_secs(2)).with_diagnostics_every(10);

/// Any of these from the web console means jetty is serving requests.
const CONSOLE_UP: [u16; 3] = [200, 302, 401];
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// The admin login of the web console and the Jolokia API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMqCredentials {
    pub username: String,
    pub password: String,
}

impl Default for ActiveMqCredentials {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// An ActiveMQ classic broker.
#[derive(Debug)]
pub struct ActiveMq {
    container: Container,
    credentials: ActiveMqCredentials,
    readiness: RetryPolicy,
    /// Held so the directory lives as long as the broker. `None` when the directory has been
    /// persisted for a reusable container.
    _data_dir: Option<TempDir>,
    broker_url: Option<String>,
    web_console_url: Option<String>,
}

impl ActiveMq {
    /// An ActiveMQ broker run by the local `docker`.
    ///
    /// The `activemq.xml` is taken from `config_file` if given, otherwise from the nearest
    /// `test/fixtures/activemq.xml` above the working directory. Without either the image's
    /// default configuration is used.
    pub fn docker(
        name: &str,
        credentials: ActiveMqCredentials,
        reuse: bool,
        config_file: Option<PathBuf>,
        settings: &Settings,
    ) -> Result<Self> {
        let engine = Arc::new(DockerCli::from_settings(
            Arc::new(ProcessRunner::new()),
            settings,
        ));
        Self::new(name, credentials, reuse, config_file, engine, settings)
    }

    pub fn new(
        name: &str,
        credentials: ActiveMqCredentials,
        reuse: bool,
        config_file: Option<PathBuf>,
        engine: Arc<dyn ContainerEngine>,
        settings: &Settings,
    ) -> Result<Self> {
        let config_file = match config_file {
            Some(path) => Some(path),
            None => {
                let cwd = env::current_dir().context(error::IoSnafu {
                    action: "get the working directory",
                })?;
                find_fixture(&cwd, CONFIG_FIXTURE)
            }
        };
        match &config_file {
            Some(path) => info!("Using ActiveMQ configuration '{}'", path.display()),
            None => info!("No activemq.xml fixture found, using the image's configuration"),
        }

        let data_dir = tempfile::Builder::new()
            .prefix(&format!("activemq-data-{}-", name))
            .tempdir()
            .context(error::IoSnafu {
                action: "create the ActiveMQ data directory",
            })?;
        // A reused container keeps pointing at its original bind mount.
        let (data_path, data_dir) = if reuse {
            (data_dir.into_path(), None)
        } else {
            (data_dir.path().to_path_buf(), Some(data_dir))
        };

        let spec = activemq_spec(name, &credentials, config_file.as_deref(), &data_path)
            .reuse(reuse);
        info!(
            "ActiveMQ container '{}' with user '{}', reuse={}",
            name, credentials.username, reuse
        );
        Ok(Self {
            container: Container::new(spec, engine).with_settings(settings),
            credentials,
            readiness: READINESS,
            _data_dir: data_dir,
            broker_url: None,
            web_console_url: None,
        })
    }

    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_stability_policy(mut self, policy: RetryPolicy) -> Self {
        self.container = self.container.with_stability_policy(policy);
        self
    }

    /// Start the broker and wait until its web console answers and its queues can be listed.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.container.start(cancel).await?;

        let host = self.container.endpoint_host().to_string();
        let broker_port = self.container.port(OPENWIRE_PORT).await?;
        let web_port = self.container.port(WEB_CONSOLE_PORT).await?;
        let jmx_port = self.container.port(JMX_PORT).await?;
        let broker_url = format!("tcp://{}:{}", host, broker_port);
        let web_console_url = format!("http://{}:{}", host, web_port);
        info!(
            "ActiveMQ broker '{}', web console '{}', JMX port {}",
            broker_url, web_console_url, jmx_port
        );
        self.broker_url = Some(broker_url);
        self.web_console_url = Some(web_console_url.clone());

        let probe = HttpStatusProbe::new(format!("{}/", web_console_url), &CONSOLE_UP)?;
        if let Err(e) = wait_until_ready(
            "ActiveMQ",
            &self.readiness,
            cancel,
            &probe,
            Some(&self.container),
        )
        .await
        {
            if !e.is_cancelled() {
                self.container
                    .log_diagnostics(&format!("ActiveMQ failed to become ready: {}", e))
                    .await;
            }
            return Err(e);
        }

        if let Err(e) = self.health_check().await {
            self.container
                .log_diagnostics(&format!("ActiveMQ health check failed after startup: {}", e))
                .await;
            return Err(e);
        }
        info!("ActiveMQ is ready and accepting connections");
        Ok(())
    }

    /// Check the web console and list the broker's queues through Jolokia.
    pub async fn health_check(&self) -> Result<()> {
        let web_console_url = self.web_console_url()?;
        let client = reqwest::Client::builder()
            .timeout(HEALTH_CHECK_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .context(error::HttpSnafu {
                action: "build the ActiveMQ health check client",
            })?;
        let status = client
            .get(format!("{}/", web_console_url))
            .send()
            .await
            .context(error::HttpSnafu {
                action: "reach the ActiveMQ web console",
            })?
            .status()
            .as_u16();
        ensure!(
            CONSOLE_UP.contains(&status),
            error::HttpStatusSnafu {
                action: "reach the ActiveMQ web console",
                status,
                body: String::new(),
            }
        );
        let queues = self.list_queues_with(&client).await?;
        debug!("ActiveMQ queues: {:?}", queues);
        Ok(())
    }

    /// The names of the broker's queues.
    pub async fn list_queues(&self) -> Result<Vec<String>> {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_CHECK_TIMEOUT)
            .build()
            .context(error::HttpSnafu {
                action: "build the Jolokia client",
            })?;
        self.list_queues_with(&client).await
    }

    async fn list_queues_with(&self, client: &reqwest::Client) -> Result<Vec<String>> {
        let url = format!(
            "{}/api/jolokia/read/org.apache.activemq:type=Broker,brokerName=localhost/Queues",
            self.web_console_url()?
        );
        let response = client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .context(error::HttpSnafu {
                action: "list ActiveMQ queues",
            })?;
        let status = response.status();
        let body = response.text().await.context(error::HttpSnafu {
            action: "read the Jolokia response",
        })?;
        ensure!(
            status.is_success(),
            error::HttpStatusSnafu {
                action: "list ActiveMQ queues",
                status: status.as_u16(),
                body,
            }
        );
        queue_names(&body)
    }

    pub fn broker_url(&self) -> Result<&str> {
        self.broker_url.as_deref().context(error::NotStartedSnafu {
            name: self.container.label(),
        })
    }

    pub fn web_console_url(&self) -> Result<&str> {
        self.web_console_url
            .as_deref()
            .context(error::NotStartedSnafu {
                name: self.container.label(),
            })
    }

    pub async fn jmx_port(&self) -> Result<u16> {
        self.container.port(JMX_PORT).await
    }

    pub fn credentials(&self) -> &ActiveMqCredentials {
        &self.credentials
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
        self.broker_url = None;
        self.web_console_url = None;
        self.container.cleanup().await
    }
}

fn activemq_spec(
    name: &str,
    credentials: &ActiveMqCredentials,
    config_file: Option<&Path>,
    data_dir: &Path,
) -> ContainerSpec {
    let mut spec = ContainerSpec::new(ACTIVEMQ_IMAGE, name)
        .expose(OPENWIRE_PORT)
        .expose(WEB_CONSOLE_PORT)
        .expose(JMX_PORT)
        .env("ACTIVEMQ_ADMIN_LOGIN", &credentials.username)
        .env("ACTIVEMQ_ADMIN_PASSWORD", &credentials.password)
        .env("ACTIVEMQ_OPTS", JVM_OPTS);
    if let Some(config_file) = config_file {
        spec = spec.mount(Mount::bind(config_file.to_string_lossy(), CONFIG_TARGET).read_only());
    }
    spec.mount(Mount::bind(data_dir.to_string_lossy(), DATA_TARGET))
}

/// Walk up from `start` looking for `test/fixtures/<file>`.
pub fn find_fixture(start: &Path, file: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("test").join("fixtures").join(file))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Deserialize)]
struct JolokiaResponse {
    #[serde(default)]
    value: Vec<ObjectNameRef>,
}

#[derive(Debug, Deserialize)]
struct ObjectNameRef {
    #[serde(rename = "objectName")]
    object_name: String,
}

/// Extract queue names from the Jolokia `Queues` attribute, a list of MBean object names such as
/// `org.apache.activemq:brokerName=localhost,destinationName=orders,destinationType=Queue,type=Broker`.
fn queue_names(body: &str) -> Result<Vec<String>> {
    let response: JolokiaResponse = serde_json::from_str(body).context(error::JsonSnafu {
        what: "Jolokia response",
    })?;
    Ok(response
        .value
        .iter()
        .filter_map(|reference| {
            let (_, properties) = reference.object_name.split_once(':')?;
            properties
                .split(',')
                .find_map(|property| property.strip_prefix("destinationName="))
                .map(str::to_string)
        })
        .collect())
}
