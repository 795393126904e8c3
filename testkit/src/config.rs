use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;

/// The prefix of every environment variable read by [`Settings::from_env`].
pub const ENV_PREFIX: &str = "TESTKIT_";

/// The number of log bytes captured when a container fails.
pub const DEFAULT_DIAGNOSTIC_LOG_BYTES: usize = 8 * 1024;

/// `Settings` locate the external tools that `testkit` drives and control a few environment
/// dependent details. Every field can be set with a `TESTKIT_` prefixed environment variable.
///
/// # Example
///
/// ```text
/// TESTKIT_DOCKER_PATH=/usr/local/bin/docker
/// TESTKIT_ENDPOINT_HOST=192.168.64.2
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// The path or name of the `docker` binary. Defaults to `docker` (i.e. found via `$PATH`).
    pub docker_path: String,
    /// The path or name of the [kind] binary.
    ///
    /// [kind]: https://kind.sigs.k8s.io/
    pub kind_path: String,
    /// The path or name of the `kubectl` binary.
    pub kubectl_path: String,
    /// The path or name of the `helm` binary.
    pub helm_path: String,
    /// The path or name of the `arkade` binary, used to install ingress components.
    pub arkade_path: String,
    /// The host used when building connection strings for published container ports.
    pub endpoint_host: String,
    /// How many bytes of container logs are printed when a container fails.
    pub diagnostic_log_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_path: "docker".to_string(),
            kind_path: "kind".to_string(),
            kubectl_path: "kubectl".to_string(),
            helm_path: "helm".to_string(),
            arkade_path: "arkade".to_string(),
            endpoint_host: "localhost".to_string(),
            diagnostic_log_bytes: DEFAULT_DIAGNOSTIC_LOG_BYTES,
        }
    }
}

impl Settings {
    /// Read settings from `TESTKIT_*` environment variables, using defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Settings>()
            .context(error::SettingsSnafu)
    }

    /// Read settings from an explicit set of variables. Keys must include the `TESTKIT_` prefix.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Settings>(vars)
            .context(error::SettingsSnafu)
    }
}
