/*!

Typed accessors over the `kubectl` binary. A [`Kubectl`] carries the context and kubeconfig to use
so that several clusters can be driven from one test without touching the process environment.

!*/

mod namespace;
mod pod;
mod resources;

pub use namespace::Namespace;
pub use pod::{PodRef, PortForward};
pub use resources::{ConfigMapRef, PvcRef, SecretRef, StatefulSetRef};

use crate::config::Settings;
use crate::error::{self, Result};
use crate::process::{Cmd, CommandOutput, CommandRunner, ProcessRunner};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The `items` of a `kubectl get -o json` list.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub(crate) items: Vec<T>,
}

/// A `kubectl` invocation template.
#[derive(Debug, Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    program: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::from_settings(runner, &Settings::default())
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            program: settings.kubectl_path.clone(),
            context: None,
            kubeconfig: None,
        }
    }

    /// `kubectl` from `$PATH` using the current context.
    pub fn local() -> Self {
        Self::new(Arc::new(ProcessRunner::new()))
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kubeconfig<P: Into<PathBuf>>(mut self, kubeconfig: P) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    pub(crate) fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// The base command, including `--context` and `--kubeconfig` when set.
    pub fn cmd(&self) -> Cmd {
        let mut cmd = Cmd::new(&self.program);
        if let Some(context) = &self.context {
            cmd = cmd.arg("--context").arg(context);
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd = cmd
                .arg("--kubeconfig")
                .arg(kubeconfig.to_string_lossy());
        }
        cmd
    }

    /// Run `kubectl` with `args` and return its stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&self.cmd().args(args)).await
    }

    /// Run `kubectl` with `args`, whatever the exit code.
    pub async fn output<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.output(&self.cmd().args(args)).await
    }

    /// Run `kubectl` with `args` and parse its stdout as JSON.
    pub(crate) async fn json<T, I, S>(&self, what: &str, args: I) -> Result<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout).context(error::JsonSnafu { what })
    }

    pub fn namespace<S: Into<String>>(&self, name: S) -> Namespace {
        Namespace::new(self.clone(), name)
    }
}

/// Formats a timeout the way `kubectl` flags accept it.
pub(crate) fn timeout_arg(timeout: Duration) -> String {
    format!("--timeout={}s", timeout.as_secs())
}

/// A jsonpath expression for `.data[key]`. Dots in the key are escaped so `tls.crt` is treated
/// as one key.
pub(crate) fn data_jsonpath(key: &str) -> String {
    format!("jsonpath={{.data['{}']}}", key.replace('.', "\\."))
}
