/*!

Installing charts with the `helm` binary. A [`HelmChart`] describes a release and does no I/O; a
[`Helm`] executes it. When an install or upgrade fails the release status, the pods and the recent
events of the namespace are logged before the error is returned.

!*/

use crate::config::Settings;
use crate::error::{self, Result};
use crate::kubectl::{Kubectl, Namespace};
use crate::process::{Cmd, CommandRunner, ProcessRunner};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use log::{error, info, warn};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";
pub const RELEASE_NAMESPACE_ANNOTATION: &str = "meta.helm.sh/release-namespace";

/// A chart and the release to make of it.
#[derive(Debug, Clone, PartialEq)]
pub struct HelmChart {
    chart: String,
    release: Option<String>,
    namespace: Option<String>,
    values: Map<String, Value>,
    wait: bool,
    timeout: Duration,
    dry_run: bool,
}

impl HelmChart {
    /// `chart` is anything `helm install` accepts: a path, `repo/name` or an OCI reference.
    pub fn new<S: Into<String>>(chart: S) -> Self {
        Self {
            chart: chart.into(),
            release: None,
            namespace: None,
            values: Map::new(),
            wait: false,
            timeout: DEFAULT_TIMEOUT,
            dry_run: false,
        }
    }

    pub fn release<S: Into<String>>(mut self, name: S) -> Self {
        self.release = Some(name.into());
        self
    }

    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Merge `values` into the chart values. Top level keys replace existing ones.
    pub fn values(mut self, values: Map<String, Value>) -> Self {
        self.values.extend(values);
        self
    }

    /// Set one value by its dotted path, e.g. `persistence.size`. Intermediate objects are
    /// created as needed, replacing any non-object value in the way.
    pub fn set_value<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        let path: Vec<&str> = key.split('.').collect();
        insert_path(&mut self.values, &path, value.into());
        self
    }

    /// Make helm wait for the release's resources to become ready.
    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Wait, giving up after `timeout`.
    pub fn wait_for(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn chart(&self) -> &str {
        &self.chart
    }

    pub fn release_name(&self) -> Option<&str> {
        self.release.as_deref()
    }

    /// The release namespace, `default` if none was set.
    pub fn namespace_name(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }

    pub fn get_values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Whether `meta` carries the annotations helm puts on the objects of this release.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        let annotations = match &meta.annotations {
            Some(annotations) => annotations,
            None => return false,
        };
        let release = annotations.get(RELEASE_NAME_ANNOTATION).map(String::as_str);
        let namespace = annotations
            .get(RELEASE_NAMESPACE_ANNOTATION)
            .map(String::as_str);
        release.is_some() && release == self.release_name() && namespace == Some(self.namespace_name())
    }

    fn require_release(&self) -> Result<&str> {
        self.release_name().context(error::MissingReleaseNameSnafu {
            chart: self.chart.as_str(),
        })
    }

    pub(crate) fn values_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.values).context(error::YamlSnafu {
            action: "serialize helm values",
        })
    }
}

/// Runs `helm` for [`HelmChart`]s.
#[derive(Debug, Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    program: String,
    kubectl: Kubectl,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::from_settings(runner, &Settings::default())
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            kubectl: Kubectl::from_settings(runner.clone(), settings),
            runner,
            program: settings.helm_path.clone(),
        }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(ProcessRunner::new()))
    }

    /// Use `kubectl` (e.g. from [`KindCluster::kubectl`](crate::KindCluster::kubectl)) for the
    /// kube context, the kubeconfig and resource lookups.
    pub fn with_kubectl(mut self, kubectl: Kubectl) -> Self {
        self.kubectl = kubectl;
        self
    }

    fn cmd(&self) -> Cmd {
        let mut cmd = Cmd::new(&self.program);
        if let Some(context) = self.kubectl.context() {
            cmd = cmd.arg("--kube-context").arg(context);
        }
        if let Some(kubeconfig) = self.kubectl.kubeconfig() {
            cmd = cmd.arg("--kubeconfig").arg(kubeconfig.to_string_lossy());
        }
        cmd
    }

    /// `helm install --create-namespace`.
    pub async fn install(&self, chart: &HelmChart) -> Result<String> {
        let release = chart.require_release()?;
        info!(
            "Installing chart '{}' as '{}' in '{}'",
            chart.chart,
            release,
            chart.namespace_name()
        );
        self.deploy(chart, ["install", release, chart.chart.as_str(), "--create-namespace"])
            .await
    }

    pub async fn upgrade(&self, chart: &HelmChart) -> Result<String> {
        let release = chart.require_release()?;
        info!("Upgrading release '{}' in '{}'", release, chart.namespace_name());
        self.deploy(chart, ["upgrade", release, chart.chart.as_str()])
            .await
    }

    /// Start uninstalling the release without waiting for its resources to be gone.
    pub async fn uninstall(&self, chart: &HelmChart) -> Result<()> {
        let release = chart.require_release()?;
        info!("Uninstalling release '{}'", release);
        self.runner
            .run(&self.cmd().args([
                "uninstall",
                release,
                "--namespace",
                chart.namespace_name(),
                "--wait=false",
            ]))
            .await
            .map(|_| ())
    }

    pub async fn status(&self, chart: &HelmChart) -> Result<String> {
        let release = chart.require_release()?;
        self.runner
            .run(&self.cmd().args([
                "status",
                release,
                "--namespace",
                chart.namespace_name(),
            ]))
            .await
    }

    /// One value of the deployed release, computed values included, addressed by a dotted path
    /// such as `image.tag`. `None` if the path does not exist.
    pub async fn value(&self, chart: &HelmChart, path: &str) -> Result<Option<Value>> {
        let release = chart.require_release()?;
        let output = self
            .runner
            .run(&self.cmd().args([
                "get",
                "values",
                release,
                "--namespace",
                chart.namespace_name(),
                "--all",
                "--output",
                "json",
            ]))
            .await?;
        let values: Value = serde_json::from_str(&output).context(error::JsonSnafu {
            what: format!("values of release '{}'", release),
        })?;
        Ok(lookup_path(&values, path).cloned())
    }

    /// Accessors for the pods, secrets and other resources in the chart's namespace.
    pub fn resources(&self, chart: &HelmChart) -> Namespace {
        self.kubectl.namespace(chart.namespace_name())
    }

    async fn deploy<'a, I>(&self, chart: &HelmChart, args: I) -> Result<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut cmd = self
            .cmd()
            .args(args)
            .args(["--namespace", chart.namespace_name()]);
        if chart.wait {
            cmd = cmd.arg("--wait");
        }
        cmd = cmd
            .arg("--timeout")
            .arg(format!("{}s", chart.timeout.as_secs()));
        if chart.dry_run {
            cmd = cmd.arg("--dry-run");
        }
        // The file must outlive the helm call.
        let _values_file = if chart.values.is_empty() {
            None
        } else {
            let file = values_file(chart)?;
            cmd = cmd.arg("--values").arg(file.path().to_string_lossy());
            Some(file)
        };

        match self.runner.run(&cmd).await {
            Ok(stdout) => Ok(stdout),
            Err(e) => {
                self.log_diagnostics(chart).await;
                Err(e)
            }
        }
    }

    async fn log_diagnostics(&self, chart: &HelmChart) {
        let namespace = chart.namespace_name();
        error!(
            "Helm release '{}' failed, collecting diagnostics from '{}'",
            chart.release_name().unwrap_or_default(),
            namespace
        );
        match self.status(chart).await {
            Ok(status) => error!("helm status:\n{}", status),
            Err(e) => warn!("Unable to get helm status: {}", e),
        }
        match self
            .kubectl
            .run(["get", "pods", "-n", namespace, "-o", "wide"])
            .await
        {
            Ok(pods) => error!("Pods in '{}':\n{}", namespace, pods),
            Err(e) => warn!("Unable to list pods in '{}': {}", namespace, e),
        }
        match self
            .kubectl
            .run([
                "get",
                "events",
                "-n",
                namespace,
                "--sort-by=.lastTimestamp",
            ])
            .await
        {
            Ok(events) => error!("Events in '{}':\n{}", namespace, events),
            Err(e) => warn!("Unable to list events in '{}': {}", namespace, e),
        }
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

fn lookup_path<'a>(values: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(values, |value, key| value.as_object()?.get(key))
}

fn values_file(chart: &HelmChart) -> Result<NamedTempFile> {
    let yaml = chart.values_yaml()?;
    let mut file = tempfile::Builder::new()
        .prefix("helm-values-")
        .suffix(".yaml")
        .tempfile()
        .context(error::IoSnafu {
            action: "create helm values file",
        })?;
    file.write_all(yaml.as_bytes()).context(error::IoSnafu {
        action: "write helm values file",
    })?;
    Ok(file)
}
