use super::{data_jsonpath, timeout_arg, Kubectl};
use crate::error::{self, Result};
use snafu::{OptionExt, ResultExt};
use std::time::Duration;

/// How long a rollout is given by [`StatefulSetRef::wait_ready`].
pub const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(120);

/// Parses a jsonpath number. Kubernetes omits zero counters, so empty output is `0`.
fn parse_count<T>(what: &str, output: &str) -> Result<T>
where
    T: std::str::FromStr + Default,
{
    let output = output.trim();
    if output.is_empty() {
        return Ok(T::default());
    }
    output.parse().ok().context(error::UnexpectedOutputSnafu {
        what,
        output,
    })
}

#[derive(Debug, Clone)]
pub struct StatefulSetRef {
    kubectl: Kubectl,
    namespace: String,
    name: String,
}

impl StatefulSetRef {
    pub(crate) fn new<S: Into<String>>(kubectl: Kubectl, namespace: &str, name: S) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: name.into(),
        }
    }

    pub async fn wait_ready(&self) -> Result<()> {
        self.wait_for(ROLLOUT_TIMEOUT).await
    }

    /// Wait for the rollout to finish.
    pub async fn wait_for(&self, timeout: Duration) -> Result<()> {
        self.kubectl
            .run([
                "rollout".to_string(),
                "status".to_string(),
                "statefulset".to_string(),
                self.name.clone(),
                "-n".to_string(),
                self.namespace.clone(),
                timeout_arg(timeout),
            ])
            .await
            .map(|_| ())
    }

    async fn jsonpath(&self, path: &str) -> Result<String> {
        let output = format!("jsonpath={{{}}}", path);
        self.kubectl
            .run([
                "get",
                "statefulset",
                self.name.as_str(),
                "-n",
                self.namespace.as_str(),
                "-o",
                output.as_str(),
            ])
            .await
    }

    pub async fn ready_replicas(&self) -> Result<i32> {
        let output = self.jsonpath(".status.readyReplicas").await?;
        parse_count("readyReplicas", &output)
    }

    pub async fn generation(&self) -> Result<i64> {
        let output = self.jsonpath(".metadata.generation").await?;
        parse_count("generation", &output)
    }
}

#[derive(Debug, Clone)]
pub struct SecretRef {
    kubectl: Kubectl,
    namespace: String,
    name: String,
}

impl SecretRef {
    pub(crate) fn new<S: Into<String>>(kubectl: Kubectl, namespace: &str, name: S) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: name.into(),
        }
    }

    /// The decoded value of `key`.
    pub async fn get(&self, key: &str) -> Result<String> {
        let jsonpath = data_jsonpath(key);
        let encoded = self
            .kubectl
            .run([
                "get",
                "secret",
                self.name.as_str(),
                "-n",
                self.namespace.as_str(),
                "-o",
                jsonpath.as_str(),
            ])
            .await?;
        let decoded =
            base64::decode(encoded.trim().as_bytes()).context(error::Base64Snafu { key })?;
        Ok(String::from_utf8_lossy(&decoded).to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigMapRef {
    kubectl: Kubectl,
    namespace: String,
    name: String,
}

impl ConfigMapRef {
    pub(crate) fn new<S: Into<String>>(kubectl: Kubectl, namespace: &str, name: S) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: name.into(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<String> {
        let jsonpath = data_jsonpath(key);
        self.kubectl
            .run([
                "get",
                "configmap",
                self.name.as_str(),
                "-n",
                self.namespace.as_str(),
                "-o",
                jsonpath.as_str(),
            ])
            .await
    }
}

#[derive(Debug, Clone)]
pub struct PvcRef {
    kubectl: Kubectl,
    namespace: String,
    name: String,
}

impl PvcRef {
    pub(crate) fn new<S: Into<String>>(kubectl: Kubectl, namespace: &str, name: S) -> Self {
        Self {
            kubectl,
            namespace: namespace.to_string(),
            name: name.into(),
        }
    }

    /// The claim as returned by `kubectl get pvc -o json`.
    pub async fn status(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.kubectl
            .json(
                "persistent volume claim",
                [
                    "get",
                    "pvc",
                    self.name.as_str(),
                    "-n",
                    self.namespace.as_str(),
                    "-o",
                    "json",
                ],
            )
            .await
    }
}
