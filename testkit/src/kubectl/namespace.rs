use super::{ConfigMapRef, ItemList, Kubectl, PodRef, PvcRef, SecretRef, StatefulSetRef};
use crate::error::{self, Result};
use k8s_openapi::api::core::v1::Pod;
use log::{debug, info};
use snafu::OptionExt;

/// A namespace in the cluster `kubectl` points at.
#[derive(Debug, Clone)]
pub struct Namespace {
    kubectl: Kubectl,
    name: String,
}

impl Namespace {
    pub(crate) fn new<S: Into<String>>(kubectl: Kubectl, name: S) -> Self {
        Self {
            kubectl,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the namespace. An existing namespace is not an error.
    pub async fn create(&self) -> Result<()> {
        let cmd = self
            .kubectl
            .cmd()
            .args(["create", "namespace", self.name.as_str()]);
        let output = self.kubectl.runner().output(&cmd).await?;
        if !output.success() && output.stderr.contains("already exists") {
            debug!("Namespace '{}' already exists", self.name);
            return Ok(());
        }
        output.check(&cmd)?;
        info!("Created namespace '{}'", self.name);
        Ok(())
    }

    /// Start deleting the namespace without waiting for it to be gone.
    pub async fn delete(&self) -> Result<()> {
        self.kubectl
            .run(["delete", "namespace", self.name.as_str(), "--wait=false"])
            .await?;
        info!("Deleting namespace '{}'", self.name);
        Ok(())
    }

    /// The pods matching all of `selectors` (e.g. `app=web`), or every pod if there are none.
    pub async fn pods(&self, selectors: &[&str]) -> Result<Vec<Pod>> {
        let mut args = vec![
            "get".to_string(),
            "pods".to_string(),
            "-n".to_string(),
            self.name.clone(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let selector = selectors.join(",");
        if !selector.is_empty() {
            args.push("-l".to_string());
            args.push(selector);
        }
        let list: ItemList<Pod> = self.kubectl.json("pod list", args).await?;
        Ok(list.items)
    }

    pub fn pod<S: Into<String>>(&self, name: S) -> PodRef {
        PodRef::by_name(self.kubectl.clone(), &self.name, name)
    }

    /// A pod found by label selector. The name is resolved from the first match when needed.
    pub fn pod_matching<S: Into<String>>(&self, selector: S) -> PodRef {
        PodRef::by_selector(self.kubectl.clone(), &self.name, selector)
    }

    pub fn statefulset<S: Into<String>>(&self, name: S) -> StatefulSetRef {
        StatefulSetRef::new(self.kubectl.clone(), &self.name, name)
    }

    pub fn secret<S: Into<String>>(&self, name: S) -> SecretRef {
        SecretRef::new(self.kubectl.clone(), &self.name, name)
    }

    pub fn configmap<S: Into<String>>(&self, name: S) -> ConfigMapRef {
        ConfigMapRef::new(self.kubectl.clone(), &self.name, name)
    }

    pub fn pvc<S: Into<String>>(&self, name: S) -> PvcRef {
        PvcRef::new(self.kubectl.clone(), &self.name, name)
    }
}

/// Fails with [`NotFound`](crate::Error::NotFound) if `pods` is empty.
pub(crate) fn first_pod_name(pods: &[Pod], what: &str) -> Result<String> {
    pods.iter()
        .find_map(|pod| pod.metadata.name.clone())
        .context(error::NotFoundSnafu { what })
}
