use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a [`Mount`] binds a host path or attaches a named volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
}

/// A host path or named volume made available inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path for a bind mount, or the volume name.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub kind: MountKind,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    pub fn bind<S: Into<String>, T: Into<String>>(source: S, target: T) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: MountKind::Bind,
            read_only: false,
        }
    }

    pub fn volume<S: Into<String>, T: Into<String>>(name: S, target: T) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            kind: MountKind::Volume,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// The configuration of a managed container. A `ContainerSpec` is assembled with its builder
/// methods and then handed to a [`Container`](super::Container), which never changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    image: String,
    name: String,
    /// Container port to requested host port. A host port of `0` lets the engine pick one.
    #[serde(default)]
    ports: BTreeMap<u16, u16>,
    /// `KEY=VALUE` entries.
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    mounts: Vec<Mount>,
    /// Prefer an existing container named `name` over creating a new one, and keep the container
    /// around on cleanup.
    #[serde(default)]
    reuse: bool,
}

impl ContainerSpec {
    pub fn new<I: Into<String>, N: Into<String>>(image: I, name: N) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            ports: BTreeMap::new(),
            env: Vec::new(),
            mounts: Vec::new(),
            reuse: false,
        }
    }

    /// Publish `container_port` on `host_port`, or on an engine assigned port if `host_port` is 0.
    pub fn port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Publish `container_port` on an engine assigned host port.
    pub fn expose(self, container_port: u16) -> Self {
        self.port(container_port, 0)
    }

    pub fn env<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.env
            .push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    /// Add a raw `KEY=VALUE` entry.
    pub fn env_entry<S: Into<String>>(mut self, entry: S) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &BTreeMap<u16, u16> {
        &self.ports
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn is_reuse(&self) -> bool {
        self.reuse
    }
}
