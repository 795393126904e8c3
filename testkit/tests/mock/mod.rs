/*!

An in-memory [`ContainerEngine`] so that the lifecycle controller and the workloads built on it
can be tested without docker. Containers can be told to die after a number of inspections, and
host ports can be pinned so that probes reach a local test server.

!*/

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use testkit::container::{ContainerDetails, ContainerState, ContainerSummary, PortBinding};
use testkit::{Cmd, CommandOutput, ContainerEngine, ContainerSpec, Error, Result};

const FIRST_HOST_PORT: u16 = 49153;

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    running: bool,
    exit_code: i64,
    /// Container port to host port.
    ports: BTreeMap<u16, u16>,
}

#[derive(Debug, Default)]
struct State {
    images: BTreeSet<String>,
    containers: BTreeMap<String, FakeContainer>,
    next_id: u32,
    next_host_port: u16,
    pinned_ports: BTreeMap<u16, u16>,
    /// Running containers exit once they have been inspected this many times.
    exit_after_inspects: Option<u32>,
    inspects: u32,
    fail_start: bool,
    fail_find: bool,
    fail_stop: bool,
    creates: u32,
    pulls: u32,
    calls: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `image` has already been pulled.
    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Add a container named `name` as if a previous run had left it behind.
    pub fn with_existing(self, id: &str, name: &str, running: bool) -> Self {
        self.state.lock().unwrap().containers.insert(
            id.to_string(),
            FakeContainer {
                name: name.to_string(),
                running,
                exit_code: 0,
                ports: BTreeMap::new(),
            },
        );
        self
    }

    /// Every running container stops after `inspects` inspections in total.
    pub fn exit_after_inspects(self, inspects: u32) -> Self {
        self.state.lock().unwrap().exit_after_inspects = Some(inspects);
        self
    }

    pub fn fail_start(self) -> Self {
        self.state.lock().unwrap().fail_start = true;
        self
    }

    /// Looking containers up by name fails, as if the engine could not be listed.
    pub fn fail_find(self) -> Self {
        self.state.lock().unwrap().fail_find = true;
        self
    }

    /// Stopping any container fails and leaves it running.
    pub fn fail_stop(self) -> Self {
        self.state.lock().unwrap().fail_stop = true;
        self
    }

    /// Publish `container_port` on `host_port` whenever the `ContainerSpec` leaves the choice to the engine.
    pub fn pin_port(self, container_port: u16, host_port: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .pinned_ports
            .insert(container_port, host_port);
        self
    }

    pub fn creates(&self) -> u32 {
        self.state.lock().unwrap().creates
    }

    pub fn pulls(&self) -> u32 {
        self.state.lock().unwrap().pulls
    }

    pub fn inspects(&self) -> u32 {
        self.state.lock().unwrap().inspects
    }

    /// Calls in order, e.g. `start c1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Stop a container behind the controller's back.
    pub fn kill(&self, id: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.running = false;
            container.exit_code = 137;
        }
    }
}

/// A failed engine command with `stderr`.
fn engine_error(action: &str, id: &str, code: i32, stderr: &str) -> Error {
    let cmd = Cmd::new("fake-engine").arg(action).arg(id);
    CommandOutput {
        code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
    .check(&cmd)
    .unwrap_err()
}

/// The error the engine gives for an unknown container.
fn no_such_container(action: &str, id: &str) -> Error {
    engine_error(action, id, 1, &format!("Error: No such container: {}", id))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("image_exists {}", image));
        Ok(state.images.contains(image))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("pull {}", image));
        state.pulls += 1;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.calls.push(format!("create {}", spec.name()));
        let mut ports = BTreeMap::new();
        for (container_port, host_port) in spec.ports() {
            let host_port = match (*host_port, state.pinned_ports.get(container_port).copied()) {
                (0, Some(pinned)) => pinned,
                (0, None) => {
                    let port = FIRST_HOST_PORT + state.next_host_port;
                    state.next_host_port += 1;
                    port
                }
                (requested, _) => requested,
            };
            ports.insert(*container_port, host_port);
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name().to_string(),
                running: false,
                exit_code: 0,
                ports,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start {}", id));
        if state.fail_start {
            return Err(engine_error("start", id, 125, "port is already allocated"));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| no_such_container("start", id))?;
        container.running = true;
        container.exit_code = 0;
        Ok(())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop {}", id));
        if state.fail_stop {
            return Err(engine_error(
                "stop",
                id,
                1,
                "tried to kill container, but did not receive an exit event",
            ));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| no_such_container("stop", id))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {}", id));
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| no_such_container("remove", id))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("inspect {}", id));
        state.inspects += 1;
        let inspects = state.inspects;
        let exit_after = state.exit_after_inspects;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| no_such_container("inspect", id))?;
        if let Some(limit) = exit_after {
            if container.running && inspects > limit {
                container.running = false;
                container.exit_code = 1;
            }
        }
        let ports = container
            .ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    format!("{}/tcp", container_port),
                    vec![PortBinding {
                        host_ip: "0.0.0.0".to_string(),
                        host_port: host_port.to_string(),
                    }],
                )
            })
            .collect();
        Ok(ContainerDetails {
            id: id.to_string(),
            name: container.name.clone(),
            state: ContainerState {
                status: if container.running { "running" } else { "exited" }.to_string(),
                running: container.running,
                exit_code: container.exit_code,
                ..Default::default()
            },
            ports,
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerSummary>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("find_by_name {}", name));
        if state.fail_find {
            return Err(engine_error(
                "ps",
                name,
                1,
                "Cannot connect to the Docker daemon",
            ));
        }
        Ok(state
            .containers
            .iter()
            .find(|(_, container)| container.name == name)
            .map(|(id, container)| ContainerSummary {
                id: id.clone(),
                names: vec![container.name.clone()],
                state: if container.running { "running" } else { "exited" }.to_string(),
                status: if container.running {
                    "Up 5 minutes".to_string()
                } else {
                    "Exited (0) 5 minutes ago".to_string()
                },
            }))
    }

    async fn logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("logs {}", id));
        if !state.containers.contains_key(id) {
            return Err(no_such_container("logs", id));
        }
        let lines = tail.unwrap_or(2).min(2);
        Ok(["starting", "listening"][..lines].join("\n"))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("exec {} {}", id, cmd.join(" ")));
        match cmd.first().map(String::as_str) {
            Some("echo") => Ok(CommandOutput {
                code: 0,
                stdout: format!("{}\n", cmd[1..].join(" ")),
                stderr: String::new(),
            }),
            _ => Ok(CommandOutput {
                code: 127,
                stdout: String::new(),
                stderr: "command not found".to_string(),
            }),
        }
    }
}
