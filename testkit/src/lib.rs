/*!

`testkit` provides the moving parts of integration tests that need real infrastructure: containers
that are started, checked for stability and probed for readiness before use, `kind` clusters,
`kubectl` and `helm` wrappers, and a client for the Mission Control API.

External tools are driven through a [`CommandRunner`] and containers through a
[`ContainerEngine`], so that everything above those seams can be tested without docker.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use config::Settings;
pub use container::{
    ActiveMq, ActiveMqCredentials, Container, ContainerEngine, ContainerHandle, ContainerSpec,
    DockerCli, HttpService, SqlServer,
};
pub use error::{Error, Result};
pub use helm::{Helm, HelmChart};
pub use kind::KindCluster;
pub use kubectl::Kubectl;
pub use mission_control::MissionControl;
pub use must::MustSucceed;
pub use poll::{wait_until_ready, Diagnostics, ReadinessProbe, RetryPolicy};
pub use probe::HttpStatusProbe;
pub use process::{Cmd, CommandOutput, CommandRunner, ProcessRunner};
pub use tokio_util::sync::CancellationToken;

pub mod config;
pub mod container;
mod error;
pub mod helm;
pub mod kind;
pub mod kubectl;
pub mod mission_control;
mod must;
pub mod poll;
pub mod probe;
pub mod process;
