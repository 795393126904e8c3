//! Parsing of `docker` output. This is the only place that knows the shape of the engine's
//! formatted output; everything else works with the types in [`super::engine`].

use super::engine::{ContainerDetails, ContainerState, ContainerSummary, PortBinding};
use crate::error::{self, Result};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: ContainerState,
    #[serde(default)]
    network_settings: RawNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkSettings {
    /// Ports that are exposed but not published map to `null`.
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

/// Parse the JSON array printed by `docker inspect` for a single container.
pub(crate) fn inspect(output: &str) -> Result<ContainerDetails> {
    let raw: Vec<RawInspect> = serde_json::from_str(output).context(error::JsonSnafu {
        what: "docker inspect",
    })?;
    let raw = raw.into_iter().next().context(error::NotFoundSnafu {
        what: "a container in docker inspect output",
    })?;
    let ports = raw
        .network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, bindings)| (port, bindings.unwrap_or_default()))
        .collect();
    Ok(ContainerDetails {
        id: raw.id,
        name: strip_separator(&raw.name).to_string(),
        state: raw.state,
        ports,
    })
}

/// Parse `docker ps --format '{{json .}}'` output, one JSON object per line.
pub(crate) fn summaries(output: &str) -> Result<Vec<ContainerSummary>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| -> Result<ContainerSummary> {
            let raw: RawSummary = serde_json::from_str(line).context(error::JsonSnafu {
                what: "docker ps",
            })?;
            Ok(ContainerSummary {
                id: raw.id,
                names: raw
                    .names
                    .split(',')
                    .map(|name| strip_separator(name.trim()).to_string())
                    .filter(|name| !name.is_empty())
                    .collect(),
                state: raw.state,
                status: raw.status,
            })
        })
        .collect()
}

/// Pick the container whose name is exactly `name`. The engine's name filter matches substrings,
/// so `db` would otherwise also select `db-replica`.
pub(crate) fn exact_name_match(
    summaries: Vec<ContainerSummary>,
    name: &str,
) -> Option<ContainerSummary> {
    summaries
        .into_iter()
        .find(|summary| summary.names.iter().any(|candidate| candidate == name))
}

/// The id printed by `docker create`.
pub(crate) fn created_id(output: &str) -> Result<String> {
    let id = output.lines().last().unwrap_or_default().trim();
    snafu::ensure!(
        !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit()),
        error::UnexpectedOutputSnafu {
            what: "docker create",
            output
        }
    );
    Ok(id.to_string())
}

fn strip_separator(name: &str) -> &str {
    name.trim_start_matches('/')
}
