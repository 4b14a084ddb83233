//! Persists what provisioning discovered, so later runs can find the same machines.
//!
//! `up` records the instance IDs and addresses of the nodes it creates; `down`, usually run by a
//! separate invocation, needs them to terminate those instances.

use crate::core::node::{Discovered, Inventory};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// The state file's name inside the working directory.
pub const STATE_FILE: &str = "cluster-state.yaml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterState {
    #[serde(default)]
    nodes: BTreeMap<String, Discovered>,
}

/// Loads the inventory saved in `working_dir`. A missing state file yields an empty inventory.
pub fn load(working_dir: &Path) -> anyhow::Result<Inventory> {
    let path = working_dir.join(STATE_FILE);
    let yaml = match fs::read_to_string(&path) {
        Ok(yaml) => yaml,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Inventory::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("could not read {}", path.display()));
        }
    };
    let state: ClusterState = serde_yaml::from_str(&yaml)
        .with_context(|| format!("could not parse {}", path.display()))?;
    Ok(Inventory::from_map(state.nodes))
}

/// Writes `inventory` to `working_dir`, replacing any earlier state.
///
/// The file is written beside its final location and renamed into place, so a crash mid-write
/// leaves the previous state intact.
pub fn save(working_dir: &Path, inventory: &Inventory) -> anyhow::Result<()> {
    let path = working_dir.join(STATE_FILE);
    let state = ClusterState {
        nodes: inventory.snapshot(),
    };
    let yaml = serde_yaml::to_string(&state)?;

    fs::create_dir_all(working_dir)
        .with_context(|| format!("could not create {}", working_dir.display()))?;
    let mut file = NamedTempFile::new_in(working_dir)?;
    file.write_all(yaml.as_bytes())?;
    file.persist(&path)
        .with_context(|| format!("could not write {}", path.display()))?;
    tracing::debug!(path = %path.display(), nodes = state.nodes.len(), "Saved cluster state");
    Ok(())
}
