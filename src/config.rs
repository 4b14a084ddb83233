//! The cluster file: which roles exist and which nodes carry them.
//!
//! A cluster file is YAML. Roles are defined once by name and then referenced from any number of
//! nodes:
//!
//! ```yaml
//! vars:
//!   kafkaVersion: "2.8.2"
//! roles:
//!   ssh:
//!     staticNode:
//!       host: 10.0.0.5
//!       sshUser: ubuntu
//!   zk:
//!     zooKeeper: {}
//! nodes:
//!   node0:
//!     roles: [ssh, zk]
//! ```

use crate::core::node::Inventory;
use crate::core::role::{Role, RoleKind};
use crate::core::{Cluster, Environment};
use crate::logger::Logs;
use crate::uplink::UplinkFactory;
use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The cluster file the CLI reads when none is named.
pub const DEFAULT_CLUSTER_FILE: &str = "cluster.yaml";

/// The name of the working directory under the user's home directory.
const WORKING_DIR_NAME: &str = ".rampart";

/// Returns `~/.rampart`, or [None] if the home directory can't be determined.
pub fn default_working_dir() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(WORKING_DIR_NAME))
}

/// A parsed cluster file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    /// Operator-supplied variables. These outrank every role-supplied variable.
    #[serde(default)]
    pub vars: IndexMap<String, String>,

    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub roles: IndexMap<String, Role>,

    #[serde(default)]
    pub nodes: IndexMap<String, NodeConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeConfig {
    /// Names of entries in [ClusterConfig::roles], in the order their actions are created.
    pub roles: Vec<String>,
}

impl ClusterConfig {
    /// Reads and validates the cluster file at `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("could not read cluster file {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("invalid cluster file {}", path.display()))
    }

    /// Parses and validates a cluster file's contents.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every role reference resolves and that every node says where it lives.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (node, node_config) in &self.nodes {
            let mut placements = 0;
            for role_name in &node_config.roles {
                let Some(role) = self.roles.get(role_name) else {
                    bail!("node {node} refers to undefined role {role_name:?}");
                };
                if matches!(role.kind(), RoleKind::StaticNode | RoleKind::CloudNode) {
                    placements += 1;
                }
            }
            match placements {
                1 => {}
                0 => bail!("node {node} needs exactly one staticNode or cloudNode role, but has none"),
                n => bail!("node {node} needs exactly one staticNode or cloudNode role, but has {n}"),
            }
        }
        Ok(())
    }

    /// Builds a [Cluster] from this configuration.
    ///
    /// Each node gets a log file in `logs` and an uplink from `uplinks`. `inventory` usually
    /// holds what earlier runs discovered.
    pub fn assemble(
        &self,
        env: Environment,
        logs: &Logs,
        uplinks: &dyn UplinkFactory,
        inventory: Arc<Inventory>,
    ) -> anyhow::Result<Cluster> {
        // Nodes that share a role definition share one allocation.
        let roles: IndexMap<&str, Arc<Role>> = self
            .roles
            .iter()
            .map(|(name, role)| (name.as_str(), Arc::new(role.clone())))
            .collect();

        let mut builder = Cluster::builder(env)
            .inventory(Arc::clone(&inventory))
            .log(logs.cluster_log());

        for (name, value) in &self.vars {
            builder = builder.var(name, value);
        }

        for (node, node_config) in &self.nodes {
            let node_roles = node_config
                .roles
                .iter()
                .map(|role_name| {
                    let role = roles
                        .get(role_name.as_str())
                        .with_context(|| format!("node {node} refers to undefined role {role_name:?}"))?;
                    Ok((role_name.clone(), Arc::clone(role)))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let log = logs
                .node_log(node)
                .with_context(|| format!("could not open the log file for {node}"))?;
            let uplink = uplinks
                .uplink(node, &node_roles, log.clone(), &inventory)
                .with_context(|| format!("could not set up an uplink for {node}"))?;
            builder = builder.node(node, node_roles, log, uplink);
        }

        builder.build()
    }
}
