//! Cluster members and the attributes discovered about them at run time.

use crate::core::role::{Role, RoleKind};
use crate::logger::NodeLog;
use crate::uplink::Uplink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// One member of the cluster.
pub struct Node {
    name: String,

    /// The node's position in the cluster file, starting at 0.
    index: usize,

    /// Role names from the cluster file, paired with the roles they refer to.
    roles: Vec<(String, Arc<Role>)>,

    log: NodeLog,
    uplink: Box<dyn Uplink>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        index: usize,
        roles: Vec<(String, Arc<Role>)>,
        log: NodeLog,
        uplink: Box<dyn Uplink>,
    ) -> Self {
        Node {
            name: name.into(),
            index,
            roles,
            log,
            uplink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn roles(&self) -> &[(String, Arc<Role>)] {
        &self.roles
    }

    pub fn has_role(&self, kind: RoleKind) -> bool {
        self.roles.iter().any(|(_, role)| role.kind() == kind)
    }

    pub fn log(&self) -> &NodeLog {
        &self.log
    }

    pub fn uplink(&self) -> &dyn Uplink {
        self.uplink.as_ref()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// What provisioning has learned about a node. Empty strings mean "not known yet".
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Discovered {
    pub private_dns: String,
    pub public_dns: String,
    pub instance_id: String,
}

impl Discovered {
    /// The address other nodes should use: the private one if known, else the public one.
    pub fn internal_dns(&self) -> &str {
        match self.private_dns.is_empty() {
            true => &self.public_dns,
            false => &self.private_dns,
        }
    }

    /// The address to reach the node from outside, falling back to the private one.
    pub fn external_dns(&self) -> &str {
        match self.public_dns.is_empty() {
            true => &self.private_dns,
            false => &self.public_dns,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Discovered attributes for every node, keyed by node name.
///
/// Only provisioning actions write here, through [Inventory::update]. Everything else reads,
/// and must depend on the writing action to see its result.
#[derive(Debug, Default)]
pub struct Inventory {
    nodes: RwLock<BTreeMap<String, Discovered>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(nodes: BTreeMap<String, Discovered>) -> Self {
        Inventory {
            nodes: RwLock::new(nodes),
        }
    }

    /// Returns a copy of what is known about `node`. Unknown nodes yield an empty record.
    pub fn get(&self, node: &str) -> Discovered {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(node).cloned().unwrap_or_default()
    }

    /// Modifies the record for `node`, creating it if needed.
    pub fn update(&self, node: &str, f: impl FnOnce(&mut Discovered)) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        f(nodes.entry(node.to_string()).or_default());
    }

    /// Drops everything known about `node`.
    pub fn forget(&self, node: &str) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.remove(node);
    }

    /// Returns a copy of every non-empty record.
    pub fn snapshot(&self) -> BTreeMap<String, Discovered> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .iter()
            .filter(|(_, discovered)| !discovered.is_empty())
            .map(|(name, discovered)| (name.clone(), discovered.clone()))
            .collect()
    }
}
