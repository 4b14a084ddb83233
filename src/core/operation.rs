//! Choosing which of a cluster's actions take part in a run.

use crate::core::action::{kind, Daemon};
use crate::core::{Action, Cluster};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What the operator wants done to the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Provision every node and start every daemon.
    Up,
    /// Check that every daemon is running.
    Status,
    /// Stop every daemon, leaving the nodes in place.
    Stop,
    /// Stop every daemon, save logs, and release every node.
    Down,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Up,
        Operation::Status,
        Operation::Stop,
        Operation::Down,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Up => "up",
            Operation::Status => "status",
            Operation::Stop => "stop",
            Operation::Down => "down",
        }
    }

    /// Reports whether actions of `action_kind` take part in this operation.
    pub fn includes(self, action_kind: &str) -> bool {
        let daemon = |f: fn(Daemon) -> &'static str| {
            Daemon::ALL.into_iter().any(|d| f(d) == action_kind)
        };
        match self {
            Operation::Up => {
                [kind::INIT, kind::UPLINK_CHECK, kind::UBUNTU_SETUP].contains(&action_kind)
                    || daemon(Daemon::start_kind)
            }
            Operation::Status => daemon(Daemon::status_kind),
            Operation::Stop => daemon(Daemon::stop_kind),
            Operation::Down => {
                [kind::SAVE_LOGS, kind::DESTROY].contains(&action_kind)
                    || daemon(Daemon::stop_kind)
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown operation {0:?}; expected one of up, status, stop, down")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|operation| operation.name() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// An operation, optionally narrowed to some nodes and some roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub operation: Operation,

    /// Node names to include. [None] includes every node.
    pub nodes: Option<BTreeSet<String>>,

    /// Role names, as given in the cluster file, to include. [None] includes every role.
    pub roles: Option<BTreeSet<String>>,
}

impl Selection {
    /// Selects every action of `operation` on every node.
    pub fn new(operation: Operation) -> Self {
        Selection {
            operation,
            nodes: None,
            roles: None,
        }
    }

    /// Returns the selected actions in cluster-file order.
    ///
    /// Selecting only part of a cluster may leave a dependency unresolved, for example a daemon
    /// start selected without its node's `init`. Graph construction rejects that.
    pub fn select(&self, cluster: &Cluster) -> Vec<Action> {
        let wanted = |filter: &Option<BTreeSet<String>>, name: &str| {
            filter.as_ref().map_or(true, |names| names.contains(name))
        };

        let mut actions = Vec::new();
        for node in cluster.nodes().filter(|node| wanted(&self.nodes, node.name())) {
            for (role_name, role) in node.roles() {
                if !wanted(&self.roles, role_name) {
                    continue;
                }
                actions.extend(
                    role.create_actions(node.name())
                        .into_iter()
                        .filter(|action| self.operation.includes(action.id().kind())),
                );
            }
        }
        actions
    }
}
