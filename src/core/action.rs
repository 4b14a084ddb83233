//! Types for representing individual actions.
//!
//! An [Action] pairs scheduling metadata (its [ActionId], the [TargetId]s it waits for, and an
//! optional initial delay) with a [Work] value that says what it actually does. Dispatch over
//! [Work] is an exhaustive `match` in [Action::call], so adding a variant forces every caller to
//! account for it. [Work::Procedure] stays open for library users and tests that need an action
//! the crate doesn't know about.

mod broker;
mod logs;
pub mod paths;
mod process;
mod provision;
mod setup;
mod trogdor;
mod zookeeper;

use crate::core::role::{BrokerRole, CloudNodeRole, StaticNodeRole, TrogdorRole, ZooKeeperRole};
use crate::core::{ActionId, Cluster, Node, TargetId};
use anyhow::Context;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The action kinds that are not tied to a particular daemon.
pub mod kind {
    pub const INIT: &str = "init";
    pub const UPLINK_CHECK: &str = "uplinkCheck";
    pub const UBUNTU_SETUP: &str = "ubuntuSetup";
    pub const SAVE_LOGS: &str = "saveLogs";
    pub const DESTROY: &str = "destroy";
}

/// A long-running Java process that rampart starts, checks, and stops on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Daemon {
    ZooKeeper,
    Broker,
    TrogdorAgent,
    TrogdorCoordinator,
}

impl Daemon {
    pub const ALL: [Daemon; 4] = [
        Daemon::ZooKeeper,
        Daemon::Broker,
        Daemon::TrogdorAgent,
        Daemon::TrogdorCoordinator,
    ];

    pub fn start_kind(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => "zooKeeperStart",
            Daemon::Broker => "brokerStart",
            Daemon::TrogdorAgent => "trogdorAgentStart",
            Daemon::TrogdorCoordinator => "trogdorCoordinatorStart",
        }
    }

    pub fn status_kind(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => "zooKeeperStatus",
            Daemon::Broker => "brokerStatus",
            Daemon::TrogdorAgent => "trogdorAgentStatus",
            Daemon::TrogdorCoordinator => "trogdorCoordinatorStatus",
        }
    }

    pub fn stop_kind(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => "zooKeeperStop",
            Daemon::Broker => "brokerStop",
            Daemon::TrogdorAgent => "trogdorAgentStop",
            Daemon::TrogdorCoordinator => "trogdorCoordinatorStop",
        }
    }

    /// The main class of the daemon's JVM, used to find its process.
    pub fn class_name(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => "org.apache.zookeeper.server.quorum.QuorumPeerMain",
            Daemon::Broker => "kafka.Kafka",
            Daemon::TrogdorAgent => "org.apache.kafka.trogdor.agent.Agent",
            Daemon::TrogdorCoordinator => "org.apache.kafka.trogdor.coordinator.Coordinator",
        }
    }

    /// A file-name-safe name, used for the daemon's directory among saved logs.
    pub fn slug(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => "zookeeper",
            Daemon::Broker => "broker",
            Daemon::TrogdorAgent => "trogdor-agent",
            Daemon::TrogdorCoordinator => "trogdor-coordinator",
        }
    }

    /// The remote directory holding the daemon's logs.
    pub fn log_dir(self) -> &'static str {
        match self {
            Daemon::ZooKeeper => paths::ZK_LOGS,
            Daemon::Broker => paths::KAFKA_LOGS,
            Daemon::TrogdorAgent => paths::TROGDOR_AGENT_LOGS,
            Daemon::TrogdorCoordinator => paths::TROGDOR_COORDINATOR_LOGS,
        }
    }
}

impl fmt::Display for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Daemon::ZooKeeper => "ZooKeeper",
            Daemon::Broker => "broker",
            Daemon::TrogdorAgent => "Trogdor agent",
            Daemon::TrogdorCoordinator => "Trogdor coordinator",
        };
        f.write_str(name)
    }
}

/// Which half of Trogdor a [Work::StartTrogdor] launches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trogdor {
    Agent,
    Coordinator,
}

impl Trogdor {
    pub fn daemon(self) -> Daemon {
        match self {
            Trogdor::Agent => Daemon::TrogdorAgent,
            Trogdor::Coordinator => Daemon::TrogdorCoordinator,
        }
    }
}

/// The signature of a [Work::Procedure].
pub type Procedure = Arc<dyn Fn(&Cluster, Option<&Node>) -> anyhow::Result<()> + Send + Sync>;

/// What an action does when it runs.
#[derive(Clone)]
pub enum Work {
    /// Records the configured addresses of an existing machine.
    ProvisionStatic(StaticNodeRole),

    /// Creates a machine through the cloud provider, or reuses the one already recorded, and
    /// waits until its addresses are known.
    ProvisionCloud(CloudNodeRole),

    /// Waits until the node accepts commands.
    CheckUplink,

    /// Installs the base packages and a JDK through `apt-get`.
    SetupUbuntu { jdk_package: String },

    StartZooKeeper(ZooKeeperRole),
    StartBroker(BrokerRole),
    StartTrogdor(Trogdor, TrogdorRole),

    /// Succeeds iff the daemon is running.
    Status(Daemon),

    /// Stops the daemon and waits for its process to exit.
    Stop(Daemon),

    /// Copies the logs of every daemon the node runs into the working directory.
    SaveLogs,

    /// Clears the daemons' data from an existing machine.
    DestroyStatic,

    /// Terminates the machine created by [Work::ProvisionCloud].
    DestroyCloud,

    /// Arbitrary code.
    Procedure(Procedure),
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::ProvisionStatic(role) => f.debug_tuple("ProvisionStatic").field(role).finish(),
            Work::ProvisionCloud(role) => f.debug_tuple("ProvisionCloud").field(role).finish(),
            Work::CheckUplink => f.write_str("CheckUplink"),
            Work::SetupUbuntu { jdk_package } => f
                .debug_struct("SetupUbuntu")
                .field("jdk_package", jdk_package)
                .finish(),
            Work::StartZooKeeper(role) => f.debug_tuple("StartZooKeeper").field(role).finish(),
            Work::StartBroker(role) => f.debug_tuple("StartBroker").field(role).finish(),
            Work::StartTrogdor(which, role) => f
                .debug_tuple("StartTrogdor")
                .field(which)
                .field(role)
                .finish(),
            Work::Status(daemon) => f.debug_tuple("Status").field(daemon).finish(),
            Work::Stop(daemon) => f.debug_tuple("Stop").field(daemon).finish(),
            Work::SaveLogs => f.write_str("SaveLogs"),
            Work::DestroyStatic => f.write_str("DestroyStatic"),
            Work::DestroyCloud => f.write_str("DestroyCloud"),
            Work::Procedure(_) => f.write_str("Procedure(..)"),
        }
    }
}

/// A unit of work bound to one node (or to the whole cluster), plus what it waits for.
#[derive(Clone, Debug)]
pub struct Action {
    id: ActionId,

    /// Deduplicated, in declaration order.
    dependencies: Vec<TargetId>,

    initial_delay: Duration,

    work: Work,
}

impl Action {
    pub fn new(id: ActionId, work: Work) -> Self {
        Action {
            id,
            dependencies: Vec::new(),
            initial_delay: Duration::ZERO,
            work,
        }
    }

    /// Creates an action that runs `procedure`.
    pub fn procedure(
        id: ActionId,
        procedure: impl Fn(&Cluster, Option<&Node>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(id, Work::Procedure(Arc::new(procedure)))
    }

    /// Adds dependencies. Targets already present are ignored.
    pub fn after(mut self, targets: impl IntoIterator<Item = TargetId>) -> Self {
        for target in targets {
            if !self.dependencies.contains(&target) {
                self.dependencies.push(target);
            }
        }
        self
    }

    /// Sets how long the action waits, once ready, before it starts.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn id(&self) -> &ActionId {
        &self.id
    }

    pub fn dependencies(&self) -> &[TargetId] {
        &self.dependencies
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    /// Performs the action's work.
    ///
    /// `node` is [None] only for a cluster-wide action. Every variant except [Work::Procedure]
    /// needs a node.
    pub fn call(&self, cluster: &Cluster, node: Option<&Node>) -> anyhow::Result<()> {
        let on_node = || node.with_context(|| format!("{} must run on a node", self.id));

        match &self.work {
            Work::ProvisionStatic(role) => provision::provision_static(cluster, on_node()?, role),
            Work::ProvisionCloud(role) => provision::provision_cloud(cluster, on_node()?, role),
            Work::CheckUplink => provision::check_uplink(cluster, on_node()?),
            Work::SetupUbuntu { jdk_package } => {
                setup::setup_ubuntu(cluster, on_node()?, jdk_package)
            }
            Work::StartZooKeeper(role) => zookeeper::start(cluster, on_node()?, role),
            Work::StartBroker(role) => broker::start(cluster, on_node()?, role),
            Work::StartTrogdor(which, role) => trogdor::start(cluster, on_node()?, *which, role),
            Work::Status(daemon) => process::status(cluster, on_node()?, *daemon),
            Work::Stop(daemon) => process::stop(cluster, on_node()?, *daemon),
            Work::SaveLogs => logs::save_logs(cluster, on_node()?),
            Work::DestroyStatic => provision::destroy_static(cluster, on_node()?),
            Work::DestroyCloud => provision::destroy_cloud(cluster, on_node()?),
            Work::Procedure(procedure) => procedure(cluster, node),
        }
    }
}
