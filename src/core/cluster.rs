//! The cluster aggregate: every node, the shared inventory and variables, and the run's
//! environment.

use crate::cloud::Cloud;
use crate::core::node::{Inventory, Node};
use crate::core::role::{Role, RoleKind};
use crate::core::vars::{Provider, Providers, CONFIG_VAR_PRIORITY};
use crate::core::wait::Cancelled;
use crate::core::Action;
use crate::logger::NodeLog;
use crate::uplink::Uplink;
use anyhow::{anyhow, bail};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A run-wide cancellation flag that blocking waits can observe.
///
/// Cloning yields another handle to the same flag. Cancellation drops the only [Sender] of an
/// otherwise silent channel, so every [Receiver] clone sees a disconnect at once; this lets the
/// engine wait on cancellation in the same `select!` as its other channels.
#[derive(Clone, Debug)]
pub struct Cancellation {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Cancellation {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Cancels the run. Idempotent.
    pub fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for `duration`, or until the run is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        match self.receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(Cancelled),
        }
    }

    /// A receiver that becomes disconnected on cancellation, for use with `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-wide settings shared by every action.
#[derive(Clone, Debug)]
pub struct Environment {
    working_dir: PathBuf,
    cancellation: Cancellation,
}

impl Environment {
    pub fn new(working_dir: impl Into<PathBuf>, cancellation: Cancellation) -> Self {
        Environment {
            working_dir: working_dir.into(),
            cancellation,
        }
    }

    /// Where temporary files, saved logs, and persisted state go.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

pub struct Cluster {
    nodes: IndexMap<String, Node>,
    inventory: Arc<Inventory>,
    providers: Providers,
    env: Environment,
    cloud: Option<Arc<dyn Cloud>>,
    log: NodeLog,
}

impl Cluster {
    pub fn builder(env: Environment) -> ClusterBuilder {
        ClusterBuilder::new(env)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Every node, in cluster-file order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Every node carrying a role of `kind`, sorted by name.
    pub fn nodes_with_role(&self, kind: RoleKind) -> Vec<&Node> {
        let mut nodes: Vec<_> = self.nodes().filter(|node| node.has_role(kind)).collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes
    }

    /// Every action that every node's roles create, in cluster-file order.
    pub fn actions(&self) -> Vec<Action> {
        self.nodes()
            .flat_map(|node| {
                node.roles()
                    .iter()
                    .flat_map(|(_, role)| role.create_actions(node.name()))
            })
            .collect()
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// The address other nodes use to reach `node`.
    pub fn dns(&self, node: &str) -> anyhow::Result<String> {
        let discovered = self.inventory.get(node);
        match discovered.internal_dns() {
            "" => bail!("no address is known for {node}; it has not been provisioned"),
            dns => Ok(dns.to_string()),
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn cloud(&self) -> anyhow::Result<&dyn Cloud> {
        self.cloud
            .as_deref()
            .ok_or_else(|| anyhow!("no cloud provider is configured"))
    }

    /// The log for messages that don't pertain to a specific node.
    pub fn log(&self) -> &NodeLog {
        &self.log
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes)
            .field("inventory", &self.inventory)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

/// Assembles a [Cluster] and checks it for consistency.
pub struct ClusterBuilder {
    env: Environment,
    nodes: Vec<(String, Vec<(String, Arc<Role>)>, NodeLog, Box<dyn Uplink>)>,
    inventory: Arc<Inventory>,
    providers: Providers,
    vars: IndexMap<String, String>,
    cloud: Option<Arc<dyn Cloud>>,
    log: NodeLog,
}

impl ClusterBuilder {
    pub fn new(env: Environment) -> Self {
        ClusterBuilder {
            env,
            nodes: Vec::new(),
            inventory: Arc::new(Inventory::new()),
            providers: Providers::new(),
            vars: IndexMap::new(),
            cloud: None,
            log: NodeLog::discard("cluster"),
        }
    }

    pub fn node(
        mut self,
        name: impl Into<String>,
        roles: Vec<(String, Arc<Role>)>,
        log: NodeLog,
        uplink: Box<dyn Uplink>,
    ) -> Self {
        self.nodes.push((name.into(), roles, log, uplink));
        self
    }

    pub fn inventory(mut self, inventory: Arc<Inventory>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Providers registered ahead of the configured variables and the roles' own.
    pub fn providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    /// Adds an operator-supplied variable. These outrank every role-supplied variable.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn cloud(mut self, cloud: Arc<dyn Cloud>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn log(mut self, log: NodeLog) -> Self {
        self.log = log;
        self
    }

    /// Validates node names and registers every variable provider.
    pub fn build(self) -> anyhow::Result<Cluster> {
        let name_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$")?;

        let mut providers = self.providers;
        for (name, value) in self.vars {
            providers.register(name, Provider::constant(CONFIG_VAR_PRIORITY, value));
        }

        let mut nodes = IndexMap::with_capacity(self.nodes.len());
        for (index, (name, roles, log, uplink)) in self.nodes.into_iter().enumerate() {
            if !name_pattern.is_match(&name) {
                bail!("invalid node name {name:?}: names may contain only letters, digits, '.', '_', and '-', and must not start with a punctuation character");
            }
            if nodes.contains_key(&name) {
                bail!("duplicate node name {name:?}");
            }
            for (_, role) in &roles {
                providers.extend(role.providers());
            }
            let node = Node::new(name.clone(), index, roles, log, uplink);
            nodes.insert(name, node);
        }

        Ok(Cluster {
            nodes,
            inventory: self.inventory,
            providers,
            env: self.env,
            cloud: self.cloud,
            log: self.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};
    use std::thread;
    use std::time::Instant;

    mod cancellation {
        use super::*;

        #[test]
        fn clones_share_state() {
            let a = Cancellation::new();
            let b = a.clone();
            assert!(!b.is_cancelled());
            a.cancel();
            assert!(b.is_cancelled());
            a.cancel();
            assert!(a.is_cancelled());
        }

        #[test]
        fn sleep_returns_early() {
            let cancellation = Cancellation::new();
            let canceller = cancellation.clone();
            let start = Instant::now();

            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                canceller.cancel();
            });
            let result = cancellation.sleep(Duration::from_secs(60));
            handle.join().unwrap();

            assert_eq!(Err(Cancelled), result);
            assert!(start.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn sleep_runs_to_completion() {
            let cancellation = Cancellation::new();
            assert_eq!(Ok(()), cancellation.sleep(Duration::from_millis(5)));
        }
    }

    mod build {
        use super::*;

        #[test]
        fn rejects_invalid_names() {
            for name in ["", "-x", "a/b", "a b", "../etc"] {
                assert!(
                    ClusterFixture::new().node(name, vec![]).try_build().is_err(),
                    "{name:?} was accepted",
                );
            }
            for name in ["a", "node-0", "zk_1.example"] {
                assert!(ClusterFixture::new().node(name, vec![]).try_build().is_ok());
            }
        }

        #[test]
        fn rejects_duplicate_names() {
            let err = ClusterFixture::new()
                .node("n1", vec![])
                .node("n1", vec![])
                .try_build()
                .unwrap_err();
            assert!(err.to_string().contains("duplicate"));
        }

        #[test]
        fn config_vars_outrank_role_providers() {
            let fixture = ClusterFixture::new()
                .var("zkConnect", "override:2181")
                .node("zk0", vec![("zk", fixtures::zookeeper())])
                .build();
            let provider = fixture.cluster.providers().get("zkConnect").unwrap();
            assert_eq!(CONFIG_VAR_PRIORITY, provider.priority());
        }
    }

    mod nodes_with_role {
        use super::*;

        #[test]
        fn sorted_by_name() {
            let fixture = ClusterFixture::new()
                .node("c", vec![("zk", fixtures::zookeeper())])
                .node("a", vec![("zk", fixtures::zookeeper())])
                .node("b", vec![("broker", fixtures::broker())])
                .build();

            let names: Vec<_> = fixture
                .cluster
                .nodes_with_role(RoleKind::ZooKeeper)
                .iter()
                .map(|n| n.name())
                .collect();
            assert_eq!(vec!["a", "c"], names);
            assert_eq!(2, fixture.cluster.node("b").unwrap().index());
        }
    }

    #[test]
    fn actions_follow_node_and_role_order() {
        let fixture = ClusterFixture::new()
            .node("n1", vec![("ubuntu", fixtures::ubuntu_node())])
            .node("n0", vec![("zk", fixtures::zookeeper())])
            .build();

        let ids: Vec<_> = fixture
            .cluster
            .actions()
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(
            vec![
                "ubuntuSetup:n1",
                "zooKeeperStart:n0",
                "zooKeeperStatus:n0",
                "zooKeeperStop:n0",
            ],
            ids,
        );
    }

    #[test]
    fn dns_requires_provisioning() {
        let fixture = ClusterFixture::new().node("n1", vec![]).build();
        assert!(fixture.cluster.dns("n1").is_err());
        fixture.discover("n1", "10.0.0.1");
        assert_eq!("10.0.0.1", fixture.cluster.dns("n1").unwrap());
    }
}
