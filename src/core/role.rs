//! Roles: the configuration-file vocabulary for what a node does.
//!
//! A node carries one or more roles. Each role turns a node name into the actions that node
//! must run and may contribute dynamic variables to the cluster. The action kinds and their
//! dependencies are fixed here, so two calls with the same configuration always yield the same
//! actions.

use crate::core::action::{kind, Action, Daemon, Trogdor, Work};
use crate::core::vars::Provider;
use crate::core::{ActionId, Cluster, TargetId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One of the things a node can be configured to do.
///
/// # (De)serialization
///
/// Like any externally tagged enum, [Role] is written in YAML tag notation by default. The
/// cluster file applies `serde_yaml::with::singleton_map_recursive` so that roles are written as
/// single-key maps instead, e.g. `zooKeeper: { initialDelayMs: 0 }`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    StaticNode(StaticNodeRole),
    CloudNode(CloudNodeRole),
    UbuntuNode(UbuntuNodeRole),
    ZooKeeper(ZooKeeperRole),
    Broker(BrokerRole),
    TrogdorAgent(TrogdorRole),
    TrogdorCoordinator(TrogdorRole),
}

/// The variant of a [Role], without its configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoleKind {
    StaticNode,
    CloudNode,
    UbuntuNode,
    ZooKeeper,
    Broker,
    TrogdorAgent,
    TrogdorCoordinator,
}

impl RoleKind {
    pub fn name(self) -> &'static str {
        match self {
            RoleKind::StaticNode => "staticNode",
            RoleKind::CloudNode => "cloudNode",
            RoleKind::UbuntuNode => "ubuntuNode",
            RoleKind::ZooKeeper => "zooKeeper",
            RoleKind::Broker => "broker",
            RoleKind::TrogdorAgent => "trogdorAgent",
            RoleKind::TrogdorCoordinator => "trogdorCoordinator",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How to reach a node over SSH.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_identity_file: Option<PathBuf>,

    /// Connect through the node's private address rather than its public one.
    #[serde(default)]
    pub internal: bool,
}

/// A machine that already exists at a known address.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticNodeRole {
    pub host: String,

    /// The address other nodes use to reach this one. Defaults to [Self::host].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_host: Option<String>,

    #[serde(flatten)]
    pub ssh: SshOptions,
}

/// A machine created on demand through the configured cloud provider.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudNodeRole {
    #[serde(default = "CloudNodeRole::default_image_id")]
    pub image_id: String,

    #[serde(default = "CloudNodeRole::default_instance_type")]
    pub instance_type: String,

    #[serde(default)]
    pub key_pair: String,

    #[serde(default)]
    pub security_group: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub zone: String,

    #[serde(flatten)]
    pub ssh: SshOptions,
}

impl CloudNodeRole {
    fn default_image_id() -> String {
        "ami-29ebb519".to_string()
    }

    fn default_instance_type() -> String {
        "m1.small".to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UbuntuNodeRole {
    #[serde(default = "UbuntuNodeRole::default_jdk_package")]
    pub jdk_package: String,
}

impl UbuntuNodeRole {
    fn default_jdk_package() -> String {
        "openjdk-8-jdk-headless".to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZooKeeperRole {
    #[serde(default)]
    pub initial_delay_ms: u64,

    #[serde(default = "ZooKeeperRole::default_jvm_options")]
    pub jvm_options: String,
}

impl ZooKeeperRole {
    fn default_jvm_options() -> String {
        "-Xmx3g -Xms3g".to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRole {
    #[serde(default)]
    pub initial_delay_ms: u64,

    #[serde(default = "BrokerRole::default_jvm_options")]
    pub jvm_options: String,

    /// Extra `server.properties` entries. Values may contain `%{name}` variables.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub conf: IndexMap<String, String>,
}

impl BrokerRole {
    fn default_jvm_options() -> String {
        "-Xmx6g -Xms6g".to_string()
    }
}

/// Configuration shared by the Trogdor agent and coordinator roles.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrogdorRole {
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Extra log4j configuration lines.
    #[serde(default = "TrogdorRole::default_log4j")]
    pub log4j: Vec<String>,
}

impl TrogdorRole {
    fn default_log4j() -> Vec<String> {
        vec!["log4j.logger.org.apache.kafka=DEBUG".to_string()]
    }
}

/// The wildcard targets for every daemon's stop action.
fn all_stops() -> Vec<TargetId> {
    Daemon::ALL
        .iter()
        .map(|daemon| TargetId::all(daemon.stop_kind()))
        .collect()
}

/// Actions every provisioning role creates after its own `init`.
fn node_lifecycle(node: &str, destroy: Work) -> Vec<Action> {
    vec![
        Action::new(ActionId::new(kind::UPLINK_CHECK, node), Work::CheckUplink)
            .after([TargetId::new(kind::INIT, node)]),
        Action::new(ActionId::new(kind::SAVE_LOGS, node), Work::SaveLogs).after(all_stops()),
        Action::new(ActionId::new(kind::DESTROY, node), destroy)
            .after([TargetId::new(kind::SAVE_LOGS, node)])
            .after(all_stops()),
    ]
}

/// Start, status, and stop actions for one daemon.
fn daemon_lifecycle(
    node: &str,
    daemon: Daemon,
    start: Work,
    start_after: &[&str],
    stop_after: &[&str],
    initial_delay_ms: u64,
) -> Vec<Action> {
    vec![
        Action::new(ActionId::new(daemon.start_kind(), node), start)
            .after(start_after.iter().map(|kind| TargetId::all(*kind)))
            .delayed(Duration::from_millis(initial_delay_ms)),
        Action::new(ActionId::new(daemon.status_kind(), node), Work::Status(daemon))
            .after([TargetId::all(daemon.start_kind())]),
        Action::new(ActionId::new(daemon.stop_kind(), node), Work::Stop(daemon))
            .after(stop_after.iter().map(|kind| TargetId::all(*kind))),
    ]
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::StaticNode(_) => RoleKind::StaticNode,
            Role::CloudNode(_) => RoleKind::CloudNode,
            Role::UbuntuNode(_) => RoleKind::UbuntuNode,
            Role::ZooKeeper(_) => RoleKind::ZooKeeper,
            Role::Broker(_) => RoleKind::Broker,
            Role::TrogdorAgent(_) => RoleKind::TrogdorAgent,
            Role::TrogdorCoordinator(_) => RoleKind::TrogdorCoordinator,
        }
    }

    /// Returns the actions this role contributes to the node named `node`.
    pub fn create_actions(&self, node: &str) -> Vec<Action> {
        match self {
            Role::StaticNode(role) => {
                let mut actions = vec![Action::new(
                    ActionId::new(kind::INIT, node),
                    Work::ProvisionStatic(role.clone()),
                )];
                actions.extend(node_lifecycle(node, Work::DestroyStatic));
                actions
            }
            Role::CloudNode(role) => {
                let mut actions = vec![Action::new(
                    ActionId::new(kind::INIT, node),
                    Work::ProvisionCloud(role.clone()),
                )];
                actions.extend(node_lifecycle(node, Work::DestroyCloud));
                actions
            }
            Role::UbuntuNode(role) => vec![Action::new(
                ActionId::new(kind::UBUNTU_SETUP, node),
                Work::SetupUbuntu {
                    jdk_package: role.jdk_package.clone(),
                },
            )
            .after([TargetId::new(kind::UPLINK_CHECK, node)])],
            Role::ZooKeeper(role) => daemon_lifecycle(
                node,
                Daemon::ZooKeeper,
                Work::StartZooKeeper(role.clone()),
                &[kind::INIT, kind::UBUNTU_SETUP],
                &[Daemon::Broker.stop_kind()],
                role.initial_delay_ms,
            ),
            Role::Broker(role) => daemon_lifecycle(
                node,
                Daemon::Broker,
                Work::StartBroker(role.clone()),
                &[
                    kind::INIT,
                    kind::UBUNTU_SETUP,
                    Daemon::ZooKeeper.start_kind(),
                ],
                &[
                    Daemon::TrogdorAgent.stop_kind(),
                    Daemon::TrogdorCoordinator.stop_kind(),
                ],
                role.initial_delay_ms,
            ),
            Role::TrogdorAgent(role) => daemon_lifecycle(
                node,
                Daemon::TrogdorAgent,
                Work::StartTrogdor(Trogdor::Agent, role.clone()),
                &[kind::INIT, kind::UBUNTU_SETUP, Daemon::Broker.start_kind()],
                &[Daemon::TrogdorCoordinator.stop_kind()],
                role.initial_delay_ms,
            ),
            Role::TrogdorCoordinator(role) => daemon_lifecycle(
                node,
                Daemon::TrogdorCoordinator,
                Work::StartTrogdor(Trogdor::Coordinator, role.clone()),
                &[
                    kind::INIT,
                    kind::UBUNTU_SETUP,
                    Daemon::TrogdorAgent.start_kind(),
                ],
                &[],
                role.initial_delay_ms,
            ),
        }
    }

    /// Returns the dynamic variables this role contributes, in registration order.
    pub fn providers(&self) -> Vec<(String, Provider)> {
        match self {
            Role::StaticNode(_) | Role::CloudNode(_) => vec![
                (
                    "nodeName".to_string(),
                    Provider::new(0, |_, node| Ok(node.name().to_string())),
                ),
                (
                    "nodeIndex".to_string(),
                    Provider::new(0, |_, node| Ok(node.index().to_string())),
                ),
                (
                    "nodeDns".to_string(),
                    Provider::new(0, |cluster, node| cluster.dns(node.name())),
                ),
            ],
            Role::ZooKeeper(_) => vec![(
                "zkConnect".to_string(),
                Provider::new(0, |cluster, _| peer_list(cluster, RoleKind::ZooKeeper, 2181)),
            )],
            Role::Broker(_) => vec![(
                "bootstrapServers".to_string(),
                Provider::new(0, |cluster, _| peer_list(cluster, RoleKind::Broker, 9092)),
            )],
            Role::UbuntuNode(_) | Role::TrogdorAgent(_) | Role::TrogdorCoordinator(_) => vec![],
        }
    }

    /// Returns how to reach the node, for roles that define where a node lives.
    pub fn ssh_options(&self) -> Option<&SshOptions> {
        match self {
            Role::StaticNode(role) => Some(&role.ssh),
            Role::CloudNode(role) => Some(&role.ssh),
            _ => None,
        }
    }
}

/// Lists `dns:port` for every node carrying `kind`, sorted by node name.
fn peer_list(cluster: &Cluster, kind: RoleKind, port: u16) -> anyhow::Result<String> {
    let peers = cluster
        .nodes_with_role(kind)
        .into_iter()
        .map(|node| Ok(format!("{}:{port}", cluster.dns(node.name())?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(peers.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};
    use crate::core::vars::{Expand, Expander};

    fn ids(actions: &[Action]) -> Vec<String> {
        actions.iter().map(|a| a.id().to_string()).collect()
    }

    fn deps(actions: &[Action], kind: &str) -> Vec<String> {
        actions
            .iter()
            .find(|a| a.id().kind() == kind)
            .unwrap()
            .dependencies()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    mod deserialize {
        use super::*;

        #[derive(Debug, Deserialize)]
        struct Wrapper {
            #[serde(with = "serde_yaml::with::singleton_map_recursive")]
            roles: IndexMap<String, Role>,
        }

        #[test]
        fn singleton_maps_with_defaults() {
            let yaml = "\
roles:
  zk:
    zooKeeper:
      initialDelayMs: 250
  ssh:
    staticNode:
      host: 10.0.0.1
      sshUser: ubuntu
      internal: true
  agent:
    trogdorAgent: {}
";
            let wrapper: Wrapper = serde_yaml::from_str(yaml).unwrap();

            assert_eq!(
                Role::ZooKeeper(ZooKeeperRole {
                    initial_delay_ms: 250,
                    jvm_options: "-Xmx3g -Xms3g".to_string(),
                }),
                wrapper.roles["zk"],
            );
            assert_eq!(
                Role::StaticNode(StaticNodeRole {
                    host: "10.0.0.1".to_string(),
                    internal_host: None,
                    ssh: SshOptions {
                        ssh_user: Some("ubuntu".to_string()),
                        internal: true,
                        ..Default::default()
                    },
                }),
                wrapper.roles["ssh"],
            );
            assert_eq!(
                Role::TrogdorAgent(TrogdorRole {
                    initial_delay_ms: 0,
                    log4j: vec!["log4j.logger.org.apache.kafka=DEBUG".to_string()],
                }),
                wrapper.roles["agent"],
            );
        }

        #[test]
        fn unknown_role_is_an_error() {
            let yaml = "roles:\n  x:\n    mainframe: {}\n";
            assert!(serde_yaml::from_str::<Wrapper>(yaml).is_err());
        }
    }

    mod create_actions {
        use super::*;

        #[test]
        fn is_deterministic() {
            for role in fixtures::every_role() {
                let first = role.create_actions("n1");
                let second = role.create_actions("n1");
                assert_eq!(ids(&first), ids(&second));
                for (a, b) in first.iter().zip(&second) {
                    assert_eq!(a.dependencies(), b.dependencies());
                    assert_eq!(a.initial_delay(), b.initial_delay());
                }
            }
        }

        #[test]
        fn static_node() {
            let actions = fixtures::static_node("h1").create_actions("n1");
            assert_eq!(
                vec!["init:n1", "uplinkCheck:n1", "saveLogs:n1", "destroy:n1"],
                ids(&actions),
            );
            assert_eq!(vec!["init:n1"], deps(&actions, kind::UPLINK_CHECK));
            assert_eq!(
                vec![
                    "saveLogs:n1",
                    "zooKeeperStop:*",
                    "brokerStop:*",
                    "trogdorAgentStop:*",
                    "trogdorCoordinatorStop:*",
                ],
                deps(&actions, kind::DESTROY),
            );
        }

        #[test]
        fn zookeeper() {
            let role = Role::ZooKeeper(ZooKeeperRole {
                initial_delay_ms: 1500,
                jvm_options: String::new(),
            });
            let actions = role.create_actions("n1");

            assert_eq!(
                vec!["zooKeeperStart:n1", "zooKeeperStatus:n1", "zooKeeperStop:n1"],
                ids(&actions),
            );
            assert_eq!(
                vec!["init:*", "ubuntuSetup:*"],
                deps(&actions, "zooKeeperStart"),
            );
            assert_eq!(vec!["brokerStop:*"], deps(&actions, "zooKeeperStop"));
            assert_eq!(Duration::from_millis(1500), actions[0].initial_delay());
            assert_eq!(Duration::ZERO, actions[2].initial_delay());
        }

        #[test]
        fn broker_waits_for_every_zookeeper() {
            let actions = fixtures::broker().create_actions("n2");
            assert_eq!(
                vec!["init:*", "ubuntuSetup:*", "zooKeeperStart:*"],
                deps(&actions, "brokerStart"),
            );
            assert_eq!(
                vec!["trogdorAgentStop:*", "trogdorCoordinatorStop:*"],
                deps(&actions, "brokerStop"),
            );
        }
    }

    mod providers {
        use super::*;

        #[test]
        fn zk_connect_lists_sorted_zookeeper_nodes() {
            let fixture = ClusterFixture::new()
                .node("zk1", vec![("zk", fixtures::zookeeper())])
                .node("zk0", vec![("zk", fixtures::zookeeper())])
                .node("b0", vec![("broker", fixtures::broker())])
                .build();
            fixture.discover("zk0", "10.0.0.10");
            fixture.discover("zk1", "10.0.0.11");
            fixture.discover("b0", "10.0.0.20");
            let node = fixture.cluster.node("b0").unwrap();

            let mut expander = Expander::new(&fixture.cluster, node);
            assert_eq!(
                "10.0.0.10:2181,10.0.0.11:2181",
                expander.expand("%{zkConnect}").unwrap(),
            );
            assert_eq!(
                "10.0.0.20:9092",
                expander.expand("%{bootstrapServers}").unwrap(),
            );
        }

        #[test]
        fn node_variables() {
            let fixture = ClusterFixture::new()
                .node("a", vec![("ssh", fixtures::static_node("a.example"))])
                .node("b", vec![("ssh", fixtures::static_node("b.example"))])
                .build();
            fixture.discover("b", "b.internal");
            let node = fixture.cluster.node("b").unwrap();

            assert_eq!(
                "b 1 b.internal",
                Expander::new(&fixture.cluster, node)
                    .expand("%{nodeName} %{nodeIndex} %{nodeDns}")
                    .unwrap(),
            );
        }

        #[test]
        fn unknown_address_is_an_error() {
            let fixture = ClusterFixture::new()
                .node("zk0", vec![("zk", fixtures::zookeeper())])
                .build();
            let node = fixture.cluster.node("zk0").unwrap();

            assert!(Expander::new(&fixture.cluster, node)
                .expand("%{zkConnect}")
                .is_err());
        }
    }
}
