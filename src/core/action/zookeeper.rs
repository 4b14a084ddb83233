use super::paths::*;
use super::process;
use super::Daemon;
use crate::core::role::{RoleKind, ZooKeeperRole};
use crate::core::{Cluster, Node};
use anyhow::Context;
use std::fmt::Write;

/// The JMX port of the ZooKeeper JVM. Daemons on the same node must not share one.
pub const JMX_PORT: &str = "8989";

pub fn start(cluster: &Cluster, node: &Node, role: &ZooKeeperRole) -> anyhow::Result<()> {
    let properties = properties(cluster)?;
    let myid = server_id(cluster, node.name())?.to_string();

    process::kill(node, Daemon::ZooKeeper)?;
    process::reset_dirs(node, ZK_ROOT, &[ZK_OPLOGS, ZK_LOGS, ZK_CONF])?;
    process::upload(cluster, node, &properties, ZK_PROPERTIES)?;
    process::upload(cluster, node, &log4j(), ZK_LOG4J)?;
    process::upload(cluster, node, &myid, ZK_MYID)?;

    let log4j_opts = format!("-Dlog4j.configuration=file:{ZK_LOG4J}");
    process::launch(
        node,
        &[
            ("JMX_PORT", JMX_PORT),
            ("KAFKA_JVM_PERFORMANCE_OPTS", &role.jvm_options),
            ("KAFKA_LOG4J_OPTS", &log4j_opts),
        ],
        ZK_START_SCRIPT,
        &[ZK_PROPERTIES],
        ZK_LOGS,
    )?;
    process::wait_until_running(cluster, node, Daemon::ZooKeeper)
}

/// Returns the 1-based position of `node` among the ZooKeeper nodes sorted by name.
fn server_id(cluster: &Cluster, node: &str) -> anyhow::Result<usize> {
    cluster
        .nodes_with_role(RoleKind::ZooKeeper)
        .iter()
        .position(|zk| zk.name() == node)
        .map(|i| i + 1)
        .with_context(|| format!("{node} is not a ZooKeeper node"))
}

/// Generates `zookeeper.properties`, listing every ZooKeeper node in the ensemble.
fn properties(cluster: &Cluster) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "dataDir={ZK_OPLOGS}")?;
    writeln!(out, "clientPort=2181")?;
    writeln!(out, "maxClientCnxns=0")?;
    writeln!(out, "initLimit=5")?;
    writeln!(out, "syncLimit=2")?;
    for (i, zk) in cluster.nodes_with_role(RoleKind::ZooKeeper).iter().enumerate() {
        writeln!(out, "server.{}={}:2888:3888", i + 1, cluster.dns(zk.name())?)?;
    }
    Ok(out)
}

fn log4j() -> String {
    format!(
        "log4j.rootLogger=INFO, kafkaAppender\n\
         log4j.appender.kafkaAppender=org.apache.log4j.DailyRollingFileAppender\n\
         log4j.appender.kafkaAppender.DatePattern='.'yyyy-MM-dd-HH\n\
         log4j.appender.kafkaAppender.File={ZK_LOGS}/server.log\n\
         log4j.appender.kafkaAppender.layout=org.apache.log4j.PatternLayout\n\
         log4j.appender.kafkaAppender.layout.ConversionPattern=[%d] %p %m (%c)%n\n\
         \n\
         log4j.logger.org.I0Itec.zkclient.ZkClient=INFO\n\
         log4j.logger.org.apache.zookeeper=INFO\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};

    fn ensemble() -> fixtures::Fixture {
        let fixture = ClusterFixture::new()
            .node("zk2", vec![("zk", fixtures::zookeeper())])
            .node("zk0", vec![("zk", fixtures::zookeeper())])
            .node("broker0", vec![("broker", fixtures::broker())])
            .node("zk1", vec![("zk", fixtures::zookeeper())])
            .build();
        fixture.discover("zk0", "10.0.0.10");
        fixture.discover("zk1", "10.0.0.11");
        fixture.discover("zk2", "10.0.0.12");
        fixture
    }

    #[test]
    fn properties_list_every_zookeeper_node() {
        let fixture = ensemble();

        assert_eq!(
            "dataDir=/mnt/zookeeper/oplogs\n\
             clientPort=2181\n\
             maxClientCnxns=0\n\
             initLimit=5\n\
             syncLimit=2\n\
             server.1=10.0.0.10:2888:3888\n\
             server.2=10.0.0.11:2888:3888\n\
             server.3=10.0.0.12:2888:3888\n",
            properties(&fixture.cluster).unwrap(),
        );
    }

    #[test]
    fn server_ids_follow_sorted_names() {
        let fixture = ensemble();
        assert_eq!(1, server_id(&fixture.cluster, "zk0").unwrap());
        assert_eq!(3, server_id(&fixture.cluster, "zk2").unwrap());
        assert!(server_id(&fixture.cluster, "broker0").is_err());
    }

    #[test]
    fn start_uploads_config_and_launches() {
        let fixture = ensemble();
        let node = fixture.cluster.node("zk1").unwrap();
        let role = match fixtures::zookeeper() {
            crate::core::Role::ZooKeeper(role) => role,
            _ => unreachable!(),
        };

        start(&fixture.cluster, node, &role).unwrap();

        let uploads = fixture.uploads("zk1");
        let remotes: Vec<_> = uploads.iter().map(|u| u.remote.as_str()).collect();
        assert_eq!(vec![ZK_PROPERTIES, ZK_LOG4J, ZK_MYID], remotes);
        assert!(uploads[0].contents.contains("server.2=10.0.0.11:2888:3888"));
        assert_eq!("2", uploads[2].contents);
        assert!(uploads.iter().all(|u| !u.local.exists()));
        assert!(fixtures::working_dir_is_empty(&fixture));

        let commands = fixture.commands("zk1");
        assert!(commands[0].starts_with("sudo pkill -f org.apache.zookeeper"));
        assert!(commands
            .iter()
            .any(|c| c.starts_with("nohup env JMX_PORT=8989") && c.contains(ZK_START_SCRIPT)));
        assert!(commands.last().unwrap().starts_with("pgrep -f"));
    }

    #[test]
    fn colocated_broker_uses_another_jmx_port() {
        let fixture = ClusterFixture::new()
            .node(
                "n1",
                vec![("zk", fixtures::zookeeper()), ("broker", fixtures::broker())],
            )
            .build();
        fixture.discover("n1", "10.0.0.1");
        let node = fixture.cluster.node("n1").unwrap();
        let (zk_role, broker_role) = match (fixtures::zookeeper(), fixtures::broker()) {
            (crate::core::Role::ZooKeeper(zk), crate::core::Role::Broker(broker)) => (zk, broker),
            _ => unreachable!(),
        };

        start(&fixture.cluster, node, &zk_role).unwrap();
        crate::core::action::broker::start(&fixture.cluster, node, &broker_role).unwrap();

        let ports: Vec<_> = fixture
            .commands("n1")
            .iter()
            .filter(|c| c.starts_with("nohup env JMX_PORT="))
            .map(|c| c["nohup env JMX_PORT=".len()..].split(' ').next().unwrap().to_string())
            .collect();
        assert_eq!(vec!["8989", "9192"], ports);
    }

    #[test]
    fn start_fails_when_peer_address_unknown() {
        let fixture = ClusterFixture::new()
            .node("zk0", vec![("zk", fixtures::zookeeper())])
            .node("zk1", vec![("zk", fixtures::zookeeper())])
            .build();
        fixture.discover("zk0", "10.0.0.10");
        let node = fixture.cluster.node("zk0").unwrap();
        let role = match fixtures::zookeeper() {
            crate::core::Role::ZooKeeper(role) => role,
            _ => unreachable!(),
        };

        assert!(start(&fixture.cluster, node, &role).is_err());
        assert!(fixture.commands("zk0").is_empty());
    }
}
