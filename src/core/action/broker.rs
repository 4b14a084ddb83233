use super::paths::*;
use super::process;
use super::Daemon;
use crate::core::role::BrokerRole;
use crate::core::vars::{Expand, Expander};
use crate::core::{Cluster, Node};
use indexmap::IndexMap;

/// The JMX port of the broker JVM. Daemons on the same node must not share one.
pub const JMX_PORT: &str = "9192";

pub fn start(cluster: &Cluster, node: &Node, role: &BrokerRole) -> anyhow::Result<()> {
    let properties = properties(cluster, node, role)?;

    process::kill(node, Daemon::Broker)?;
    process::reset_dirs(node, KAFKA_ROOT, &[KAFKA_OPLOGS, KAFKA_LOGS, KAFKA_CONF])?;
    process::upload(cluster, node, &properties, KAFKA_PROPERTIES)?;
    process::upload(cluster, node, &log4j(), KAFKA_LOG4J)?;

    let log4j_opts = format!("-Dlog4j.configuration=file:{KAFKA_LOG4J}");
    process::launch(
        node,
        &[
            ("JMX_PORT", JMX_PORT),
            ("KAFKA_JVM_PERFORMANCE_OPTS", &role.jvm_options),
            ("KAFKA_LOG4J_OPTS", &log4j_opts),
        ],
        KAFKA_START_SCRIPT,
        &[KAFKA_PROPERTIES],
        KAFKA_LOGS,
    )?;
    process::wait_until_running(cluster, node, Daemon::Broker)
}

/// Generates `server.properties`. Entries from the role's `conf` override the defaults, and
/// every value is expanded for this node.
fn properties(cluster: &Cluster, node: &Node, role: &BrokerRole) -> anyhow::Result<String> {
    let mut conf: IndexMap<String, String> = [
        ("broker.id", node.index().to_string()),
        ("listeners", "PLAINTEXT://:9092".to_string()),
        ("advertised.listeners", "PLAINTEXT://%{nodeDns}:9092".to_string()),
        ("zookeeper.connect", "%{zkConnect}".to_string()),
        ("log.dirs", KAFKA_OPLOGS.to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();
    conf.extend(role.conf.clone());

    let mut expander = Expander::new(cluster, node);
    let mut out = String::new();
    for (key, value) in &conf {
        out.push_str(&format!("{key}={}\n", expander.expand(value)?));
    }
    Ok(out)
}

fn log4j() -> String {
    format!(
        "log4j.rootLogger=INFO, kafkaAppender\n\
         log4j.appender.kafkaAppender=org.apache.log4j.DailyRollingFileAppender\n\
         log4j.appender.kafkaAppender.DatePattern='.'yyyy-MM-dd-HH\n\
         log4j.appender.kafkaAppender.File={KAFKA_LOGS}/server.log\n\
         log4j.appender.kafkaAppender.layout=org.apache.log4j.PatternLayout\n\
         log4j.appender.kafkaAppender.layout.ConversionPattern=[%d] %p %m (%c)%n\n\
         \n\
         log4j.logger.kafka=INFO\n\
         log4j.logger.org.apache.kafka=INFO\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};
    use crate::core::vars::{Provider, Providers, CONFIG_VAR_PRIORITY};

    fn cluster(providers: Providers) -> fixtures::Fixture {
        let fixture = ClusterFixture::new()
            .node(
                "zk0",
                vec![("ssh", fixtures::static_node("zk0")), ("zk", fixtures::zookeeper())],
            )
            .node(
                "b0",
                vec![("ssh", fixtures::static_node("b0")), ("broker", fixtures::broker())],
            )
            .build_with(providers);
        fixture.discover("zk0", "10.0.0.10");
        fixture.discover("b0", "10.0.0.20");
        fixture
    }

    #[test]
    fn defaults_are_expanded() {
        let fixture = cluster(Providers::new());
        let node = fixture.cluster.node("b0").unwrap();
        let role = BrokerRole {
            initial_delay_ms: 0,
            jvm_options: String::new(),
            conf: IndexMap::new(),
        };

        assert_eq!(
            "broker.id=1\n\
             listeners=PLAINTEXT://:9092\n\
             advertised.listeners=PLAINTEXT://10.0.0.20:9092\n\
             zookeeper.connect=10.0.0.10:2181\n\
             log.dirs=/mnt/kafka/oplogs\n",
            properties(&fixture.cluster, node, &role).unwrap(),
        );
    }

    #[test]
    fn conf_overrides_defaults_and_uses_variables() {
        let mut providers = Providers::new();
        providers.register("chroot", Provider::constant(CONFIG_VAR_PRIORITY, "/kafka"));
        let fixture = cluster(providers);
        let node = fixture.cluster.node("b0").unwrap();
        let role = BrokerRole {
            initial_delay_ms: 0,
            jvm_options: String::new(),
            conf: [
                ("zookeeper.connect", "%{zkConnect}%{chroot}"),
                ("num.partitions", "8"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        };

        let properties = properties(&fixture.cluster, node, &role).unwrap();
        let lines: Vec<_> = properties.lines().collect();

        assert_eq!("zookeeper.connect=10.0.0.10:2181/kafka", lines[3]);
        assert_eq!("num.partitions=8", lines[5]);
    }
}
