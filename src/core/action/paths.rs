//! Where things live on a node.
//!
//! The Kafka distribution (which also ships ZooKeeper and Trogdor) is expected under
//! [KAFKA_HOME]. Everything rampart writes goes under `/mnt`.

pub const KAFKA_HOME: &str = "/opt/kafka";

pub const ZK_ROOT: &str = "/mnt/zookeeper";
pub const ZK_OPLOGS: &str = "/mnt/zookeeper/oplogs";
pub const ZK_LOGS: &str = "/mnt/zookeeper/logs";
pub const ZK_CONF: &str = "/mnt/zookeeper/conf";
pub const ZK_PROPERTIES: &str = "/mnt/zookeeper/conf/zookeeper.properties";
pub const ZK_LOG4J: &str = "/mnt/zookeeper/conf/log4j.properties";
pub const ZK_MYID: &str = "/mnt/zookeeper/oplogs/myid";
pub const ZK_START_SCRIPT: &str = "/opt/kafka/bin/zookeeper-server-start.sh";

pub const KAFKA_ROOT: &str = "/mnt/kafka";
pub const KAFKA_OPLOGS: &str = "/mnt/kafka/oplogs";
pub const KAFKA_LOGS: &str = "/mnt/kafka/logs";
pub const KAFKA_CONF: &str = "/mnt/kafka/conf";
pub const KAFKA_PROPERTIES: &str = "/mnt/kafka/conf/server.properties";
pub const KAFKA_LOG4J: &str = "/mnt/kafka/conf/log4j.properties";
pub const KAFKA_START_SCRIPT: &str = "/opt/kafka/bin/kafka-server-start.sh";

pub const TROGDOR_ROOT: &str = "/mnt/trogdor";
pub const TROGDOR_CONF: &str = "/mnt/trogdor/conf";
pub const TROGDOR_CONFIG: &str = "/mnt/trogdor/conf/trogdor.conf";
pub const TROGDOR_AGENT_LOGS: &str = "/mnt/trogdor/agent-logs";
pub const TROGDOR_AGENT_LOG4J: &str = "/mnt/trogdor/conf/agent-log4j.properties";
pub const TROGDOR_COORDINATOR_LOGS: &str = "/mnt/trogdor/coordinator-logs";
pub const TROGDOR_COORDINATOR_LOG4J: &str = "/mnt/trogdor/conf/coordinator-log4j.properties";
pub const TROGDOR_SCRIPT: &str = "/opt/kafka/bin/trogdor.sh";
