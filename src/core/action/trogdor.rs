use super::paths::*;
use super::process;
use super::Trogdor;
use crate::core::role::{RoleKind, TrogdorRole};
use crate::core::vars::{Expand, Expander};
use crate::core::{Cluster, Node};
use serde_json::{json, Map, Value};

pub const AGENT_PORT: u16 = 8888;
pub const COORDINATOR_PORT: u16 = 8889;

pub fn start(cluster: &Cluster, node: &Node, which: Trogdor, role: &TrogdorRole) -> anyhow::Result<()> {
    let daemon = which.daemon();
    let config = expand_json(&mut Expander::new(cluster, node), config(cluster)?)?;
    let config = serde_json::to_string_pretty(&config)?;
    let log4j = log4j(cluster, node, which, role)?;
    let (log4j_path, conf_flag, mode) = match which {
        Trogdor::Agent => (TROGDOR_AGENT_LOG4J, "--agent.config", "agent"),
        Trogdor::Coordinator => (
            TROGDOR_COORDINATOR_LOG4J,
            "--coordinator.config",
            "coordinator",
        ),
    };

    process::kill(node, daemon)?;
    process::reset_dirs(node, TROGDOR_ROOT, &[daemon.log_dir()])?;
    node.uplink().must_run(&[
        "sudo", "mkdir", "-p", TROGDOR_CONF, "&&", "sudo", "chown", "`whoami`", TROGDOR_CONF,
    ])?;
    process::upload(cluster, node, &config, TROGDOR_CONFIG)?;
    process::upload(cluster, node, &log4j, log4j_path)?;

    let log4j_opts = format!("-Dlog4j.configuration=file:{log4j_path}");
    process::launch(
        node,
        &[("KAFKA_LOG4J_OPTS", &log4j_opts)],
        TROGDOR_SCRIPT,
        &[mode, conf_flag, TROGDOR_CONFIG, "--node-name", node.name()],
        daemon.log_dir(),
    )?;
    process::wait_until_running(cluster, node, daemon)
}

/// Describes every Trogdor node: its address and which daemons it runs.
fn config(cluster: &Cluster) -> anyhow::Result<Value> {
    let mut nodes = Map::new();
    let roles = [
        (RoleKind::TrogdorAgent, "trogdor.agent.port", AGENT_PORT),
        (
            RoleKind::TrogdorCoordinator,
            "trogdor.coordinator.port",
            COORDINATOR_PORT,
        ),
    ];
    for (kind, key, port) in roles {
        for node in cluster.nodes_with_role(kind) {
            let entry = nodes
                .entry(node.name().to_string())
                .or_insert_with(|| json!({}));
            if let Value::Object(entry) = entry {
                entry.insert("hostname".to_string(), json!(cluster.dns(node.name())?));
                entry.insert(key.to_string(), json!(port));
            }
        }
    }
    Ok(json!({
        "platform": "org.apache.kafka.trogdor.basic.BasicPlatform",
        "nodes": nodes,
    }))
}

/// Expands `%{name}` in every string value of `value`, at any depth. Keys are left alone.
fn expand_json(expander: &mut impl Expand, value: Value) -> anyhow::Result<Value> {
    Ok(match value {
        Value::String(text) => Value::String(expander.expand(&text)?),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| expand_json(expander, item))
                .collect::<anyhow::Result<_>>()?,
        ),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, expand_json(expander, item)?)))
                .collect::<anyhow::Result<_>>()?,
        ),
        other => other,
    })
}

/// The base logging setup plus the role's own lines, which may use `%{name}` variables.
fn log4j(
    cluster: &Cluster,
    node: &Node,
    which: Trogdor,
    role: &TrogdorRole,
) -> anyhow::Result<String> {
    let log_dir = which.daemon().log_dir();
    let mut out = format!(
        "log4j.rootLogger=INFO, kafkaAppender\n\
         log4j.appender.kafkaAppender=org.apache.log4j.DailyRollingFileAppender\n\
         log4j.appender.kafkaAppender.DatePattern='.'yyyy-MM-dd-HH\n\
         log4j.appender.kafkaAppender.File={log_dir}/trogdor.log\n\
         log4j.appender.kafkaAppender.layout=org.apache.log4j.PatternLayout\n\
         log4j.appender.kafkaAppender.layout.ConversionPattern=[%d] %p %m (%c)%n\n\
         \n"
    );
    let mut expander = Expander::new(cluster, node);
    for line in &role.log4j {
        out.push_str(&expander.expand(line)?);
        out.push('\n');
    }
    Ok(out)
}
