//! Bringing machines into the cluster and taking them out again.

use super::paths;
use crate::cloud::InstanceRequest;
use crate::core::role::{CloudNodeRole, StaticNodeRole};
use crate::core::wait::Poll;
use crate::core::{Cluster, Node};
use anyhow::Context;
use std::time::Duration;

/// How long a new cloud instance gets to report its addresses.
const DESCRIBE_POLL: Poll = Poll {
    attempts: 60,
    period: Duration::from_secs(5),
    timeout: Duration::from_secs(300),
};

/// How long a node gets to accept its first command.
const UPLINK_POLL: Poll = Poll {
    attempts: 30,
    period: Duration::from_secs(2),
    timeout: Duration::from_secs(120),
};

pub fn provision_static(cluster: &Cluster, node: &Node, role: &StaticNodeRole) -> anyhow::Result<()> {
    let internal = role.internal_host.as_ref().unwrap_or(&role.host);
    cluster.inventory().update(node.name(), |discovered| {
        discovered.public_dns = role.host.clone();
        discovered.private_dns = internal.clone();
    });
    node.log()
        .notice(format!("Using {} (internal address {internal})", role.host));
    Ok(())
}

pub fn provision_cloud(cluster: &Cluster, node: &Node, role: &CloudNodeRole) -> anyhow::Result<()> {
    let cloud = cluster.cloud()?;
    let recorded = cluster.inventory().get(node.name()).instance_id;

    let instance_id = if recorded.is_empty() {
        let request = InstanceRequest {
            node: node.name().to_string(),
            image_id: role.image_id.clone(),
            instance_type: role.instance_type.clone(),
            key_pair: role.key_pair.clone(),
            security_group: role.security_group.clone(),
            region: role.region.clone(),
            zone: role.zone.clone(),
        };
        let instance_id = cloud
            .create_instance(&request)
            .context("could not create instance")?;
        cluster.inventory().update(node.name(), |discovered| {
            discovered.instance_id = instance_id.clone();
        });
        node.log().notice(format!("Created instance {instance_id}"));
        instance_id
    } else {
        node.log()
            .notice(format!("Reusing recorded instance {recorded}"));
        recorded
    };

    let mut addresses = None;
    DESCRIBE_POLL
        .wait_for(cluster.env().cancellation(), || {
            addresses = cloud.describe_instance(&instance_id)?;
            Ok(addresses.is_some())
        })
        .with_context(|| format!("instance {instance_id} never reported its addresses"))?;

    if let Some(addresses) = addresses {
        node.log().notice(format!(
            "Instance {instance_id} is at {} ({})",
            addresses.public_dns, addresses.private_dns,
        ));
        cluster.inventory().update(node.name(), |discovered| {
            discovered.private_dns = addresses.private_dns;
            discovered.public_dns = addresses.public_dns;
        });
    }
    Ok(())
}

pub fn check_uplink(cluster: &Cluster, node: &Node) -> anyhow::Result<()> {
    UPLINK_POLL
        .wait_for_lenient(cluster.env().cancellation(), || {
            Ok(node.uplink().run(&["true"])? == 0)
        })
        .with_context(|| format!("could not reach {}", node.name()))?;
    node.log().notice("Uplink is up");
    Ok(())
}

pub fn destroy_static(_cluster: &Cluster, node: &Node) -> anyhow::Result<()> {
    node.uplink().must_run(&[
        "sudo",
        "rm",
        "-rf",
        paths::ZK_ROOT,
        paths::KAFKA_ROOT,
        paths::TROGDOR_ROOT,
    ])?;
    node.log().notice("Removed daemon data");
    Ok(())
}

pub fn destroy_cloud(cluster: &Cluster, node: &Node) -> anyhow::Result<()> {
    let instance_id = cluster.inventory().get(node.name()).instance_id;
    if instance_id.is_empty() {
        node.log().notice("No instance recorded; nothing to terminate");
        return Ok(());
    }

    cluster
        .cloud()?
        .terminate_instance(&instance_id)
        .with_context(|| format!("could not terminate instance {instance_id}"))?;
    cluster.inventory().forget(node.name());
    node.log().notice(format!("Terminated instance {instance_id}"));
    Ok(())
}
