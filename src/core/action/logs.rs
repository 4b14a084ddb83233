use super::Daemon;
use crate::core::role::RoleKind;
use crate::core::{Cluster, Node};
use anyhow::Context;
use std::fs;
use std::path::PathBuf;

/// The directory, under the working directory, that collected logs are copied into.
pub const SAVED_LOGS_DIR: &str = "logs";

fn daemons(node: &Node) -> Vec<Daemon> {
    let mut daemons = vec![];
    for (kind, daemon) in [
        (RoleKind::ZooKeeper, Daemon::ZooKeeper),
        (RoleKind::Broker, Daemon::Broker),
        (RoleKind::TrogdorAgent, Daemon::TrogdorAgent),
        (RoleKind::TrogdorCoordinator, Daemon::TrogdorCoordinator),
    ] {
        if node.has_role(kind) {
            daemons.push(daemon);
        }
    }
    daemons
}

/// Copies each daemon's remote log directory to `<working dir>/logs/<node>/`.
pub fn save_logs(cluster: &Cluster, node: &Node) -> anyhow::Result<()> {
    let destination: PathBuf = cluster
        .env()
        .working_dir()
        .join(SAVED_LOGS_DIR)
        .join(node.name());
    fs::create_dir_all(&destination)
        .with_context(|| format!("could not create {}", destination.display()))?;

    for daemon in daemons(node) {
        let remote = daemon.log_dir();
        if node.uplink().run(&["test", "-d", remote])? != 0 {
            node.log()
                .notice(format!("No {daemon} logs at {remote}; skipping"));
            continue;
        }
        // Several daemons' log directories share a basename, so each gets its own parent.
        let daemon_destination = destination.join(daemon.slug());
        fs::create_dir_all(&daemon_destination)
            .with_context(|| format!("could not create {}", daemon_destination.display()))?;
        node.uplink()
            .sync_from(remote, &daemon_destination)
            .with_context(|| format!("could not copy {daemon} logs"))?;
        node.log().notice(format!(
            "Saved {daemon} logs to {}",
            daemon_destination.display(),
        ));
    }
    Ok(())
}
