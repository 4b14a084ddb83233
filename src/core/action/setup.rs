use crate::core::wait::Retry;
use crate::core::{Cluster, Node};
use std::time::Duration;

const APT_RETRY: Retry = Retry {
    attempts: 3,
    backoff: Duration::from_millis(100),
};

const PACKAGES: &[&str] = &[
    "iptables",
    "rsync",
    "wget",
    "curl",
    "collectd-core",
    "coreutils",
    "cmake",
    "pkg-config",
    "libfuse-dev",
];

pub fn setup_ubuntu(cluster: &Cluster, node: &Node, jdk_package: &str) -> anyhow::Result<()> {
    let mut argv = vec![
        "sudo", "dpkg", "--configure", "-a", "&&", "sudo", "apt-get", "update", "-y", "&&", "sudo",
        "apt-get", "upgrade", "-y", "&&", "sudo", "apt-get", "install", "-y",
    ];
    argv.extend(PACKAGES);
    argv.push(jdk_package);

    node.log().notice("Beginning Ubuntu setup");
    APT_RETRY.run(cluster.env().cancellation(), |attempt| {
        if attempt > 1 {
            node.log().warning(format!("Retrying Ubuntu setup (attempt {attempt})"));
        }
        node.uplink().must_run(&argv)
    })?;
    node.log().notice("Finished Ubuntu setup");
    Ok(())
}
