//! Process control shared by every daemon: launching, checking, stopping, and file uploads.

use super::Daemon;
use crate::core::wait::Poll;
use crate::core::{Cluster, Node};
use anyhow::{bail, Context};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

/// How long a freshly launched daemon gets to show up in the process table.
const START_POLL: Poll = Poll {
    attempts: 30,
    period: Duration::from_secs(1),
    timeout: Duration::from_secs(30),
};

/// How long a daemon gets to exit after it has been signalled.
const STOP_POLL: Poll = Poll {
    attempts: 30,
    period: Duration::from_secs(1),
    timeout: Duration::from_secs(30),
};

/// Reports whether the daemon's JVM appears in the node's process table.
pub fn is_running(node: &Node, daemon: Daemon) -> anyhow::Result<bool> {
    Ok(node.uplink().run(&["pgrep", "-f", daemon.class_name()])? == 0)
}

/// Signals every process of the daemon. Finding no process is not an error.
pub fn kill(node: &Node, daemon: Daemon) -> anyhow::Result<()> {
    // pkill exits 1 when nothing matched.
    match node
        .uplink()
        .run(&["sudo", "pkill", "-f", daemon.class_name()])?
    {
        0 | 1 => Ok(()),
        code => bail!("could not signal {daemon} (pkill exited with code {code})"),
    }
}

pub fn status(_cluster: &Cluster, node: &Node, daemon: Daemon) -> anyhow::Result<()> {
    if !is_running(node, daemon)? {
        bail!("{daemon} is not running on {}", node.name());
    }
    node.log().notice(format!("{daemon} is running"));
    Ok(())
}

pub fn stop(cluster: &Cluster, node: &Node, daemon: Daemon) -> anyhow::Result<()> {
    node.log().notice(format!("Stopping {daemon}"));
    kill(node, daemon)?;
    STOP_POLL
        .wait_for(cluster.env().cancellation(), || Ok(!is_running(node, daemon)?))
        .with_context(|| format!("{daemon} did not exit"))?;
    node.log().notice(format!("{daemon} stopped"));
    Ok(())
}

/// Waits for a freshly launched daemon to appear in the process table.
pub fn wait_until_running(cluster: &Cluster, node: &Node, daemon: Daemon) -> anyhow::Result<()> {
    START_POLL
        .wait_for(cluster.env().cancellation(), || is_running(node, daemon))
        .with_context(|| format!("{daemon} did not start"))?;
    node.log().notice(format!("{daemon} is running"));
    Ok(())
}

/// Recreates `dirs` empty and hands them, along with `root`, to the login user.
pub fn reset_dirs(node: &Node, root: &str, dirs: &[&str]) -> anyhow::Result<()> {
    let mut argv = vec!["sudo", "rm", "-rf"];
    argv.extend(dirs);
    argv.extend(["&&", "sudo", "mkdir", "-p"]);
    argv.extend(dirs);
    argv.extend(["&&", "sudo", "chown", "`whoami`", root]);
    argv.extend(dirs);
    node.uplink().must_run(&argv)
}

/// Launches a script in the background with its output redirected into `log_dir`.
///
/// `env` values are shell-quoted; `args` are passed through as written.
pub fn launch(
    node: &Node,
    env: &[(&str, &str)],
    script: &str,
    args: &[&str],
    log_dir: &str,
) -> anyhow::Result<()> {
    let mut words = vec!["nohup".to_string(), "env".to_string()];
    for (name, value) in env {
        words.push(format!("{name}={}", shlex::try_quote(value)?));
    }
    words.push(script.to_string());
    words.extend(args.iter().map(|arg| arg.to_string()));
    words.push(format!(">{log_dir}/stdout-stderr.txt"));
    words.extend(["2>&1", "</dev/null", "&"].map(String::from));

    let argv: Vec<&str> = words.iter().map(String::as_str).collect();
    node.uplink().must_run(&argv)
}

/// Writes `contents` to a temporary file in the working directory and copies it to `remote`.
///
/// The temporary file is removed before this returns, whether or not the copy succeeded.
pub fn upload(cluster: &Cluster, node: &Node, contents: &str, remote: &str) -> anyhow::Result<()> {
    let mut file = NamedTempFile::with_prefix_in(
        format!("{}-", node.name()),
        cluster.env().working_dir(),
    )
    .context("could not create a temporary file")?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;

    node.uplink()
        .sync_to(file.path(), remote)
        .with_context(|| format!("could not copy {remote} to {}", node.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{self, ClusterFixture};

    mod reset_dirs {
        use super::*;

        #[test]
        fn removes_creates_and_chowns() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            let node = fixture.cluster.node("n1").unwrap();

            reset_dirs(node, "/mnt/x", &["/mnt/x/a", "/mnt/x/b"]).unwrap();

            assert_eq!(
                vec!["sudo rm -rf /mnt/x/a /mnt/x/b && sudo mkdir -p /mnt/x/a /mnt/x/b && \
                    sudo chown `whoami` /mnt/x /mnt/x/a /mnt/x/b"],
                fixture.commands("n1"),
            );
        }
    }

    mod launch {
        use super::*;

        #[test]
        fn quotes_environment() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            let node = fixture.cluster.node("n1").unwrap();

            launch(
                node,
                &[("OPTS", "-Xmx1g -Xms1g"), ("PLAIN", "x")],
                "/bin/start.sh",
                &["conf.properties"],
                "/mnt/logs",
            )
            .unwrap();

            assert_eq!(
                vec!["nohup env OPTS='-Xmx1g -Xms1g' PLAIN=x /bin/start.sh conf.properties \
                    >/mnt/logs/stdout-stderr.txt 2>&1 </dev/null &"],
                fixture.commands("n1"),
            );
        }
    }

    mod stop {
        use super::*;

        #[test]
        fn kills_and_waits_for_exit() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            fixture.exit_code("n1", "pgrep", 1);
            let node = fixture.cluster.node("n1").unwrap();

            stop(&fixture.cluster, node, Daemon::Broker).unwrap();

            assert_eq!(
                vec!["sudo pkill -f kafka.Kafka", "pgrep -f kafka.Kafka"],
                fixture.commands("n1"),
            );
        }

        #[test]
        fn pkill_failure_is_an_error() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            fixture.exit_code("n1", "pkill", 3);
            let node = fixture.cluster.node("n1").unwrap();

            assert!(stop(&fixture.cluster, node, Daemon::Broker).is_err());
        }
    }

    mod status {
        use super::*;

        #[test]
        fn fails_when_not_running() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            fixture.exit_code("n1", "pgrep", 1);
            let node = fixture.cluster.node("n1").unwrap();

            let err = status(&fixture.cluster, node, Daemon::ZooKeeper).unwrap_err();
            assert_eq!("ZooKeeper is not running on n1", err.to_string());
        }

        #[test]
        fn succeeds_when_running() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            let node = fixture.cluster.node("n1").unwrap();

            status(&fixture.cluster, node, Daemon::ZooKeeper).unwrap();
        }
    }

    mod upload {
        use super::*;

        #[test]
        fn copies_contents_and_removes_temp_file() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            let node = fixture.cluster.node("n1").unwrap();

            upload(&fixture.cluster, node, "a=1\n", "/mnt/conf").unwrap();

            let uploads = fixture.uploads("n1");
            assert_eq!(1, uploads.len());
            assert_eq!("/mnt/conf", uploads[0].remote);
            assert_eq!("a=1\n", uploads[0].contents);
            assert!(!uploads[0].local.exists());
            assert!(fixtures::working_dir_is_empty(&fixture));
        }

        #[test]
        fn removes_temp_file_when_copy_fails() {
            let fixture = ClusterFixture::new().node("n1", vec![]).build();
            fixture.fail_uploads("n1");
            let node = fixture.cluster.node("n1").unwrap();

            assert!(upload(&fixture.cluster, node, "a=1\n", "/mnt/conf").is_err());
            assert!(fixtures::working_dir_is_empty(&fixture));
        }
    }
}
