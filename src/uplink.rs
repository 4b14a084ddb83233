//! Uplinks: how actions run commands and move files on a node.
//!
//! Actions only ever see the [Uplink] trait. [LocalUplink] runs everything on the controller
//! itself; the SSH implementation lives in [openssh] behind the feature of the same name.
//!
//! Uplinks capture command output and write it to the node's log rather than to the terminal, so
//! concurrent actions on different nodes don't interleave their output.

#[cfg(feature = "openssh")]
pub mod openssh;

use crate::core::node::Inventory;
use crate::core::role::Role;
use crate::logger::NodeLog;
use anyhow::{bail, Context};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

/// Runs commands and transfers files on one node.
pub trait Uplink: Send + Sync {
    /// Runs `argv` as a shell command line and returns its exit code.
    ///
    /// Arguments are joined with spaces and interpreted by the node's shell, so they may contain
    /// redirections and `&&`. An [Err] means the command could not be run at all; a command that
    /// ran and failed is an [Ok] with a non-zero code.
    fn run(&self, argv: &[&str]) -> anyhow::Result<i32>;

    /// Like [Self::run], but a non-zero exit code is an error.
    fn must_run(&self, argv: &[&str]) -> anyhow::Result<()> {
        match self.run(argv)? {
            0 => Ok(()),
            code => bail!("command exited with code {code}: {}", argv.join(" ")),
        }
    }

    /// Copies the local file `local` to `remote` on the node.
    fn sync_to(&self, local: &Path, remote: &str) -> anyhow::Result<()>;

    /// Copies `remote` (a file or directory) from the node into the local directory `local`.
    fn sync_from(&self, remote: &str, local: &Path) -> anyhow::Result<()>;
}

/// Creates each node's [Uplink] during cluster assembly.
pub trait UplinkFactory {
    fn uplink(
        &self,
        node: &str,
        roles: &[(String, Arc<Role>)],
        log: NodeLog,
        inventory: &Arc<Inventory>,
    ) -> anyhow::Result<Box<dyn Uplink>>;
}

/// Logs a finished command's captured output and converts its status into an exit code.
pub(crate) fn finish(log: &NodeLog, command: &str, output: Output) -> i32 {
    log.captured(format!("Captured stdout of `{command}`:"), &output.stdout);
    log.captured(format!("Captured stderr of `{command}`:"), &output.stderr);

    // A process killed by a signal has no exit code.
    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        log.warning(format!("`{command}` exited with code {code}"));
    }
    code
}

/// Runs commands on the controller, through `sh -c`.
#[derive(Clone, Debug)]
pub struct LocalUplink {
    log: NodeLog,
}

impl LocalUplink {
    pub fn new(log: NodeLog) -> Self {
        LocalUplink { log }
    }
}

/// Copies a file, or a directory recursively, creating the destination's parents.
fn copy_recursively(from: &Path, to: &Path) -> anyhow::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
    }
    Ok(())
}

impl Uplink for LocalUplink {
    fn run(&self, argv: &[&str]) -> anyhow::Result<i32> {
        let command = argv.join(" ");
        self.log.notice(format!("Running `{command}`"));
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .with_context(|| format!("failed to start command: {command}"))?;
        Ok(finish(&self.log, &command, output))
    }

    fn sync_to(&self, local: &Path, remote: &str) -> anyhow::Result<()> {
        self.log
            .notice(format!("Copying {} to {remote}", local.display()));
        copy_recursively(local, Path::new(remote))
            .with_context(|| format!("could not copy {} to {remote}", local.display()))
    }

    fn sync_from(&self, remote: &str, local: &Path) -> anyhow::Result<()> {
        let remote = PathBuf::from(remote);
        let name = remote
            .file_name()
            .with_context(|| format!("{} has no file name", remote.display()))?;
        self.log.notice(format!(
            "Copying {} into {}",
            remote.display(),
            local.display(),
        ));
        copy_recursively(&remote, &local.join(name)).with_context(|| {
            format!(
                "could not copy {} into {}",
                remote.display(),
                local.display(),
            )
        })
    }
}

/// Gives every node a [LocalUplink].
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalUplinkFactory;

impl UplinkFactory for LocalUplinkFactory {
    fn uplink(
        &self,
        _node: &str,
        _roles: &[(String, Arc<Role>)],
        log: NodeLog,
        _inventory: &Arc<Inventory>,
    ) -> anyhow::Result<Box<dyn Uplink>> {
        Ok(Box::new(LocalUplink::new(log)))
    }
}
