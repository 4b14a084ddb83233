//! Runs commands on remote nodes over SSH.
//!
//! Commands go through a multiplexed [openssh] session. The session is async, so each
//! [SshUplink] holds a [Handle] to the CLI's tokio runtime and blocks on it from the worker
//! thread running the action. File transfers use the local `scp` program that ships with
//! OpenSSH.

use crate::core::node::Inventory;
use crate::core::role::{Role, SshOptions};
use crate::logger::NodeLog;
use crate::uplink::{finish, Uplink, UplinkFactory};
use anyhow::{anyhow, bail, Context};
use openssh::{KnownHosts, Session, SessionBuilder};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;

/// An [Uplink] to one node over SSH.
///
/// The node's address is looked up in the inventory when the first connection is made, not when
/// the uplink is created, so nodes provisioned earlier in the same run are reachable.
pub struct SshUplink {
    node: String,
    options: SshOptions,
    inventory: Arc<Inventory>,
    log: NodeLog,
    runtime: Handle,

    /// Opened on first use and shared by every action on this node.
    session: Mutex<Option<Arc<Session>>>,
}

impl SshUplink {
    pub fn new(
        node: impl Into<String>,
        options: SshOptions,
        inventory: Arc<Inventory>,
        log: NodeLog,
        runtime: Handle,
    ) -> Self {
        SshUplink {
            node: node.into(),
            options,
            inventory,
            log,
            runtime,
            session: Mutex::new(None),
        }
    }

    /// The address to connect to, per the inventory.
    fn host(&self) -> anyhow::Result<String> {
        resolve_host(&self.node, &self.options, &self.inventory)
    }

    /// `host`, or `user@host` if a user is configured.
    fn destination(&self) -> anyhow::Result<String> {
        let host = self.host()?;
        Ok(match &self.options.ssh_user {
            Some(user) => format!("{user}@{host}"),
            None => host,
        })
    }

    fn session(&self) -> anyhow::Result<Arc<Session>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = &*session {
            return Ok(Arc::clone(session));
        }

        let host = self.host()?;
        self.log.notice(format!("Connecting to {host}"));
        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        if let Some(user) = &self.options.ssh_user {
            builder.user(user.clone());
        }
        if let Some(port) = self.options.ssh_port {
            builder.port(port);
        }
        if let Some(keyfile) = &self.options.ssh_identity_file {
            builder.keyfile(keyfile);
        }

        let connected = self
            .runtime
            .block_on(builder.connect_mux(&host))
            .with_context(|| format!("could not connect to {host}"))?;
        let connected = Arc::new(connected);
        *session = Some(Arc::clone(&connected));
        Ok(connected)
    }

    /// Runs `scp` on the controller.
    fn scp(&self, from: &str, to: &str, recursive: bool) -> anyhow::Result<()> {
        let args = scp_args(&self.options, from, to, recursive);
        self.log.notice(format!("Running `scp {}`", args.join(" ")));
        let output = Command::new("scp")
            .args(&args)
            .output()
            .context("failed to start scp")?;
        match finish(&self.log, "scp", output) {
            0 => Ok(()),
            code => bail!("scp exited with code {code} copying {from} to {to}"),
        }
    }
}

impl Uplink for SshUplink {
    fn run(&self, argv: &[&str]) -> anyhow::Result<i32> {
        let command = argv.join(" ");
        let session = self.session()?;
        self.log.notice(format!("Running `{command}`"));
        let output = self
            .runtime
            .block_on(session.raw_command(&command).output())
            .with_context(|| format!("could not run `{command}` on {}", self.node))?;
        Ok(finish(&self.log, &command, output))
    }

    fn sync_to(&self, local: &Path, remote: &str) -> anyhow::Result<()> {
        let local = local
            .to_str()
            .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", local.display()))?;
        let remote = format!("{}:{remote}", self.destination()?);
        self.scp(local, &remote, false)
    }

    fn sync_from(&self, remote: &str, local: &Path) -> anyhow::Result<()> {
        let local = local
            .to_str()
            .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", local.display()))?;
        let remote = format!("{}:{remote}", self.destination()?);
        self.scp(&remote, local, true)
    }
}

/// Picks the address for `node`: the private one for `internal` connections, else the public.
fn resolve_host(node: &str, options: &SshOptions, inventory: &Inventory) -> anyhow::Result<String> {
    let discovered = inventory.get(node);
    let host = match options.internal {
        true => discovered.internal_dns(),
        false => discovered.external_dns(),
    };
    match host {
        "" => bail!("no address is known for {node}; it has not been provisioned"),
        host => Ok(host.to_string()),
    }
}

fn scp_args(options: &SshOptions, from: &str, to: &str, recursive: bool) -> Vec<String> {
    let mut args = vec![
        "-q".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
    ];
    if recursive {
        args.push("-r".to_string());
    }
    if let Some(port) = options.ssh_port {
        args.extend(["-P".to_string(), port.to_string()]);
    }
    if let Some(keyfile) = &options.ssh_identity_file {
        args.extend(["-i".to_string(), keyfile.to_string_lossy().into_owned()]);
    }
    args.extend([from.to_string(), to.to_string()]);
    args
}

/// Gives each node an [SshUplink] configured by its `staticNode` or `cloudNode` role.
pub struct SshUplinkFactory {
    runtime: Handle,
}

impl SshUplinkFactory {
    pub fn new(runtime: Handle) -> Self {
        SshUplinkFactory { runtime }
    }
}

impl UplinkFactory for SshUplinkFactory {
    fn uplink(
        &self,
        node: &str,
        roles: &[(String, Arc<Role>)],
        log: NodeLog,
        inventory: &Arc<Inventory>,
    ) -> anyhow::Result<Box<dyn Uplink>> {
        let options = roles
            .iter()
            .find_map(|(_, role)| role.ssh_options())
            .cloned()
            .with_context(|| format!("node {node} has no staticNode or cloudNode role"))?;
        Ok(Box::new(SshUplink::new(
            node,
            options,
            Arc::clone(inventory),
            log,
            self.runtime.clone(),
        )))
    }
}
