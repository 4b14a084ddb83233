//! Writes one log file per node plus one for the cluster as a whole.
//!
//! Every node carries a [NodeLog]. Actions write progress notes to it, and uplinks divert the
//! captured output of remote commands into it, so the file `<node>.log` tells the whole story of
//! what happened on that node during a run. Messages that don't pertain to a specific node go to
//! [CLUSTER_LOG_FILE].
//!
//! Each entry is also mirrored to [tracing] so that the operator's terminal shows the same events
//! at whatever verbosity `RUST_LOG` selects.

use anyhow::anyhow;
use chrono::Local;
use std::fmt::{self, Display};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The name of the log file for log messages that don't pertain to a specific node.
pub const CLUSTER_LOG_FILE: &str = "cluster.log";

/// The scope name [NodeLog] uses for cluster-wide messages.
const CLUSTER_SCOPE: &str = "cluster";

/// Opens a log file for appending, or creates it if it did not exist.
fn open_log_file(path: impl AsRef<Path>) -> io::Result<File> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path.as_ref())
}

/// Severity classifications for log entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry<E> {
    /// Just a status update; nothing's wrong.
    Notice(E),

    /// Something minor went wrong, but the action is continuing.
    Warning(E),

    /// Something significant went wrong.
    Error(E),
}

impl<E> LogEntry<E> {
    pub fn message(&self) -> &E {
        match self {
            LogEntry::Notice(message) | LogEntry::Warning(message) | LogEntry::Error(message) => {
                message
            }
        }
    }

    fn level(&self) -> &'static str {
        match self {
            LogEntry::Notice(_) => "NOTICE",
            LogEntry::Warning(_) => "WARNING",
            LogEntry::Error(_) => "ERROR",
        }
    }
}

impl<E: Display> Display for LogEntry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(f, "[{timestamp}] {}: {}", self.level(), self.message())
    }
}

/// The directory holding a run's log files.
#[derive(Debug)]
pub struct Logs {
    /// The directory where logs are stored.
    directory: PathBuf,

    /// Collects any log messages that don't pertain to a specific node.
    cluster: NodeLog,
}

impl Logs {
    /// Opens a log directory, creating it recursively if it does not exist.
    ///
    /// # Returns
    ///
    /// A new [Logs], or any [io::Error] encountered when trying to ensure that `directory` exists
    /// and is a directory, or when creating [CLUSTER_LOG_FILE] inside it.
    pub fn new(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();

        match fs::metadata(&directory) {
            Ok(md) if !md.is_dir() => {
                return Err(io::Error::new(
                    ErrorKind::Other,
                    anyhow!("not a directory: {}", directory.display()),
                ));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // There's nothing at this path. Try to create the directory recursively.
                fs::create_dir_all(&directory)?;
            }
            _ => {}
        }

        let cluster = NodeLog::to_file(CLUSTER_SCOPE, open_log_file(directory.join(CLUSTER_LOG_FILE))?);

        Ok(Self { directory, cluster })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the log for messages that don't pertain to a specific node.
    pub fn cluster_log(&self) -> NodeLog {
        self.cluster.clone()
    }

    /// Opens (or creates) `<node>.log` and returns a sink that writes to it.
    pub fn node_log(&self, node: &str) -> io::Result<NodeLog> {
        let file = open_log_file(self.directory.join(format!("{node}.log")))?;
        Ok(NodeLog::to_file(node, file))
    }
}

/// A cloneable log sink bound to one node (or to the cluster).
///
/// Write failures are reported through [tracing] rather than returned; a full disk should not
/// fail the action that was trying to log.
#[derive(Clone, Debug)]
pub struct NodeLog {
    scope: Arc<str>,

    /// [None] discards entries after mirroring them to [tracing].
    file: Option<Arc<Mutex<File>>>,
}

impl NodeLog {
    fn to_file(scope: &str, file: File) -> Self {
        NodeLog {
            scope: scope.into(),
            file: Some(Arc::new(Mutex::new(file))),
        }
    }

    /// A sink that keeps nothing on disk. Entries still reach [tracing].
    pub fn discard(scope: &str) -> Self {
        NodeLog {
            scope: scope.into(),
            file: None,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn notice(&self, message: impl Display) {
        self.log(LogEntry::Notice(message.to_string()));
    }

    pub fn warning(&self, message: impl Display) {
        self.log(LogEntry::Warning(message.to_string()));
    }

    pub fn error(&self, message: impl Display) {
        self.log(LogEntry::Error(message.to_string()));
    }

    /// Writes a block of captured command output, e.g. a remote command's stdout.
    ///
    /// Empty output is not logged.
    pub fn captured(&self, header: impl Display, output: &[u8]) {
        if output.is_empty() {
            return;
        }
        let mut message = format!("{header}");
        for line in String::from_utf8_lossy(output).lines() {
            //                       1234
            message.push_str(&format!("\n    {line}"));
        }
        self.notice(message);
    }

    pub fn log(&self, entry: LogEntry<String>) {
        let scope = &*self.scope;
        match &entry {
            LogEntry::Notice(message) => tracing::info!(node = scope, "{message}"),
            LogEntry::Warning(message) => tracing::warn!(node = scope, "{message}"),
            LogEntry::Error(message) => tracing::error!(node = scope, "{message}"),
        }

        if let Some(file) = &self.file {
            let result = match file.lock() {
                Ok(mut file) => file.write_all(entry.to_string().as_bytes()),
                Err(_) => Err(io::Error::new(ErrorKind::Other, "log file lock poisoned")),
            };
            if let Err(err) = result {
                tracing::error!(node = scope, "could not write log entry: {err}");
            }
        }
    }
}
