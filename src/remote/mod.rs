//! Remote host access.
//!
//! A job talks to the remote host through one authenticated session that
//! hands out two kinds of sub-channel:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              RemoteSession               │
//! │   (one connection, exclusively owned)    │
//! └─────────┬─────────────────────┬──────────┘
//!           │ open_transfer       │ open_command
//!           ▼                     ▼
//! ┌───────────────────┐ ┌────────────────────┐
//! │   FileTransfer    │ │   CommandChannel   │
//! │ mkdir/write/read  │ │ exec → ExecOutput  │
//! │ stat/list/remove  │ │                    │
//! └───────────────────┘ └────────────────────┘
//! ```
//!
//! Sub-channels are released when dropped. The SSH implementation lives in
//! [`ssh`]; tests substitute in-memory sessions.

mod auth;
mod ssh;

pub use auth::{resolve_credentials, AuthConfig, AuthMethod, Credentials, Secrets};
pub use ssh::{SshCommand, SshSession, SshTarget, SshTransfer, DEFAULT_CONNECT_TIMEOUT};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RemoteError;

/// Outcome of checking whether a remote path exists.
///
/// Transport failures are reported separately as `Err(RemoteError)`, so a
/// missing file is never confused with a broken connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Exists,
    Missing,
}

impl PathStatus {
    pub fn exists(self) -> bool {
        self == PathStatus::Exists
    }
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name without the parent path
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Combined stdout/stderr and exit status of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub output: String,
    pub exit_status: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// File operations over a file-transfer sub-channel.
///
/// Paths are absolute remote paths.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Create a single directory. The parent must exist.
    async fn mkdir(&self, path: &str) -> Result<(), RemoteError>;

    /// Create or truncate a file and write `data` to it.
    async fn write(&self, path: &str, data: Bytes) -> Result<(), RemoteError>;

    /// Read a whole file.
    ///
    /// Returns [`RemoteError::NotFound`] if the file does not exist.
    async fn read(&self, path: &str) -> Result<Bytes, RemoteError>;

    /// Check whether a path exists.
    async fn stat(&self, path: &str) -> Result<PathStatus, RemoteError>;

    /// List a directory, without the `.` and `..` entries.
    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError>;

    async fn remove_file(&self, path: &str) -> Result<(), RemoteError>;

    /// Remove a directory. Fails if it is not empty.
    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError>;
}

/// A command-execution sub-channel.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run `command` and wait until the remote process exits.
    async fn exec(&self, command: &str) -> Result<ExecOutput, RemoteError>;
}

/// One authenticated connection to a remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    type Transfer: FileTransfer;
    type Command: CommandChannel;

    async fn open_transfer(&self) -> Result<Self::Transfer, RemoteError>;

    async fn open_command(&self) -> Result<Self::Command, RemoteError>;

    /// Disconnect. Closing an already closed session is a no-op.
    async fn close(&self) -> Result<(), RemoteError>;

    /// Tear the transport down at once, failing every call still in flight.
    ///
    /// Used when a job is cancelled while a remote call blocks. The session
    /// cannot be used afterwards; [`close`](Self::close) still succeeds.
    fn abort(&self);

    fn is_closed(&self) -> bool;

    /// A `user@host:port` style identifier for logging.
    fn identifier(&self) -> &str;
}
