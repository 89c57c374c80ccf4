//! SSH/SFTP implementation of [`RemoteSession`].
//!
//! Built on the blocking `ssh2` bindings to libssh2. Every blocking call runs
//! on tokio's blocking pool so the async job driver never stalls a runtime
//! worker thread.
//!
//! The session requests zlib compression and does not check the host key
//! against a known-hosts file.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use ssh2::{ErrorCode, ExtendedData, Session, Sftp};
use tracing::{debug, info, warn};

use crate::error::RemoteError;

use super::auth::Credentials;
use super::{
    CommandChannel, DirEntry, EntryKind, ExecOutput, FileTransfer, PathStatus, RemoteSession,
};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SFTP status codes meaning "no such file".
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connect_timeout: Duration,
    pub compress: bool,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            compress: true,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `user@host:port`
    pub fn identifier(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Run a blocking libssh2 call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemoteError::Channel(format!("blocking task failed: {}", e)))?
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH)
    )
}

fn sftp_error(path: &str, err: ssh2::Error) -> RemoteError {
    if is_not_found(&err) {
        RemoteError::NotFound(path.to_string())
    } else {
        RemoteError::Sftp {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

fn io_error(path: &str, err: std::io::Error) -> RemoteError {
    RemoteError::Sftp {
        path: path.to_string(),
        message: err.to_string(),
    }
}

fn channel_error(err: ssh2::Error) -> RemoteError {
    RemoteError::Channel(err.to_string())
}

fn authenticate(
    session: &Session,
    target: &SshTarget,
    credentials: &Credentials,
) -> Result<(), RemoteError> {
    let auth_error = |message: String| RemoteError::Authentication {
        user: target.username.clone(),
        host: target.host.clone(),
        message,
    };

    match credentials {
        Credentials::Password(password) => session
            .userauth_password(&target.username, password)
            .map_err(|e| auth_error(e.to_string()))?,
        Credentials::KeyFile { path, passphrase } => {
            let plain = session.userauth_pubkey_file(&target.username, None, path, None);
            match (plain, passphrase) {
                (Ok(()), _) => {}
                (Err(_), Some(passphrase)) => session
                    .userauth_pubkey_file(&target.username, None, path, Some(passphrase.as_str()))
                    .map_err(|e| auth_error(e.to_string()))?,
                (Err(e), None) => return Err(auth_error(e.to_string())),
            }
        }
    }

    if !session.authenticated() {
        return Err(auth_error("server did not accept the credentials".to_string()));
    }
    Ok(())
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated SSH connection.
pub struct SshSession {
    session: Session,
    /// Second handle on the session socket, used to abort blocked calls
    stream: TcpStream,
    identifier: String,
    closed: AtomicBool,
    aborted: AtomicBool,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("identifier", &self.identifier)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("aborted", &self.aborted.load(Ordering::SeqCst))
            .finish()
    }
}

impl SshSession {
    /// Connect, handshake and authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connection`] if the host cannot be reached or
    /// the handshake fails, and [`RemoteError::Authentication`] if the
    /// credentials are rejected.
    pub async fn connect(target: SshTarget, credentials: Credentials) -> Result<Self, RemoteError> {
        let identifier = target.identifier();
        info!(remote = %identifier, compress = target.compress, "Connecting");

        let (session, stream) = blocking(move || {
            let addr = (target.host.as_str(), target.port)
                .to_socket_addrs()
                .map_err(|e| RemoteError::Connection(format!("{}: {}", target.host, e)))?
                .next()
                .ok_or_else(|| {
                    RemoteError::Connection(format!("{}: no address found", target.host))
                })?;
            let tcp = TcpStream::connect_timeout(&addr, target.connect_timeout)
                .map_err(|e| RemoteError::Connection(format!("{}: {}", addr, e)))?;
            let stream = tcp
                .try_clone()
                .map_err(|e| RemoteError::Connection(format!("{}: {}", addr, e)))?;

            let mut session = Session::new().map_err(|e| RemoteError::Connection(e.to_string()))?;
            session.set_compress(target.compress);
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .map_err(|e| RemoteError::Connection(format!("handshake failed: {}", e)))?;

            authenticate(&session, &target, &credentials)?;
            Ok((session, stream))
        })
        .await?;

        info!(remote = %identifier, "Connected");
        Ok(Self {
            session,
            stream,
            identifier,
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), RemoteError> {
        if self.closed.load(Ordering::SeqCst) || self.aborted.load(Ordering::SeqCst) {
            Err(RemoteError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    type Transfer = SshTransfer;
    type Command = SshCommand;

    async fn open_transfer(&self) -> Result<SshTransfer, RemoteError> {
        self.ensure_open()?;
        let session = self.session.clone();
        let sftp = blocking(move || session.sftp().map_err(channel_error)).await?;
        debug!(remote = %self.identifier, "Opened SFTP channel");
        Ok(SshTransfer {
            sftp: Arc::new(Mutex::new(sftp)),
        })
    }

    async fn open_command(&self) -> Result<SshCommand, RemoteError> {
        self.ensure_open()?;
        Ok(SshCommand {
            session: self.session.clone(),
        })
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The socket is gone; there is nobody left to say goodbye to
        if self.aborted.load(Ordering::SeqCst) {
            info!(remote = %self.identifier, "Disconnected");
            return Ok(());
        }
        let session = self.session.clone();
        blocking(move || {
            session
                .disconnect(None, "widu session closed", None)
                .map_err(|e| RemoteError::Connection(e.to_string()))
        })
        .await?;
        info!(remote = %self.identifier, "Disconnected");
        Ok(())
    }

    fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        // Blocked libssh2 reads hold the session lock; failing the socket
        // makes them return so the lock is released
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(remote = %self.identifier, error = %e, "Socket already shut down");
        }
        warn!(remote = %self.identifier, "Aborted session");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// SFTP sub-channel
// =============================================================================

/// An SFTP sub-channel. The channel closes when the last clone is dropped.
#[derive(Clone)]
pub struct SshTransfer {
    sftp: Arc<Mutex<Sftp>>,
}

impl SshTransfer {
    /// Run `f` against the SFTP handle on the blocking pool.
    async fn with_sftp<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce(&Sftp) -> Result<T, RemoteError> + Send + 'static,
        T: Send + 'static,
    {
        let sftp = Arc::clone(&self.sftp);
        blocking(move || f(&sftp.lock())).await
    }
}

#[async_trait]
impl FileTransfer for SshTransfer {
    async fn mkdir(&self, path: &str) -> Result<(), RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            sftp.mkdir(Path::new(&path), 0o755)
                .map_err(|e| sftp_error(&path, e))
        })
        .await
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let mut file = sftp
                .create(Path::new(&path))
                .map_err(|e| sftp_error(&path, e))?;
            file.write_all(&data).map_err(|e| io_error(&path, e))?;
            file.flush().map_err(|e| io_error(&path, e))
        })
        .await
    }

    async fn read(&self, path: &str) -> Result<Bytes, RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let mut file = sftp
                .open(Path::new(&path))
                .map_err(|e| sftp_error(&path, e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| io_error(&path, e))?;
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn stat(&self, path: &str) -> Result<PathStatus, RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| match sftp.stat(Path::new(&path)) {
            Ok(_) => Ok(PathStatus::Exists),
            Err(e) if is_not_found(&e) => Ok(PathStatus::Missing),
            Err(e) => Err(sftp_error(&path, e)),
        })
        .await
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            let entries = sftp
                .readdir(Path::new(&path))
                .map_err(|e| sftp_error(&path, e))?;
            Ok(entries
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path.file_name()?.to_string_lossy().into_owned();
                    if name == "." || name == ".." {
                        return None;
                    }
                    let kind = if stat.is_dir() {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    };
                    Some(DirEntry { name, kind })
                })
                .collect())
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> Result<(), RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            sftp.unlink(Path::new(&path)).map_err(|e| sftp_error(&path, e))
        })
        .await
    }

    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| {
            sftp.rmdir(Path::new(&path)).map_err(|e| sftp_error(&path, e))
        })
        .await
    }
}

// =============================================================================
// Exec sub-channel
// =============================================================================

/// A command-execution sub-channel.
///
/// Each [`exec`](CommandChannel::exec) opens its own libssh2 channel, which
/// is closed when the call returns, on success or error.
pub struct SshCommand {
    session: Session,
}

#[async_trait]
impl CommandChannel for SshCommand {
    async fn exec(&self, command: &str) -> Result<ExecOutput, RemoteError> {
        let session = self.session.clone();
        let command = command.to_string();
        blocking(move || {
            let mut channel = session.channel_session().map_err(channel_error)?;
            channel
                .handle_extended_data(ExtendedData::Merge)
                .map_err(channel_error)?;
            channel.exec(&command).map_err(channel_error)?;

            let mut raw = Vec::new();
            channel
                .read_to_end(&mut raw)
                .map_err(|e| RemoteError::Channel(e.to_string()))?;
            channel.wait_close().map_err(channel_error)?;
            let exit_status = channel.exit_status().map_err(channel_error)?;

            Ok(ExecOutput {
                output: String::from_utf8_lossy(&raw).into_owned(),
                exit_status,
            })
        })
        .await
    }
}
