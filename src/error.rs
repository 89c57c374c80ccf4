use std::time::Duration;

use thiserror::Error;

use crate::job::JobState;

/// Errors raised by the remote transport (SSH session, SFTP and exec channels)
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Network failure or failed SSH handshake
    #[error("Connection error: {0}")]
    Connection(String),

    /// The host rejected the supplied credentials
    #[error("Authentication failed for {user}@{host}: {message}")]
    Authentication {
        user: String,
        host: String,
        message: String,
    },

    /// Remote path does not exist
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// Any other SFTP failure on a path
    #[error("SFTP error on {path}: {message}")]
    Sftp { path: String, message: String },

    /// Failure opening or driving a session channel
    #[error("Channel error: {0}")]
    Channel(String),

    /// The session was already closed
    #[error("Session is closed")]
    Closed,

    /// Local I/O failure while streaming a remote file
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}

/// Errors related to tile keys, tile geometry and tile encoding
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// A key component does not fit in its four-digit field
    #[error("Tile key field {field} = {value} exceeds {max}")]
    KeyOverflow {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// A tile key or file name could not be parsed
    #[error("Invalid tile key: {0}")]
    InvalidKey(String),

    /// Encoding a tile to PNG failed
    #[error("Failed to encode tile {key}: {message}")]
    Encode { key: String, message: String },

    /// A result tile could not be decoded
    #[error("Failed to decode tile {key}: {message}")]
    Decode { key: String, message: String },

    /// A result tile expected by the grid is absent
    #[error("Missing result tile: {0}")]
    MissingTile(String),

    /// Stitching was attempted on a store that was never tiled
    #[error("Tile geometry has not been recorded for this job")]
    GeometryNotSet,

    /// The geometry snapshot may only be recorded once per job
    #[error("Tile geometry has already been recorded for this job")]
    GeometryAlreadySet,

    /// Image or grid parameters that cannot produce a tile grid
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The number of planes does not match slices x frames
    #[error("Expected {expected} planes, got {actual}")]
    PlaneCount { expected: usize, actual: usize },
}

/// Errors that abort a segmentation job
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Authentication or network failure
    #[error("Connection error: {0}")]
    Connection(RemoteError),

    /// A single file upload or download failed
    #[error("Transfer of {path} failed: {source}")]
    Transfer { path: String, source: RemoteError },

    /// The remote command channel failed
    #[error("Remote execution failed: {0}")]
    Execution(RemoteError),

    /// A stat of the sentinel file failed with something other than "not found"
    #[error("Polling {path} failed: {source}")]
    Poll { path: String, source: RemoteError },

    /// Removing the remote job directory failed
    #[error("Cleanup of {path} failed: {source}")]
    Cleanup { path: String, source: RemoteError },

    /// The sentinel file did not appear before the polling deadline
    #[error("Timed out after {waited:?} waiting for {path}")]
    Timeout { path: String, waited: Duration },

    /// The job was cancelled while waiting on the remote host
    #[error("Job cancelled")]
    Cancelled,

    /// The source image could not be tiled
    #[error("Tiling failed: {0}")]
    Tiling(TileError),

    /// The result tiles could not be stitched
    #[error("Stitching failed: {0}")]
    Stitching(TileError),

    /// A stage was requested out of order
    #[error("Invalid job state: expected {expected}, found {actual}")]
    InvalidState { expected: JobState, actual: JobState },
}

impl JobError {
    /// Whether the error was raised by the best-effort cleanup stage.
    pub fn is_cleanup(&self) -> bool {
        matches!(self, JobError::Cleanup { .. })
    }
}
