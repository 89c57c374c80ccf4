//! # widu
//!
//! Segment microscopy images with a program running on a remote host.
//!
//! An image (a stack of planes over slices and frames) is rescaled to the
//! pixel size the segmentation model expects, cut into fixed-size PNG tiles
//! and uploaded over SFTP. A remote command processes the tiles and signals
//! completion with a sentinel file; the result tiles are then downloaded and
//! stitched back into an image with the original size, stack layout and
//! calibration.
//!
//! ## Architecture
//!
//! - [`stack`] - Multi-plane images and stack-index arithmetic
//! - [`tile`] - Tile keys, grid geometry, PNG codec, tiler and stitcher
//! - [`job`] - Job store and the remote job state machine
//! - [`remote`] - Session traits and the SSH implementation
//! - [`segment`] - End-to-end driver
//! - [`config`] - CLI and persisted settings
//!
//! ## Example
//!
//! ```rust,no_run
//! use widu::{segment, JobOptions, SshSession, SshTarget, Credentials, SourceImage, TilingParams};
//!
//! # async fn run(image: SourceImage) -> Result<(), Box<dyn std::error::Error>> {
//! let session = SshSession::connect(
//!     SshTarget::new("gpu01.lab", 22, "alice"),
//!     Credentials::Password("secret".to_string()),
//! )
//! .await?;
//!
//! let options = JobOptions::new("/scratch/widu", "python3 /opt/unet/run.py");
//! let result = segment(session, &image, &TilingParams::default(), options, None).await?;
//! println!("{}: {} planes", result.image.title(), result.image.plane_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod remote;
pub mod segment;
pub mod stack;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, ConnectionArgs, SegmentArgs, Settings};
pub use error::{JobError, RemoteError, TileError};
pub use job::{
    CancelHandle, CancelToken, JobClient, JobOptions, JobState, JobStore, PollOptions,
    RemoteLayout,
};
pub use remote::{
    CommandChannel, Credentials, DirEntry, EntryKind, ExecOutput, FileTransfer, PathStatus,
    RemoteSession, SshSession, SshTarget,
};
pub use segment::{segment, Segmentation};
pub use stack::{Calibration, SourceImage, StackDimensions};
pub use tile::{
    PngTileCodec, Stitcher, TileGeometry, TileKey, Tiler, TilingParams, DEFAULT_TILE_SIZE,
    REFERENCE_PIXEL_SIZE,
};
