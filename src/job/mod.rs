//! Segmentation jobs.
//!
//! A job carries the tiles of one image through the remote host:
//!
//! ```text
//! ┌──────────────┐  upload   ┌───────────────────────────┐
//! │   JobStore   │ ────────▶ │ {base}/{job_id}/*.png     │
//! │  raw tiles   │           │                           │
//! │              │  execute  │ {command} {base}/{job_id}/│
//! │              │           │                           │
//! │              │   poll    │ {base}/{job_id}/done.txt  │
//! │              │           │                           │
//! │ result tiles │ ◀──────── │ {base}/{job_id}/results/  │
//! └──────────────┘ download  └───────────────────────────┘
//! ```
//!
//! - [`JobStore`]: tiles and geometry snapshot of a job
//! - [`JobClient`]: the remote protocol as a state machine over [`JobState`]
//! - [`RemoteLayout`]: remote path construction
//! - [`CancelHandle`] / [`CancelToken`]: stopping a job while it waits

mod cancel;
mod client;
mod layout;
mod state;
mod store;

pub use cancel::{CancelHandle, CancelToken};
pub use client::{JobClient, JobOptions, PollOptions, DEFAULT_POLL_INTERVAL};
pub use layout::{RemoteLayout, RESULTS_DIR, SENTINEL_FILE};
pub use state::JobState;
pub use store::{JobStore, JOB_ID_PREFIX};
