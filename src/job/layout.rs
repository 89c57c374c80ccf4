//! Remote directory layout of a job.
//!
//! The remote program must honor this contract:
//!
//! ```text
//! {base}/{job_id}/                      job directory, passed to the command
//! {base}/{job_id}/{key}.png             input tiles
//! {base}/{job_id}/results/{key}.png     result tiles, same keys as inputs
//! {base}/{job_id}/done.txt              written once results are complete
//! ```

use crate::tile::TileKey;

/// Name of the sentinel file signalling completion.
pub const SENTINEL_FILE: &str = "done.txt";

/// Subdirectory the remote program writes results into.
pub const RESULTS_DIR: &str = "results";

/// Remote paths for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    base: String,
    job_id: String,
}

impl RemoteLayout {
    pub fn new(base: impl Into<String>, job_id: impl Into<String>) -> Self {
        let base = base.into();
        let trimmed = base.trim_end_matches('/');
        // Keep a bare "/" usable as a base
        let base = if trimmed.is_empty() && base.starts_with('/') {
            String::new()
        } else {
            trimmed.to_string()
        };
        Self {
            base,
            job_id: job_id.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// `{base}/{job_id}`
    pub fn job_dir(&self) -> String {
        format!("{}/{}", self.base, self.job_id)
    }

    /// `{base}/{job_id}/{key}.png`
    pub fn input_path(&self, key: &TileKey) -> String {
        format!("{}/{}", self.job_dir(), key.file_name())
    }

    /// `{base}/{job_id}/results`
    pub fn results_dir(&self) -> String {
        format!("{}/{}", self.job_dir(), RESULTS_DIR)
    }

    /// `{base}/{job_id}/results/{key}.png`
    pub fn result_path(&self, key: &TileKey) -> String {
        format!("{}/{}", self.results_dir(), key.file_name())
    }

    /// `{base}/{job_id}/done.txt`
    pub fn sentinel_path(&self) -> String {
        format!("{}/{}", self.job_dir(), SENTINEL_FILE)
    }

    /// The command line run on the remote host: `{command} {base}/{job_id}/`.
    pub fn command_line(&self, command: &str) -> String {
        format!("{} {}/", command.trim_end(), self.job_dir())
    }
}
