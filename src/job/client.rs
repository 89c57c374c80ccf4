//! Remote job protocol.
//!
//! [`JobClient`] drives one job through its stages against an exclusively
//! owned [`RemoteSession`]:
//!
//! ```text
//! upload()              mkdir {job}; write every raw tile to {job}/{key}.png
//! execute()             run "{command} {job}/" and wait for it to exit
//! wait_for_completion() stat {job}/done.txt until it exists
//! download()            read {job}/results/{key}.png for every raw key
//! cleanup()             remove {job} recursively
//! ```
//!
//! Each stage must be called in order. A failing stage moves the job to
//! [`JobState::Aborted`] and returns the error; nothing is retried and the
//! remote directory is left in place. Every sub-channel is opened for one
//! stage and released when the stage returns.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, RemoteError};
use crate::remote::{CommandChannel, ExecOutput, FileTransfer, PathStatus, RemoteSession};

use super::cancel::CancelToken;
use super::layout::RemoteLayout;
use super::state::JobState;
use super::store::JobStore;

/// Default pause between two sentinel checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How to wait for the sentinel file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between two checks
    pub interval: Duration,

    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Remote side of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Remote folder job directories are created in
    pub base_folder: String,

    /// Remote command; the job directory is appended as its last argument
    pub command: String,

    pub poll: PollOptions,
}

impl JobOptions {
    pub fn new(base_folder: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            base_folder: base_folder.into(),
            command: command.into(),
            poll: PollOptions::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Drives one job through the remote protocol.
pub struct JobClient<S: RemoteSession> {
    session: S,
    options: JobOptions,
    layout: RemoteLayout,
    state: watch::Sender<JobState>,
    history: Vec<JobState>,
    cancel: Option<CancelToken>,
}

impl<S: RemoteSession> JobClient<S> {
    pub fn new(session: S, options: JobOptions, job_id: impl Into<String>) -> Self {
        let layout = RemoteLayout::new(options.base_folder.clone(), job_id);
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            session,
            options,
            layout,
            state,
            history: vec![JobState::Idle],
            cancel: None,
        }
    }

    /// Stop waiting stages when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn job_id(&self) -> &str {
        self.layout.job_id()
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Every state the job has been in, oldest first.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Run upload, execution, polling and download in order.
    pub async fn run(&mut self, store: &JobStore) -> Result<ExecOutput, JobError> {
        self.upload(store).await?;
        let output = self.execute().await?;
        self.wait_for_completion().await?;
        self.download(store).await?;
        Ok(output)
    }

    /// Create the job directory and write every raw tile into it.
    ///
    /// Tiles are written one at a time in key order; the first failure stops
    /// the stage. Returns the number of tiles written.
    pub async fn upload(&mut self, store: &JobStore) -> Result<usize, JobError> {
        self.enter(JobState::Idle, JobState::Uploading)?;
        let result = self.upload_tiles(store).await;
        self.settle(result)
    }

    async fn upload_tiles(&self, store: &JobStore) -> Result<usize, JobError> {
        let job_dir = self.layout.job_dir();
        let transfer = self
            .session
            .open_transfer()
            .await
            .map_err(|e| transfer_error(&job_dir, e))?;

        transfer
            .mkdir(&job_dir)
            .await
            .map_err(|e| transfer_error(&job_dir, e))?;

        let keys = store.raw_keys();
        for key in &keys {
            self.check_cancelled()?;
            let path = self.layout.input_path(key);
            let data = store.get_raw(key).ok_or_else(|| JobError::Transfer {
                path: path.clone(),
                source: RemoteError::NotFound(key.file_name()),
            })?;

            let size = data.len();
            transfer
                .write(&path, data)
                .await
                .map_err(|e| transfer_error(&path, e))?;
            debug!(job_id = self.job_id(), path = %path, size, "Uploaded tile");
        }

        info!(job_id = self.job_id(), tiles = keys.len(), "Upload complete");
        Ok(keys.len())
    }

    /// Run the remote command on the job directory and wait for it to exit.
    ///
    /// A non-zero exit status is logged but does not fail the stage: only
    /// the sentinel file tells whether results are ready.
    pub async fn execute(&mut self) -> Result<ExecOutput, JobError> {
        self.enter(JobState::Uploading, JobState::Executing)?;
        let result = self.run_command().await;
        self.settle(result)
    }

    async fn run_command(&mut self) -> Result<ExecOutput, JobError> {
        self.check_cancelled()?;
        let command_line = self.layout.command_line(&self.options.command);
        let channel = self
            .session
            .open_command()
            .await
            .map_err(JobError::Execution)?;

        info!(job_id = self.job_id(), command = %command_line, "Running remote command");
        let exec = channel.exec(&command_line);
        let output = match self.cancel.as_mut() {
            Some(token) => tokio::select! {
                output = exec => output,
                _ = token.cancelled() => {
                    // The command still holds the session; drop the link
                    warn!(job_id = self.layout.job_id(), "Cancelled during remote command");
                    self.session.abort();
                    return Err(JobError::Cancelled);
                }
            },
            None => exec.await,
        }
        .map_err(JobError::Execution)?;

        debug!(job_id = self.job_id(), output = %output.output, "Remote command output");
        if output.success() {
            info!(job_id = self.job_id(), "Remote command finished");
        } else {
            warn!(
                job_id = self.job_id(),
                exit_status = output.exit_status,
                "Remote command exited with non-zero status"
            );
        }
        Ok(output)
    }

    /// Wait until the sentinel file exists.
    ///
    /// A missing sentinel means "not yet"; any other stat error is fatal.
    /// Returns the number of checks made.
    pub async fn wait_for_completion(&mut self) -> Result<u32, JobError> {
        self.enter(JobState::Executing, JobState::Polling)?;
        let result = self.poll_sentinel().await;
        self.settle(result)
    }

    async fn poll_sentinel(&mut self) -> Result<u32, JobError> {
        let sentinel = self.layout.sentinel_path();
        let PollOptions { interval, timeout } = self.options.poll;
        let transfer = self
            .session
            .open_transfer()
            .await
            .map_err(|e| poll_error(&sentinel, e))?;

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            self.check_cancelled()?;
            attempts += 1;

            match transfer.stat(&sentinel).await {
                Ok(PathStatus::Exists) => {
                    info!(job_id = self.job_id(), attempts, "Remote job complete");
                    return Ok(attempts);
                }
                Ok(PathStatus::Missing) => {
                    debug!(job_id = self.job_id(), attempts, "Sentinel not there yet");
                }
                Err(e) => return Err(poll_error(&sentinel, e)),
            }

            let pause = match timeout {
                Some(timeout) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(JobError::Timeout {
                            path: sentinel,
                            waited,
                        });
                    }
                    interval.min(timeout - waited)
                }
                None => interval,
            };
            self.pause(pause).await?;
        }
    }

    /// Fetch the result tile of every raw key into the store.
    ///
    /// Returns the number of tiles fetched.
    pub async fn download(&mut self, store: &JobStore) -> Result<usize, JobError> {
        self.enter(JobState::Polling, JobState::Downloading)?;
        let result = self.download_tiles(store).await;
        self.settle(result)
    }

    async fn download_tiles(&self, store: &JobStore) -> Result<usize, JobError> {
        let results_dir = self.layout.results_dir();
        let transfer = self
            .session
            .open_transfer()
            .await
            .map_err(|e| transfer_error(&results_dir, e))?;

        let keys = store.raw_keys();
        for key in &keys {
            self.check_cancelled()?;
            let path = self.layout.result_path(key);
            let data = transfer
                .read(&path)
                .await
                .map_err(|e| transfer_error(&path, e))?;
            debug!(job_id = self.job_id(), path = %path, size = data.len(), "Downloaded tile");
            store.put_result(*key, data);
        }

        info!(job_id = self.job_id(), tiles = keys.len(), "Download complete");
        Ok(keys.len())
    }

    /// Remove the remote job directory.
    ///
    /// The job ends in [`JobState::Done`] whether or not removal succeeds;
    /// a failure is logged and returned for the caller to report. Removing
    /// an already removed directory succeeds, and calling this again once
    /// the job is done repeats the removal.
    pub async fn cleanup(&mut self) -> Result<(), JobError> {
        if self.state() != JobState::Done {
            self.enter(JobState::Downloading, JobState::CleaningUp)?;
        }

        let job_dir = self.layout.job_dir();
        let result = self.remove_job_dir(&job_dir).await;

        if self.state() == JobState::CleaningUp {
            self.transition(JobState::Done);
        }

        result.map_err(|source| {
            warn!(job_id = self.job_id(), path = %job_dir, error = %source, "Cleanup failed");
            JobError::Cleanup {
                path: job_dir,
                source,
            }
        })
    }

    async fn remove_job_dir(&self, job_dir: &str) -> Result<(), RemoteError> {
        let transfer = self.session.open_transfer().await?;
        if transfer.stat(job_dir).await? == PathStatus::Missing {
            debug!(job_id = self.job_id(), "Job directory already removed");
            return Ok(());
        }
        remove_tree(&transfer, job_dir).await?;
        info!(job_id = self.job_id(), path = %job_dir, "Removed remote job directory");
        Ok(())
    }

    /// Close the session and hand back the final state.
    pub async fn close(self) -> Result<JobState, JobError> {
        let state = self.state();
        self.session.close().await.map_err(JobError::Connection)?;
        Ok(state)
    }

    // =========================================================================
    // State handling
    // =========================================================================

    fn enter(&mut self, expected: JobState, next: JobState) -> Result<(), JobError> {
        let actual = self.state();
        if actual != expected {
            return Err(JobError::InvalidState { expected, actual });
        }
        self.transition(next);
        Ok(())
    }

    fn transition(&mut self, to: JobState) {
        let from = self.state();
        debug_assert!(from.can_transition_to(to), "{} -> {}", from, to);
        self.state.send_replace(to);
        self.history.push(to);
        info!(job_id = self.job_id(), from = %from, to = %to, "Job state changed");
    }

    /// Abort the job if the stage failed.
    fn settle<T>(&mut self, result: Result<T, JobError>) -> Result<T, JobError> {
        if let Err(err) = &result {
            error!(job_id = self.job_id(), state = %self.state(), error = %err, "Job aborted");
            if !self.state().is_terminal() {
                self.transition(JobState::Aborted);
            }
        }
        result
    }

    fn check_cancelled(&self) -> Result<(), JobError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(JobError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Sleep, waking early with [`JobError::Cancelled`] on cancellation.
    async fn pause(&mut self, duration: Duration) -> Result<(), JobError> {
        match self.cancel.as_mut() {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = token.cancelled() => Err(JobError::Cancelled),
            },
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

fn transfer_error(path: &str, source: RemoteError) -> JobError {
    JobError::Transfer {
        path: path.to_string(),
        source,
    }
}

fn poll_error(path: &str, source: RemoteError) -> JobError {
    JobError::Poll {
        path: path.to_string(),
        source,
    }
}

/// Remove `path` and everything below it.
///
/// A subdirectory whose direct removal fails is emptied first and removed
/// again.
fn remove_tree<'a, T: FileTransfer>(
    transfer: &'a T,
    path: &'a str,
) -> BoxFuture<'a, Result<(), RemoteError>> {
    Box::pin(async move {
        for entry in transfer.read_dir(path).await? {
            let child = format!("{}/{}", path, entry.name);
            if entry.is_dir() {
                if transfer.remove_dir(&child).await.is_err() {
                    remove_tree(transfer, &child).await?;
                }
            } else {
                transfer.remove_file(&child).await?;
            }
        }
        transfer.remove_dir(path).await
    })
}
