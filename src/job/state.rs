//! Job lifecycle states.
//!
//! ```text
//! Idle → Uploading → Executing → Polling → Downloading → CleaningUp → Done
//!   │        │           │          │           │             │
//!   └────────┴───────────┴──────────┴───────────┴─────────────┴──▶ Aborted
//! ```

use std::fmt;

/// Stage of a remote segmentation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Nothing sent yet
    Idle,
    /// Writing input tiles to the remote job directory
    Uploading,
    /// Running the remote command
    Executing,
    /// Waiting for the sentinel file
    Polling,
    /// Fetching result tiles
    Downloading,
    /// Removing the remote job directory
    CleaningUp,
    /// Finished; the session may be closed
    Done,
    /// Stopped on an unrecoverable error or cancellation
    Aborted,
}

impl JobState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Aborted)
    }

    /// The stage that normally follows this one.
    pub fn next(self) -> Option<JobState> {
        match self {
            JobState::Idle => Some(JobState::Uploading),
            JobState::Uploading => Some(JobState::Executing),
            JobState::Executing => Some(JobState::Polling),
            JobState::Polling => Some(JobState::Downloading),
            JobState::Downloading => Some(JobState::CleaningUp),
            JobState::CleaningUp => Some(JobState::Done),
            JobState::Done | JobState::Aborted => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == JobState::Aborted || self.next() == Some(to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Uploading => "uploading",
            JobState::Executing => "executing",
            JobState::Polling => "polling",
            JobState::Downloading => "downloading",
            JobState::CleaningUp => "cleaning-up",
            JobState::Done => "done",
            JobState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
