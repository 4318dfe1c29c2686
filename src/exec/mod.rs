use std::path::PathBuf;

/// Run a subprocess
mod run_cmd;
pub use run_cmd::{CommandRunner, ProcessRunner, ToolCall, ToolOutput};

/// Hand job scripts to the scheduler and record that we did
mod submitter;
pub use submitter::{Submission, SubmissionController};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to start `{0}`")]
    SpawnFailed(String, #[source] std::io::Error),
    #[error("`{call}` failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        call: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Unit \"{0}\" is {1}; refusing to submit")]
    NotAbsent(String, state::State),
    #[error("Unit \"{0}\" already has a submission marker {1:?}")]
    AlreadySubmitted(String, PathBuf),
    #[error(
        "Job {job} for unit \"{unit}\" was submitted but its started marker could not be \
         written; the unit needs to be resolved by hand"
    )]
    MarkerWriteFailed { unit: String, job: String },
    #[error("Unit \"{0}\" is {1}, not ambiguous; nothing to resolve")]
    NotAmbiguous(String, state::State),
    #[error("Can't resolve unit \"{0}\" during a dry run")]
    DryRunResolve(String),
}

impl Error {
    /// Build a `ToolFailed` error from a finished call.
    pub fn tool_failed(call: &ToolCall, output: &ToolOutput) -> Self {
        Self::ToolFailed {
            call: call.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_owned(),
        }
    }
}
