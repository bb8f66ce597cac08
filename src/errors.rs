//! Typed error hierarchy for patchwright.
//!
//! Only failures that end a Job live here:
//! - `SandboxError` — the sandbox could not be created or populated
//! - `GenerationError` — the external generation call failed
//! - `JobError` — every terminal failure a Job can report
//!
//! Recoverable failures (rejected diffs, failed applies, failed preflight
//! stages) are plain data on `IterationRecord` and never surface as errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from sandbox acquisition and its git bookkeeping.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox directory under {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Local source {0} does not exist or is not a directory")]
    MissingSource(PathBuf),

    #[error("Failed to copy {path} into the sandbox: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `url` is always the redacted form.
    #[error("git clone of {url} failed: {message}")]
    Clone { url: String, message: String },

    #[error("git clone of {url} timed out after {secs}s")]
    CloneTimedOut { url: String, secs: u64 },

    #[error("Job has neither a local path nor a repository URL")]
    NoTarget,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the external generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to spawn generator `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Generator exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Generator request failed: {0}")]
    Transport(String),

    #[error("Generator returned an empty response")]
    EmptyResponse,

    #[error("Generator did not answer within {secs}s")]
    TimedOut { secs: u64 },
}

/// Terminal Job failures. `Display` is the user-visible reason.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Iteration budget of {iterations} exhausted; last failure: {last_reason}")]
    Exhausted { iterations: u32, last_reason: String },

    #[error("Required repair stage `{stage}` failed: {reason}")]
    RepairStageFailed { stage: String, reason: String },

    #[error("Publication failed: {0}")]
    Publication(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
