use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diff::ValidationOutcome;
use crate::preflight::PreflightReport;
use crate::publish::Publication;
use crate::repair::RepairStageResult;

/// Top-level Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Initializing,
    GatheringContext,
    Iterating,
    Finalizing,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Initializing => "initializing",
            JobPhase::GatheringContext => "gathering context",
            JobPhase::Iterating => "iterating",
            JobPhase::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

/// One pass of generate, validate, apply, preflight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Raw generator output.
    pub candidate: String,
    pub validation: ValidationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightReport>,
    /// Repair-stage verification failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
    /// Commit kept by this iteration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub rolled_back: bool,
}

impl IterationRecord {
    pub fn new(iteration: u32, candidate: String, validation: ValidationOutcome) -> Self {
        Self {
            iteration,
            candidate,
            validation,
            apply_error: None,
            preflight: None,
            verification_error: None,
            commit: None,
            rolled_back: false,
        }
    }

    /// Why this iteration did not succeed; `None` for successful ones.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.validation {
            ValidationOutcome::NoChanges => None,
            ValidationOutcome::Rejected(rejection) => Some(rejection.to_string()),
            ValidationOutcome::Applicable(_) => {
                if let Some(err) = &self.apply_error {
                    return Some(format!("the diff passed validation but did not apply: {err}"));
                }
                if let Some(err) = &self.verification_error {
                    return Some(err.clone());
                }
                self.preflight.as_ref().and_then(PreflightReport::feedback)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

/// What a successful Job produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The generator reported nothing to change.
    NoChanges,
    /// Verified commits on the sandbox branch.
    Changed {
        branch: String,
        commit: String,
        files: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Change,
    Repair,
}

/// Terminal state of one Job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub mode: JobMode,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    /// Last concrete failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<IterationRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repair_stages: Vec<RepairStageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<Publication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_patch: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// A report for a Job whose task never produced one.
    pub fn aborted(job_id: String, mode: JobMode, reason: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            mode,
            status: JobStatus::Failed,
            outcome: None,
            error: Some(reason),
            iterations: Vec::new(),
            repair_stages: Vec::new(),
            publication: None,
            failed_patch: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// One human-readable line for the CLI.
    pub fn summary(&self) -> String {
        match (&self.status, &self.outcome) {
            (JobStatus::Succeeded, Some(JobOutcome::NoChanges)) => {
                format!("Job {} succeeded: nothing to change", self.job_id)
            }
            (JobStatus::Succeeded, Some(JobOutcome::Changed { branch, files, .. })) => {
                let published = match &self.publication {
                    Some(p) => format!("; {}", p.describe()),
                    None => String::new(),
                };
                format!(
                    "Job {} succeeded: {} file(s) changed on {}{}",
                    self.job_id, files, branch, published
                )
            }
            (JobStatus::Succeeded, None) => format!("Job {} succeeded", self.job_id),
            (JobStatus::Failed, _) => format!(
                "Job {} failed: {}",
                self.job_id,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
