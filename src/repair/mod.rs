//! Repair mode: "make this repository shippable".
//!
//! A fixed list of narrow stages, each generated, applied and verified on its
//! own. A stage gets [`MAX_STAGE_ATTEMPTS`] tries. A required stage that ends
//! neither `success` nor `no_changes` aborts the rest of the pipeline;
//! optional stages that fail are recorded and passed over.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::errors::JobError;
use crate::job::Job;
use crate::orchestrator::attempt::{self, AttemptEnv, AttemptTask, Verifier};
use crate::orchestrator::state::IterationRecord;
use crate::preflight::PreflightStage;

/// Initial try plus one corrective retry.
pub const MAX_STAGE_ATTEMPTS: u32 = 2;

/// One narrowly scoped objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairStage {
    pub name: &'static str,
    pub required: bool,
    pub objective: &'static str,
    /// Configured preflight commands that verify this stage.
    pub verify_with: &'static [PreflightStage],
    /// Extra shell checks, always run after `verify_with`.
    pub checks: &'static [&'static str],
}

pub const REPAIR_STAGES: &[RepairStage] = &[
    RepairStage {
        name: "fix-build",
        required: true,
        objective: "Make the project install and type-check cleanly. Fix compile errors, \
                    missing imports and broken dependency declarations. Change nothing else.",
        verify_with: &[PreflightStage::Install, PreflightStage::Typecheck],
        checks: &[],
    },
    RepairStage {
        name: "normalize-ui",
        required: false,
        objective: "Make the UI consistent: shared spacing, typography and button styles, \
                    and remove dead styles. Do not change behavior.",
        verify_with: &[PreflightStage::Typecheck, PreflightStage::Lint],
        checks: &[],
    },
    RepairStage {
        name: "loading-empty-states",
        required: false,
        objective: "Give every view that fetches data a loading state, an empty state and \
                    an error state instead of rendering nothing.",
        verify_with: &[PreflightStage::Typecheck, PreflightStage::Lint],
        checks: &[],
    },
    RepairStage {
        name: "readme",
        required: false,
        objective: "Write or update README.md: what the project does and how to install, \
                    run and test it. Touch no other file.",
        verify_with: &[],
        checks: &["test -s README.md"],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStageStatus {
    Success,
    NoChanges,
    Failed,
    Skipped,
}

impl RepairStageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStageStatus::Success => "success",
            RepairStageStatus::NoChanges => "no_changes",
            RepairStageStatus::Failed => "failed",
            RepairStageStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairStageResult {
    pub stage: String,
    pub required: bool,
    pub status: RepairStageStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<IterationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepairStageResult {
    fn skipped(stage: &RepairStage) -> Self {
        Self {
            stage: stage.name.to_string(),
            required: stage.required,
            status: RepairStageStatus::Skipped,
            attempts: Vec::new(),
            commit: None,
            error: None,
        }
    }
}

impl RepairStage {
    fn instruction(&self, job: &Job, notes: Option<&str>) -> String {
        let mut out = format!(
            "Repair stage `{}`.\n\n{}\n\nOverall request: {}",
            self.name,
            self.objective,
            job.prompt.trim()
        );
        if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            out.push_str("\n\nNotes from the repository owner:\n");
            out.push_str(notes);
        }
        out
    }

    /// Configured commands for `verify_with`, then the fixed checks.
    fn verify_commands(&self, env: &AttemptEnv<'_>) -> Vec<String> {
        self.verify_with
            .iter()
            .filter_map(|s| env.config.preflight.command_for(*s).map(str::to_string))
            .chain(self.checks.iter().map(|c| c.to_string()))
            .collect()
    }
}

/// Run `stages` in order, appending one result per stage to `results`.
///
/// On a required-stage failure or cancellation the remaining stages are
/// recorded as skipped before the error is returned.
pub async fn run_stages(
    env: AttemptEnv<'_>,
    job: &Job,
    notes: Option<&str>,
    stages: &[RepairStage],
    cancel: &CancellationToken,
    results: &mut Vec<RepairStageResult>,
) -> Result<(), JobError> {
    for (index, stage) in stages.iter().enumerate() {
        if cancel.is_cancelled() {
            results.extend(stages[index..].iter().map(RepairStageResult::skipped));
            return Err(JobError::Cancelled);
        }

        let result = run_stage(env, job, notes, stage).await?;
        env.events.emit(format!(
            "repair stage {}: {}",
            stage.name,
            result.status.as_str()
        ));

        let aborts = stage.required
            && !matches!(
                result.status,
                RepairStageStatus::Success | RepairStageStatus::NoChanges
            );
        let reason = result.error.clone();
        results.push(result);

        if aborts {
            results.extend(stages[index + 1..].iter().map(RepairStageResult::skipped));
            return Err(JobError::RepairStageFailed {
                stage: stage.name.to_string(),
                reason: reason.unwrap_or_else(|| "no attempt succeeded".into()),
            });
        }
    }
    Ok(())
}

async fn run_stage(
    env: AttemptEnv<'_>,
    job: &Job,
    notes: Option<&str>,
    stage: &RepairStage,
) -> Result<RepairStageResult, JobError> {
    env.events.emit(format!(
        "repair stage {} ({})",
        stage.name,
        if stage.required { "required" } else { "optional" }
    ));

    let instruction = stage.instruction(job, notes);
    let commands = stage.verify_commands(&env);
    let commit_message = format!("patchwright: repair {}\n\nJob: {}", stage.name, job.id);
    let context = attempt::gather_context(env.sandbox, &instruction, env.config).await?;

    let mut attempts: Vec<IterationRecord> = Vec::new();
    for n in 1..=MAX_STAGE_ATTEMPTS {
        let record = attempt::attempt(
            env,
            AttemptTask {
                iteration: n,
                instruction: &instruction,
                context: &context,
                history: &attempts,
                commit_message: &commit_message,
                verifier: Verifier::Commands(&commands, env.config.repair_verify_timeout()),
            },
        )
        .await?;

        let status = if matches!(record.validation, crate::diff::ValidationOutcome::NoChanges) {
            Some(RepairStageStatus::NoChanges)
        } else if record.commit.is_some() {
            Some(RepairStageStatus::Success)
        } else {
            None
        };
        let commit = record.commit.clone();
        attempts.push(record);

        if let Some(status) = status {
            return Ok(RepairStageResult {
                stage: stage.name.to_string(),
                required: stage.required,
                status,
                attempts,
                commit,
                error: None,
            });
        }
    }

    let error = attempts.last().and_then(IterationRecord::failure_reason);
    Ok(RepairStageResult {
        stage: stage.name.to_string(),
        required: stage.required,
        status: RepairStageStatus::Failed,
        attempts,
        commit: None,
        error,
    })
}
