//! CI-parity verification of a patched sandbox.
//!
//! Stages run in a fixed order. A stage without a configured command is
//! skipped; the first stage that fails or times out stops the pipeline.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::EventSink;
use crate::exec::{self, CommandOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightStage {
    Install,
    Typecheck,
    Lint,
    Test,
    Smoke,
}

impl PreflightStage {
    /// Execution order.
    pub const ALL: [PreflightStage; 5] = [
        PreflightStage::Install,
        PreflightStage::Typecheck,
        PreflightStage::Lint,
        PreflightStage::Test,
        PreflightStage::Smoke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreflightStage::Install => "install",
            PreflightStage::Typecheck => "typecheck",
            PreflightStage::Lint => "lint",
            PreflightStage::Test => "test",
            PreflightStage::Smoke => "smoke",
        }
    }
}

impl fmt::Display for PreflightStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PreflightStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PreflightStage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown preflight stage '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreflightStageConfig {
    pub stage: PreflightStage,
    /// `None` skips the stage.
    pub command: Option<String>,
}

/// Stage list plus the timeout every stage shares.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightPlan {
    pub stages: Vec<PreflightStageConfig>,
    pub timeout: Duration,
}

impl PreflightPlan {
    pub fn configured(&self) -> usize {
        self.stages.iter().filter(|s| s.command.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Skipped,
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: PreflightStage,
    pub status: StageStatus,
    pub duration_ms: u64,
}

/// Captured details of the stage that stopped the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: PreflightStage,
    pub summary: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreflightReport {
    /// Stages up to and including the first failure, in order.
    pub stages: Vec<StageResult>,
    pub failure: Option<StageFailure>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_stage(&self) -> Option<PreflightStage> {
        self.failure.as_ref().map(|f| f.stage)
    }

    /// Number of stages that actually ran a command.
    pub fn executed(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status != StageStatus::Skipped)
            .count()
    }

    /// Retry feedback for the generator.
    pub fn feedback(&self) -> Option<String> {
        self.failure.as_ref().map(|f| {
            format!(
                "Preflight stage `{}` failed: {}\n\nOutput:\n{}",
                f.stage, f.summary, f.output
            )
        })
    }
}

/// Run `plan` in `root`. Never errors: a command that cannot even be spawned
/// counts as a failed stage.
pub async fn run(root: &Path, plan: &PreflightPlan, events: &EventSink) -> PreflightReport {
    let mut report = PreflightReport::default();

    for config in &plan.stages {
        let Some(command) = config.command.as_deref() else {
            report.stages.push(StageResult {
                stage: config.stage,
                status: StageStatus::Skipped,
                duration_ms: 0,
            });
            continue;
        };

        events.emit(format!("preflight {}: {}", config.stage, command));
        let outcome = match exec::run_shell(command, root, plan.timeout).await {
            Ok(outcome) => outcome,
            Err(e) => CommandOutcome {
                command: command.to_string(),
                exit_code: None,
                timed_out: false,
                output: format!("{:#}", e),
                duration: Duration::ZERO,
            },
        };
        let duration_ms = outcome.duration.as_millis() as u64;

        if outcome.success() {
            report.stages.push(StageResult {
                stage: config.stage,
                status: StageStatus::Passed,
                duration_ms,
            });
            continue;
        }

        events.warn(format!(
            "preflight {} failed: {}",
            config.stage,
            outcome.failure_summary()
        ));
        report.stages.push(StageResult {
            stage: config.stage,
            status: StageStatus::Failed,
            duration_ms,
        });
        report.failure = Some(StageFailure {
            stage: config.stage,
            summary: outcome.failure_summary(),
            output: outcome.output,
        });
        break;
    }

    report
}
