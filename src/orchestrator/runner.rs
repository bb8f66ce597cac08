use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::attempt::{self, AttemptEnv, AttemptTask, Verifier};
use super::failed_patch;
use super::state::{IterationRecord, JobMode, JobOutcome, JobPhase, JobReport, JobStatus};
use crate::config::Config;
use crate::context::RepoContext;
use crate::diff::ValidationOutcome;
use crate::errors::JobError;
use crate::events::{EventSink, ProgressEvent};
use crate::generate::DynGenerator;
use crate::job::Job;
use crate::publish::{self, Publication};
use crate::repair::{self, REPAIR_STAGES, RepairStageResult};
use crate::sandbox::Sandbox;
use crate::util::summary_line;

/// Drives Jobs from submission to a terminal [`JobReport`].
///
/// One runner can serve many Jobs, sequentially or concurrently; each Job
/// gets its own sandbox, released on every exit path.
#[derive(Clone)]
pub struct JobRunner {
    config: Arc<Config>,
    generator: DynGenerator,
    cancel: CancellationToken,
    publish: bool,
    events: Option<broadcast::Sender<ProgressEvent>>,
}

#[derive(Debug, Clone, Copy)]
enum Plan<'a> {
    Change,
    Repair { notes: Option<&'a str> },
}

/// Everything a Job recorded on the way, kept even when it fails.
#[derive(Default)]
struct Trail {
    iterations: Vec<IterationRecord>,
    repair_stages: Vec<RepairStageResult>,
}

impl Trail {
    /// The most recent candidate that did not make it.
    fn last_failed_candidate(&self) -> Option<&str> {
        self.iterations
            .iter()
            .chain(self.repair_stages.iter().flat_map(|s| s.attempts.iter()))
            .filter(|r| r.failure_reason().is_some() && !r.candidate.trim().is_empty())
            .last()
            .map(|r| r.candidate.as_str())
    }
}

impl JobRunner {
    pub fn new(config: Arc<Config>, generator: DynGenerator) -> Self {
        Self {
            config,
            generator,
            cancel: CancellationToken::new(),
            publish: true,
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `false` keeps verified changes in the sandbox only (dry run).
    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a free-form change request.
    pub async fn run(&self, job: &Job) -> JobReport {
        self.execute(job, Plan::Change).await
    }

    /// Run the fixed repair pipeline.
    pub async fn run_repair(&self, job: &Job, notes: Option<&str>) -> JobReport {
        self.execute(job, Plan::Repair { notes }).await
    }

    async fn execute(&self, job: &Job, plan: Plan<'_>) -> JobReport {
        let started_at = Utc::now();
        let events = EventSink::new(job.id.clone(), self.events.clone());
        let mut trail = Trail::default();
        let mut publication = None;

        events.emit(format!("state: {}", JobPhase::Initializing));
        events.emit(format!("preparing sandbox for {}", job.describe_target()));

        let result = match Sandbox::acquire(job, &self.config).await {
            Err(e) => Err(JobError::from(e)),
            Ok(sandbox) => {
                let mut result = self.drive(job, plan, &sandbox, &events, &mut trail).await;

                events.emit(format!("state: {}", JobPhase::Finalizing));
                if matches!(result, Ok(JobOutcome::Changed { .. })) {
                    if self.publish {
                        match publish::publish(job, &sandbox, &self.config, &events).await {
                            Ok(p) => publication = Some(p),
                            Err(e) => result = Err(e),
                        }
                    } else {
                        publication = Some(Publication::Skipped);
                    }
                }

                if let Err(e) = sandbox.release() {
                    events.warn(format!("failed to remove sandbox: {}", e));
                }
                result
            }
        };

        let finished_at = Utc::now();
        let (status, outcome, error, failed_patch) = match result {
            Ok(outcome) => (JobStatus::Succeeded, Some(outcome), None, None),
            Err(err) => {
                let reason = err.to_string();
                events.warn(format!("job failed: {}", reason));
                let failed_patch = trail.last_failed_candidate().and_then(|candidate| {
                    match failed_patch::persist(
                        &self.config.sandbox.failed_patch_dir,
                        &job.id,
                        &reason,
                        candidate,
                        finished_at,
                    ) {
                        Ok(path) => {
                            events.emit(format!("failed patch saved to {}", path.display()));
                            Some(path)
                        }
                        Err(e) => {
                            events.warn(format!("could not save failed patch: {:#}", e));
                            None
                        }
                    }
                });
                (JobStatus::Failed, None, Some(reason), failed_patch)
            }
        };

        let report = JobReport {
            job_id: job.id.clone(),
            mode: match plan {
                Plan::Change => JobMode::Change,
                Plan::Repair { .. } => JobMode::Repair,
            },
            status,
            outcome,
            error,
            iterations: trail.iterations,
            repair_stages: trail.repair_stages,
            publication,
            failed_patch,
            started_at,
            finished_at,
        };
        events.emit(report.summary());
        report
    }

    async fn drive(
        &self,
        job: &Job,
        plan: Plan<'_>,
        sandbox: &Sandbox,
        events: &EventSink,
        trail: &mut Trail,
    ) -> Result<JobOutcome, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let env = AttemptEnv {
            sandbox,
            config: &self.config,
            generator: self.generator.as_ref(),
            events,
        };

        match plan {
            Plan::Change => {
                events.emit(format!("state: {}", JobPhase::GatheringContext));
                let context = attempt::gather_context(sandbox, &job.prompt, &self.config).await?;
                events.emit(format!(
                    "context: {} of {} file(s), {} chars",
                    context.files.len(),
                    context.index.len(),
                    context.total_chars()
                ));

                events.emit(format!("state: {}", JobPhase::Iterating));
                self.iterate(env, job, &context, &mut trail.iterations)
                    .await?;
            }
            Plan::Repair { notes } => {
                events.emit(format!("state: {}", JobPhase::Iterating));
                repair::run_stages(
                    env,
                    job,
                    notes,
                    REPAIR_STAGES,
                    &self.cancel,
                    &mut trail.repair_stages,
                )
                .await?;
            }
        }

        let changes = sandbox.changes()?;
        if changes.is_empty() {
            return Ok(JobOutcome::NoChanges);
        }
        Ok(JobOutcome::Changed {
            branch: sandbox.branch().to_string(),
            commit: sandbox.head_sha()?,
            files: changes.total_files(),
        })
    }

    /// The bounded retry loop. Returns once an iteration kept a commit or
    /// reported no changes.
    async fn iterate(
        &self,
        env: AttemptEnv<'_>,
        job: &Job,
        context: &RepoContext,
        history: &mut Vec<IterationRecord>,
    ) -> Result<(), JobError> {
        let plan = self.config.preflight_plan();
        let max_iterations = self.config.limits.max_iterations;
        let title = summary_line(&job.prompt, 72);

        for iteration in 1..=max_iterations {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let commit_message = format!(
                "patchwright: {}\n\nJob: {}\nIteration: {}",
                title, job.id, iteration
            );
            let record = attempt::attempt(
                env,
                AttemptTask {
                    iteration,
                    instruction: &job.prompt,
                    context,
                    history: history.as_slice(),
                    commit_message: &commit_message,
                    verifier: Verifier::Preflight(&plan),
                },
            )
            .await?;

            let done = record.commit.is_some()
                || matches!(record.validation, ValidationOutcome::NoChanges);
            history.push(record);
            if done {
                return Ok(());
            }
        }

        let last_reason = history
            .last()
            .and_then(IterationRecord::failure_reason)
            .unwrap_or_else(|| "no iterations were allowed".to_string());
        Err(JobError::Exhausted {
            iterations: max_iterations,
            last_reason,
        })
    }
}
