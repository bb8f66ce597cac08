//! One generate, validate, apply, verify pass against a sandbox.
//!
//! Shared by the change loop and the repair stages. Recoverable failures end
//! up on the returned [`IterationRecord`] with the sandbox rolled back to the
//! checkpoint it started from; only fatal failures are `Err`.

use std::time::Duration;

use anyhow::Context;

use super::feedback;
use super::state::IterationRecord;
use crate::config::Config;
use crate::context::RepoContext;
use crate::diff::{self, ValidationOutcome, apply};
use crate::errors::JobError;
use crate::events::EventSink;
use crate::exec;
use crate::generate::{GenerationRequest, Generator, generate_with_timeout};
use crate::preflight::{self, PreflightPlan};
use crate::sandbox::Sandbox;

/// How an applied diff is verified before its commit is kept.
#[derive(Debug, Clone, Copy)]
pub enum Verifier<'a> {
    /// The full preflight pipeline.
    Preflight(&'a PreflightPlan),
    /// A narrow list of shell commands, each bounded by the timeout.
    Commands(&'a [String], Duration),
}

/// Borrowed collaborators for one Job.
#[derive(Clone, Copy)]
pub struct AttemptEnv<'a> {
    pub sandbox: &'a Sandbox,
    pub config: &'a Config,
    pub generator: &'a dyn Generator,
    pub events: &'a EventSink,
}

/// What one pass is asked to do.
pub struct AttemptTask<'a> {
    pub iteration: u32,
    pub instruction: &'a str,
    pub context: &'a RepoContext,
    /// Earlier attempts at the same objective, folded into feedback.
    pub history: &'a [IterationRecord],
    pub commit_message: &'a str,
    pub verifier: Verifier<'a>,
}

pub async fn attempt(env: AttemptEnv<'_>, task: AttemptTask<'_>) -> Result<IterationRecord, JobError> {
    let AttemptEnv {
        sandbox,
        config,
        generator,
        events,
    } = env;
    let iteration = task.iteration;
    let checkpoint = sandbox.head_sha()?;

    let previous_error = feedback::fold(task.history);
    let request = GenerationRequest {
        instruction: task.instruction,
        context: task.context,
        previous_error: previous_error.as_deref(),
    };
    events.emit(format!(
        "iteration {}: generating with {}",
        iteration,
        generator.name()
    ));
    let candidate = generate_with_timeout(generator, &request, config.generation_timeout()).await?;

    let validation = diff::validate(&candidate, sandbox.root(), config.limits.max_diff_chars);
    let mut record = IterationRecord::new(iteration, candidate, validation.clone());

    match validation {
        ValidationOutcome::NoChanges => {
            events.emit(format!("iteration {}: generator reported no changes", iteration));
            return Ok(record);
        }
        ValidationOutcome::Rejected(rejection) => {
            events.warn(format!("iteration {}: {}", iteration, rejection));
        }
        ValidationOutcome::Applicable(validated) => {
            for note in &validated.notes {
                tracing::debug!(job_id = %events.job_id(), iteration, "{}", note);
            }
            events.emit(format!(
                "iteration {}: applying diff to {}",
                iteration,
                validated.files.join(", ")
            ));
            match apply::apply(sandbox.root(), &validated, task.commit_message).await {
                Err(e) => {
                    events.warn(format!("iteration {}: apply failed: {:#}", iteration, e));
                    record.apply_error = Some(format!("{:#}", e));
                }
                Ok(commit) => {
                    if verify(sandbox, task.verifier, events, &mut record).await {
                        events.emit(format!(
                            "iteration {}: verified, keeping {}",
                            iteration,
                            short_sha(&commit)
                        ));
                        record.commit = Some(commit);
                        return Ok(record);
                    }
                }
            }
        }
    }

    sandbox
        .rollback_to(&checkpoint)
        .with_context(|| format!("Failed to roll the sandbox back to {}", checkpoint))?;
    record.rolled_back = true;
    events.emit(format!(
        "iteration {}: rolled back to {}",
        iteration,
        short_sha(&checkpoint)
    ));
    Ok(record)
}

async fn verify(
    sandbox: &Sandbox,
    verifier: Verifier<'_>,
    events: &EventSink,
    record: &mut IterationRecord,
) -> bool {
    match verifier {
        Verifier::Preflight(plan) => {
            let report = preflight::run(sandbox.root(), plan, events).await;
            let passed = report.passed();
            record.preflight = Some(report);
            passed
        }
        Verifier::Commands(commands, timeout) => {
            for command in commands {
                events.emit(format!("verify: {}", command));
                let failure = match exec::run_shell(command, sandbox.root(), timeout).await {
                    Ok(outcome) if outcome.success() => continue,
                    Ok(outcome) => format!(
                        "Verification {}\n\nOutput:\n{}",
                        outcome.failure_summary(),
                        outcome.output
                    ),
                    Err(e) => format!("Verification `{}` could not run: {:#}", command, e),
                };
                events.warn(format!("verify failed: {}", command));
                record.verification_error = Some(failure);
                return false;
            }
            true
        }
    }
}

/// Snapshot the sandbox for the prompt. Blocking filesystem work runs off
/// the async workers.
pub async fn gather_context(sandbox: &Sandbox, prompt: &str, config: &Config) -> Result<RepoContext, JobError> {
    let root = sandbox.root().to_path_buf();
    let prompt = prompt.to_string();
    let budget = config.limits.max_context_chars;
    let context = tokio::task::spawn_blocking(move || RepoContext::build(&root, &prompt, budget))
        .await
        .context("Context gathering task panicked")??;
    Ok(context)
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
