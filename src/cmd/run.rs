//! Single-Job commands: `patchwright run`, `repair` and `submit`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use patchwright::config::Config;
use patchwright::generate::build_generator;
use patchwright::job::{Job, ProjectTarget};
use patchwright::orchestrator::{IterationRecord, JobReport, JobRunner, JobStatus};
use patchwright::util::summary_line;

use super::super::{RunFlags, TargetArgs};

pub enum RunMode {
    Change,
    Repair { notes: Option<String> },
}

pub fn job_from_target(prompt: &str, target: &TargetArgs) -> Result<Job> {
    let project = ProjectTarget {
        local_path: target.local_path.clone(),
        repository_url: target.repo_url.clone(),
        github_repo: target.github_repo.clone(),
        base_branch: target.base_branch.clone(),
    };
    Job::new(target.id.clone(), prompt, project)
}

/// Build a runner whose cancellation token fires on Ctrl-C.
pub fn build_runner(config: Config, flags: &RunFlags) -> Result<JobRunner> {
    let config = match flags.max_iterations {
        Some(n) => config.with_max_iterations(n),
        None => config,
    };
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let generator = build_generator(&config.generator)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping at the next iteration boundary");
            on_interrupt.cancel();
        }
    });

    Ok(JobRunner::new(Arc::new(config), generator)
        .with_cancel(cancel)
        .with_publish(!flags.no_publish))
}

pub async fn cmd_run(config: Config, job: Job, flags: &RunFlags, mode: RunMode) -> Result<bool> {
    let runner = build_runner(config, flags)?;
    let report = match &mode {
        RunMode::Change => runner.run(&job).await,
        RunMode::Repair { notes } => runner.run_repair(&job, notes.as_deref()).await,
    };
    print_report(&report, flags.json)?;
    Ok(report.succeeded())
}

pub async fn cmd_submit(config: Config, file: &Path, flags: &RunFlags) -> Result<bool> {
    let json = if file == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read job submission from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let job = Job::from_json(&json)?;
    cmd_run(config, job, flags, RunMode::Change).await
}

pub fn print_report(report: &JobReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for record in &report.iterations {
        println!("  iteration {}: {}", record.iteration, describe(record));
    }
    for stage in &report.repair_stages {
        match &stage.error {
            Some(error) => println!(
                "  stage {}: {} ({})",
                stage.stage,
                stage.status.as_str(),
                summary_line(error, 100)
            ),
            None => println!("  stage {}: {}", stage.stage, stage.status.as_str()),
        }
    }
    if let Some(path) = &report.failed_patch {
        println!("  failed patch: {}", path.display());
    }

    let summary = report.summary();
    match report.status {
        JobStatus::Succeeded => println!("{}", style(summary).green()),
        JobStatus::Failed => println!("{}", style(summary).red()),
    }
    Ok(())
}

fn describe(record: &IterationRecord) -> String {
    if let Some(commit) = &record.commit {
        return format!("verified, kept {}", commit.get(..8).unwrap_or(commit));
    }
    match record.failure_reason() {
        Some(reason) => summary_line(&reason, 120),
        None => "no changes needed".to_string(),
    }
}
