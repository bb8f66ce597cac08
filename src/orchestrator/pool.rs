//! Run many Jobs on a bounded set of workers.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::runner::JobRunner;
use super::state::{JobMode, JobReport};
use crate::job::Job;

/// Run `jobs` with at most `limits.max_concurrent_jobs` in flight (a limit
/// of 0 counts as 1). Reports come back in submission order.
pub async fn run_batch(runner: &JobRunner, jobs: Vec<Job>, mode: JobMode) -> Vec<JobReport> {
    let workers = runner.config().limits.max_concurrent_jobs.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    tracing::info!(jobs = jobs.len(), workers, "starting batch");

    let mut handles: Vec<(String, JoinHandle<JobReport>)> = Vec::with_capacity(jobs.len());
    for job in jobs {
        let semaphore = semaphore.clone();
        let runner = runner.clone();
        let id = job.id.clone();
        let handle = tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = semaphore.acquire_owned().await.ok();
            match mode {
                JobMode::Change => runner.run(&job).await,
                JobMode::Repair => runner.run_repair(&job, None).await,
            }
        });
        handles.push((id, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(job_id = %id, "job task aborted: {}", e);
                JobReport::aborted(id, mode, format!("Job task aborted: {}", e))
            }
        };
        reports.push(report);
    }
    reports
}
