//! `patchwright batch`: many submissions on the worker pool.

use std::path::Path;

use anyhow::Result;
use console::style;

use patchwright::config::Config;
use patchwright::job::Job;
use patchwright::orchestrator::{JobMode, run_batch};

use super::super::RunFlags;
use super::run::{build_runner, print_report};

pub async fn cmd_batch(config: Config, file: &Path, repair: bool, flags: &RunFlags) -> Result<bool> {
    let jobs = Job::load_many(file)?;
    let total = jobs.len();
    let runner = build_runner(config, flags)?;
    let mode = if repair { JobMode::Repair } else { JobMode::Change };

    let reports = run_batch(&runner, jobs, mode).await;

    if flags.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report, false)?;
        }
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if !flags.json {
        let line = format!("{} of {} job(s) succeeded", total - failed, total);
        if failed == 0 {
            println!("{}", style(line).bold().green());
        } else {
            println!("{}", style(line).bold().red());
        }
    }
    Ok(failed == 0)
}
