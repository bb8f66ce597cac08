//! CLI command implementations.
//!
//! | Module   | Commands handled            |
//! |----------|-----------------------------|
//! | `run`    | `Run`, `Repair`, `Submit`   |
//! | `batch`  | `Batch`                     |
//! | `config` | `Config`                    |

pub mod batch;
pub mod config;
pub mod run;

pub use batch::cmd_batch;
pub use config::cmd_config;
pub use run::{RunMode, cmd_run, cmd_submit, job_from_target};
