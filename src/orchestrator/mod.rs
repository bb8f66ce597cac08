//! The Job state machine.
//!
//! `Initializing -> GatheringContext -> Iterating -> Finalizing`, with each
//! iteration running generate, validate, apply and preflight before the
//! commit is kept or rolled back.

pub mod attempt;
pub mod failed_patch;
pub mod feedback;
pub mod pool;
pub mod runner;
pub mod state;

pub use pool::run_batch;
pub use runner::JobRunner;
pub use state::{IterationRecord, JobMode, JobOutcome, JobPhase, JobReport, JobStatus};
