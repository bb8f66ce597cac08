pub mod config;
pub mod context;
pub mod diff;
pub mod errors;
pub mod events;
pub mod exec;
pub mod generate;
pub mod job;
pub mod orchestrator;
pub mod preflight;
pub mod publish;
pub mod repair;
pub mod sandbox;
pub mod util;
