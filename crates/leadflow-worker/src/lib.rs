//! Leadflow Worker
//!
//! The periodic batch job of a Leadflow deployment:
//! - drains queued trigger events through the trigger gateway
//! - sweeps due continuations (delay resumes and scheduled retries) and
//!   hands them back to the execution engine with bounded concurrency

pub mod config;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::{SweepReport, Worker};
