//! Database queries for the Leadflow engine.
//!
//! This module contains database query functions organized by domain.
//! All tables live in the `leadflow` schema created by the migrations.

pub mod continuation;
pub mod metric;
pub mod run;
pub mod trigger;
pub mod workflow;
