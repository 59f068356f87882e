//! Database models for the Leadflow engine.
//!
//! This module contains SQLx-compatible model definitions
//! for all database tables.

pub mod continuation;
pub mod metric;
pub mod run;
pub mod trigger;
pub mod workflow;

pub use continuation::*;
pub use metric::*;
pub use run::*;
pub use trigger::*;
pub use workflow::*;
