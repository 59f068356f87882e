//! Database module for the Leadflow engine.
//!
//! This module provides database connectivity, models, migrations and
//! queries for PostgreSQL using SQLx.

pub mod models;
pub mod pool;
pub mod queries;

pub use pool::{create_pool, health_check, migrate, DbPool};
