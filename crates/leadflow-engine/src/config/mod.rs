//! Configuration loaded from environment variables with `envy`.

mod app;

pub use app::{AppConfig, DatabaseConfig};
