//! Logging helpers for `Result` and `Option`.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with context and caller location; returns `self`.
    ///
    /// ```ignore
    /// use leadflow_engine::result_ext::ResultExt;
    ///
    /// store.unlock_run(run_id, &token).await.log("releasing run lock").ok();
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "leadflow_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

/// Extension trait for logging errors with context, returning Option.
pub trait OptionResultExt<T> {
    /// Log at warn level if this is `None`; returns `self`.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller_location = std::panic::Location::caller();
            tracing::warn!(
                target: "leadflow_engine",
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_ok() {
        let result: Result<i32, &str> = Ok(42);
        let logged = result.log("test context");
        assert_eq!(logged.unwrap(), 42);
    }

    #[test]
    fn test_result_ext_err_passes_through() {
        let result: Result<i32, String> = Err("lock lost".to_string());
        let logged = result.log("releasing run lock");
        assert_eq!(logged.unwrap_err(), "lock lost");
    }

    #[test]
    fn test_option_ext_some() {
        let opt: Option<i32> = Some(42);
        let logged = opt.log_none("test context");
        assert_eq!(logged.unwrap(), 42);
    }

    #[test]
    fn test_option_ext_none() {
        let opt: Option<&str> = None;
        let logged = opt.log_none("looking up entry step");
        assert!(logged.is_none());
    }
}
