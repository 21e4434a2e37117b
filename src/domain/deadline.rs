//! Deadline helper
//!
//! Oracle queries and backend calls never block unbounded; each one runs
//! under a caller-supplied limit and surfaces [`Error::Timeout`] when the
//! limit passes.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Run `fut`, failing with [`Error::Timeout`] once `after` has elapsed
pub async fn with_deadline<T, F>(
    operation: impl std::fmt::Display,
    after: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
