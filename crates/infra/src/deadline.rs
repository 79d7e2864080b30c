//! Bounded deadline for storage calls.

use std::future::Future;
use std::time::Duration;

use keyward_core::{DomainError, DomainResult};

/// Per-call timeout applied to every storage operation a request performs.
///
/// An elapsed deadline surfaces as `Unavailable` so callers can tell a slow
/// backend apart from an internal fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// No deadline: calls run until the backend answers.
    pub fn unbounded() -> Self {
        Self { timeout: None }
    }

    /// `0` disables the deadline.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::unbounded()
        } else {
            Self::new(Duration::from_secs(secs))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        match self.timeout {
            None => fut.await,
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "storage deadline elapsed");
                    Err(DomainError::unavailable(format!(
                        "{operation} exceeded {}ms deadline",
                        limit.as_millis()
                    )))
                }
            },
        }
    }
}
