//! Lightweight cancellation/deadline context (§5 implementation note),
//! grounded on the teacher's consistent use of `tokio::time::timeout` around
//! socket sends/receives (`server::protocol_io::send_and_flush_timeout`):
//! rather than depending on `tokio_util`'s `CancellationToken`, an operation
//! is raced against an optional deadline with `tokio::time::timeout_at`.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::Error;

/// Either "no deadline" or a point in time after which pending operations
/// are cancelled.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    pub fn none() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline) }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` to completion, or returns `Error::Cancelled` if the
    /// deadline elapses first.
    pub(crate) async fn race<T>(&self, fut: impl Future<Output = T>) -> Result<T, Error> {
        match self.deadline {
            None => Ok(fut.await),
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| Error::Cancelled),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_deadline_never_cancels() {
        let ctx = Context::none();
        let value = ctx.race(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn elapsed_deadline_cancels() {
        let ctx = Context::with_timeout(Duration::from_millis(1));
        let result = ctx
            .race(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                42
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
