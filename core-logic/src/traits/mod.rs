use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A long-running unit of work supervised by [`crate::WorkerRunner`].
///
/// Implementors must treat every suspension point as a cancellation
/// checkpoint and return promptly once `token` is cancelled.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Label used for the tracing span and shutdown summary.
    fn label(&self) -> String;

    /// Runs until the work is finished or the token is cancelled.
    async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()>;
}
