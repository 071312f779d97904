use crate::traits::Worker;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument, Span};

/// Spawns a task that cancels `token` on Ctrl+C.
pub fn listen_for_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Received Ctrl+C. Initiating graceful shutdown...");
                token.cancel();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    })
}

/// Owns the tasks of every spawned [`Worker`], one task per worker.
pub struct WorkerRunner {
    set: JoinSet<(String, Result<()>)>,
    started: Instant,
}

impl Default for WorkerRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRunner {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
            started: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Spawns `worker` inside `span`; it runs until done or `token` fires.
    pub fn spawn(&mut self, worker: Arc<dyn Worker>, token: CancellationToken, span: Span) {
        let label = worker.label();
        self.set.spawn(
            async move {
                let result = worker.run(token).await;
                if let Err(e) = &result {
                    error!("Worker {} failed: {:?}", label, e);
                }
                (label, result)
            }
            .instrument(span),
        );
    }

    /// Reaps workers that already finished without waiting on the rest.
    pub fn reap_finished(&mut self) {
        while let Some(res) = self.set.try_join_next() {
            if let Err(e) = res {
                error!("A worker task panicked or failed to join: {:?}", e);
            }
        }
    }

    /// Waits for every spawned worker and logs a summary.
    pub async fn join_all(&mut self) {
        let mut finished = 0;
        let mut failed = 0;

        while let Some(res) = self.set.join_next().await {
            match res {
                Ok((_, Ok(()))) => finished += 1,
                Ok((_, Err(_))) => {
                    // Already logged in task
                    failed += 1;
                }
                Err(e) => {
                    error!("A worker task panicked or failed to join: {:?}", e);
                    failed += 1;
                }
            }
        }

        info!(
            "Workers stopped after {:.1}s | Clean: {} | Failed: {}",
            self.started.elapsed().as_secs_f64(),
            finished,
            failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sleeper {
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for Sleeper {
        fn label(&self) -> String {
            "sleeper".to_string()
        }

        async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
            token.cancelled().await;
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_all_workers() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let mut runner = WorkerRunner::new();

        for _ in 0..3 {
            let worker = Arc::new(Sleeper {
                stopped: Arc::clone(&stopped),
            });
            runner.spawn(worker, token.child_token(), Span::none());
        }
        assert_eq!(runner.len(), 3);

        token.cancel();
        runner.join_all().await;

        assert_eq!(stopped.load(Ordering::SeqCst), 3);
        assert!(runner.is_empty());
    }
}
