//! Supervision for background maintenance work.
//!
//! Queries hand off ghost-row deletion here instead of waiting for it. The
//! tasks run on the runtime, their failures are logged when reaped, and
//! [`CleanupTasks::shutdown`] waits for whatever is still running.

use std::future::Future;

use tokio::{sync::Mutex, task::JoinSet};

use crate::error::Result;

#[derive(Debug, Default)]
pub struct CleanupTasks {
    tasks: Mutex<JoinSet<Result<usize>>>,
}

impl CleanupTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background. Finished tasks are reaped first so the
    /// set does not grow without bound.
    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<usize>> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            log_outcome(joined);
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every outstanding task and return how many rows they
    /// removed in total.
    pub async fn drain(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut removed = 0;
        while let Some(joined) = tasks.join_next().await {
            removed += log_outcome(joined);
        }
        removed
    }

    /// Drain outstanding tasks; called once when the service stops.
    pub async fn shutdown(&self) {
        let removed = self.drain().await;
        tracing::debug!(removed, "background cleanup drained");
    }
}

fn log_outcome(
    joined: std::result::Result<Result<usize>, tokio::task::JoinError>,
) -> usize {
    match joined {
        Ok(Ok(removed)) => removed,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "background cleanup failed");
            0
        }
        Err(e) => {
            tracing::warn!(error = %e, "background cleanup task panicked");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn drain_waits_for_all_tasks() {
        let cleanup = CleanupTasks::new();
        for n in 1..=3 {
            cleanup
                .spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5))
                        .await;
                    Ok(n)
                })
                .await;
        }

        assert_eq!(cleanup.drain().await, 6);
        assert_eq!(cleanup.pending().await, 0);
    }

    #[tokio::test]
    async fn failures_are_absorbed() {
        let cleanup = CleanupTasks::new();
        cleanup.spawn(async { Err(Error::IndexNotReady) }).await;
        cleanup.spawn(async { Ok(2) }).await;

        assert_eq!(cleanup.drain().await, 2);
    }
}
