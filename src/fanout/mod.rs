//! Run one operation on every node concurrently
//!
//! Each node gets its own tokio task. Failures travel over an `mpsc` channel
//! sized to the node count, so no task ever blocks on send. This function owns
//! the receiver; the channel closes once the last task drops its sender, after
//! every task has been joined.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fan-out settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    stagger: Duration,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between task launches, e.g. to keep joining servers from
    /// hitting etcd all at once
    pub fn stagger(mut self, delay: Duration) -> Self {
        self.stagger = delay;
        self
    }

    /// Apply `op` to each node and wait for all of them.
    ///
    /// Returns the first error in arrival order. A panicking task is reported
    /// as [`Error::TaskFailed`] when no operation returned an error.
    pub async fn run<N, F, Fut>(&self, nodes: &[N], op: F) -> Result<()>
    where
        N: Clone + Send + 'static,
        F: Fn(N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if nodes.is_empty() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Error>(nodes.len());
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();

        for (index, node) in nodes.iter().cloned().enumerate() {
            if index > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }

            let tx = tx.clone();
            let op = Arc::clone(&op);
            tasks.spawn(async move {
                if let Err(e) = op(node).await {
                    debug!(index, error = %e, "Node operation failed");
                    // capacity equals the task count, this never waits
                    let _ = tx.send(e).await;
                }
            });
        }
        drop(tx);

        let mut join_error = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Fan-out task did not complete");
                join_error.get_or_insert_with(|| Error::TaskFailed(e.to_string()));
            }
        }

        let first = rx.recv().await;
        let mut dropped = 0usize;
        while rx.recv().await.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Additional node operations failed");
        }

        match (first, join_error) {
            (Some(e), _) => Err(e),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(()),
        }
    }
}

/// [`FanOut::run`] without stagger
pub async fn for_each_node<N, F, Fut>(nodes: &[N], op: F) -> Result<()>
where
    N: Clone + Send + 'static,
    F: Fn(N) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FanOut::new().run(nodes, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_empty_node_list_never_invokes_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let nodes: Vec<String> = Vec::new();

        for_each_node(&nodes, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let nodes = vec![1u32, 2];
        let err = for_each_node(&nodes, |n| async move {
            if n == 2 {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TaskFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stagger_delays_launches() {
        let start = tokio::time::Instant::now();
        let nodes = vec!["a", "b", "c"];

        FanOut::new()
            .stagger(Duration::from_secs(20))
            .run(&nodes, |_| async { Ok(()) })
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(40));
    }
}
