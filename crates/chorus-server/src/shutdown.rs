//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates graceful shutdown across the listener and its sessions.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait up to `grace` for every task in `tasks` to finish, then abort the
/// rest. Returns the number of tasks that had to be aborted.
///
/// The caller is expected to have cancelled the shared token already.
pub async fn drain(tasks: &mut JoinSet<()>, grace: Duration) -> usize {
    let in_flight = tasks.len();
    if in_flight == 0 {
        return 0;
    }
    info!(
        task_count = in_flight,
        grace_secs = grace.as_secs(),
        "waiting for sessions to finish"
    );

    let finish = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(grace, finish).await.is_ok() {
        return 0;
    }

    let remaining = tasks.len();
    warn!(remaining, "shutdown grace period expired, aborting sessions");
    tasks.shutdown().await;
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn multiple_shutdown_calls_idempotent() {
        let coord = ShutdownCoordinator::default();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn multiple_tokens_all_cancelled() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token().child_token();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn drain_empty_set() {
        let mut tasks = JoinSet::new();
        assert_eq!(drain(&mut tasks, Duration::from_secs(1)).await, 0);
    }

    #[tokio::test]
    async fn drain_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let mut tasks = JoinSet::new();
        for _ in 0..3 {
            let token = coord.token();
            let _ = tasks.spawn(async move { token.cancelled().await });
        }
        coord.shutdown();
        assert_eq!(drain(&mut tasks, Duration::from_secs(5)).await, 0);
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_after_grace() {
        let mut tasks = JoinSet::new();
        let _ = tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let _ = tasks.spawn(async {});

        let aborted = drain(&mut tasks, Duration::from_millis(100)).await;
        assert_eq!(aborted, 1);
        assert!(tasks.is_empty());
    }
}
