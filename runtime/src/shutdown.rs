//! Shutdown coordination for the engine's background tasks.
//!
//! The reconciler and the recovery prober run until told to stop. The
//! coordinator hands each a [`ShutdownListener`], keeps their join handles,
//! and on [`ShutdownCoordinator::shutdown`] signals all of them and waits,
//! bounded by a timeout.
//!
//! ```rust
//! use seatgate_runtime::shutdown::ShutdownCoordinator;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
//! let mut listener = coordinator.subscribe();
//! coordinator.register("worker", tokio::spawn(async move {
//!     listener.triggered().await;
//! }));
//!
//! assert!(coordinator.shutdown().await.is_ok());
//! # }
//! ```

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Whether shutdown has started.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown starts (immediately if it already has).
    ///
    /// A dropped coordinator counts as shutdown.
    pub async fn triggered(&mut self) {
        // Err means the sender is gone.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Owns background task handles and the shutdown signal.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    timeout_duration: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for each task to finish
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            tasks: Vec::new(),
            timeout_duration: timeout,
        }
    }

    /// Get a listener for the shutdown signal.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Track a background task.
    pub fn register(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        info!(task = %name, "Registered background task");
        self.tasks.push((name, handle));
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every listener and wait for all tracked tasks.
    ///
    /// # Errors
    ///
    /// Returns one message per task that panicked or did not stop in time.
    pub async fn shutdown(self) -> Result<(), Vec<String>> {
        info!(
            tasks = self.tasks.len(),
            timeout = ?self.timeout_duration,
            "Initiating shutdown"
        );

        if self.tx.send(true).is_err() {
            warn!("No active shutdown listeners");
        }

        let timeout_duration = self.timeout_duration;
        let waits = self.tasks.into_iter().map(|(name, handle)| async move {
            match tokio::time::timeout(timeout_duration, handle).await {
                Ok(Ok(())) => {
                    info!(task = %name, "Task stopped");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "Task failed");
                    Err(format!("{name}: {e}"))
                }
                Err(_) => {
                    error!(task = %name, "Task did not stop in time");
                    Err(format!("{name}: timeout after {timeout_duration:?}"))
                }
            }
        });

        let errors: Vec<String> = futures::future::join_all(waits)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listeners_observe_shutdown() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut listener = coordinator.subscribe();
        let observer = coordinator.subscribe();
        assert!(!observer.is_triggered());

        coordinator.register(
            "waiter",
            tokio::spawn(async move {
                listener.triggered().await;
            }),
        );
        assert_eq!(coordinator.task_count(), 1);

        assert!(coordinator.shutdown().await.is_ok());
        assert!(observer.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_reported() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        coordinator.register(
            "stuck",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );

        let errors = coordinator.shutdown().await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("stuck: timeout"));
    }
}
