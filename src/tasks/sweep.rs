//! Expiry Sweep Task
//!
//! Background task that periodically removes expired local cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::LocalBackend;

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task only holds a weak reference to the backend and stops on its own
/// once the backend is dropped. Each pass locks one shard at a time, so
/// readers of unrelated keys are not stalled.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let local = Arc::new(LocalBackend::new(1000));
/// let sweep_handle = spawn_sweep_task(&local, Duration::from_secs(60));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(backend: &Arc<LocalBackend>, interval: Duration) -> JoinHandle<()> {
    let backend = Arc::downgrade(backend);
    let interval = interval.max(Duration::from_millis(10));

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting cache expiry sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let Some(backend) = backend.upgrade() else {
                debug!("Local backend dropped, stopping sweep task");
                break;
            };

            let removed = backend.cleanup_expired();

            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let backend = Arc::new(LocalBackend::new(100));
        backend.set_entry("expire_soon", "1".to_string(), 1).unwrap();

        let handle = spawn_sweep_task(&backend, Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Removed by the sweep, not by a lazy get
        assert!(!backend.contains_raw("expire_soon"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_preserves_valid_entries() {
        let backend = Arc::new(LocalBackend::new(100));
        backend.set_entry("long_lived", "1".to_string(), 3600).unwrap();

        let handle = spawn_sweep_task(&backend, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(backend.get_entry("long_lived").as_deref(), Some("1"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_stops_when_backend_dropped() {
        let backend = Arc::new(LocalBackend::new(100));
        let handle = spawn_sweep_task(&backend, Duration::from_millis(50));

        drop(backend);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.is_finished(), "Task should exit once the backend is gone");
    }

    #[tokio::test]
    async fn test_sweep_can_be_aborted() {
        let backend = Arc::new(LocalBackend::new(100));
        let handle = spawn_sweep_task(&backend, Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
