//! Background task supervision
//!
//! Periodic jobs (reconciliation, cache warming) run in their own tokio tasks.
//! A failed or panicking run is logged, recorded in the registry and retried
//! after an exponential backoff; it never reaches request handling.

pub mod backoff;
pub mod registry;

pub use backoff::{BackoffConfig, BackoffState};
pub use registry::{TaskRegistry, TaskReport, TaskStatus};

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Supervisor {
    registry: Arc<RwLock<TaskRegistry>>,
    backoff_config: BackoffConfig,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(backoff_config: BackoffConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(RwLock::new(TaskRegistry::new())),
            backoff_config,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `interval` until shutdown. Interval changes published
    /// on the watch channel take effect for the next wait.
    pub async fn spawn_periodic<F, Fut>(&self, name: &str, mut interval: watch::Receiver<Duration>, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry
            .write()
            .await
            .register(name, self.backoff_config.clone());

        let name = name.to_string();
        let registry = Arc::clone(&self.registry);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            info!(task = %name, every = ?*interval.borrow(), "Supervised task started");
            let mut delay = *interval.borrow();
            let mut interval_open = true;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    changed = interval.changed(), if interval_open => {
                        match changed {
                            Ok(()) => {
                                delay = *interval.borrow();
                                info!(task = %name, every = ?delay, "Task interval changed");
                            }
                            Err(_) => interval_open = false,
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                registry.write().await.record_start(&name);
                let outcome = match tokio::spawn(job()).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(join_error) => Err(format!("task panicked: {}", join_error)),
                };

                let schedule = *interval.borrow();
                match outcome {
                    Ok(()) => {
                        registry.write().await.record_success(&name);
                        debug!(task = %name, "Supervised run succeeded");
                        delay = schedule;
                    }
                    Err(message) => {
                        error!(task = %name, error = %message, "Supervised run failed");
                        let backoff = registry.write().await.record_failure(&name, &message);
                        delay = backoff.map_or(schedule, |b| b.min(schedule));
                        warn!(task = %name, retry_in = ?delay, "Backing off");
                    }
                }
            }

            registry.write().await.mark_stopped(&name);
            info!(task = %name, "Supervised task stopped");
        });

        self.handles.lock().await.push(handle);
    }

    pub async fn status(&self) -> Vec<TaskReport> {
        self.registry.read().await.reports()
    }

    pub async fn task_status(&self, name: &str) -> Option<TaskStatus> {
        self.registry.read().await.status(name)
    }

    /// Signal every task and wait for them to exit
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Supervised task ended abnormally");
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProgressionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_periodic_runs_until_shutdown() {
        let supervisor = Supervisor::new(fast_backoff());
        let (_tx, rx) = watch::channel(Duration::from_millis(10));
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();

        supervisor
            .spawn_periodic("tick", rx, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        supervisor.shutdown().await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(supervisor.task_status("tick").await, Some(TaskStatus::Stopped));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_propagated() {
        let supervisor = Supervisor::new(fast_backoff());
        let (_tx, rx) = watch::channel(Duration::from_millis(10));

        supervisor
            .spawn_periodic("broken", rx, || async {
                Err::<(), _>(ProgressionError::store("database unreachable"))
            })
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let report = supervisor.status().await.remove(0);
        assert_ne!(report.status, TaskStatus::Healthy);
        assert!(report.failures >= 1);
        assert_eq!(report.last_error.as_deref(), Some("Store error: database unreachable"));
        supervisor.shutdown().await;
    }

    async fn explode() -> Result<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panics_are_contained() {
        let supervisor = Supervisor::new(fast_backoff());
        let (_tx, rx) = watch::channel(Duration::from_millis(10));

        supervisor.spawn_periodic("panicky", rx, explode).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = supervisor.status().await.remove(0);
        assert!(report.failures >= 1);
        assert!(report.last_error.unwrap().contains("panicked"));
        supervisor.shutdown().await;
    }
}
