//! Reconciliation scheduler
//!
//! Tasks run on a bounded worker pool. Each task has a mutual-exclusion key;
//! while a task for a key is queued or running, new submissions for the same
//! key are dropped, since the in-flight run observes the latest desired
//! state anyway.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::reconciler::NetworkReconciler;
use crate::resources::ResourceRef;
use crate::settings::NetworkSettings;
use crate::NetworkError;

/// Log target for failures operators must look at
pub const OPS_LOG_TARGET: &str = "temps_networks::ops";

/// How long a finished task's state stays queryable
pub const TERMINAL_STATE_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileTask {
    /// Attach one resource to its networks
    Resource(ResourceRef),
    /// Sync the resource's server and reconcile everything on it
    Full(ResourceRef),
    /// Drift check and reverse sync of one server
    Server(i32),
    /// Forget a deleted resource's attachments
    Cleanup(ResourceRef),
}

impl ReconcileTask {
    pub fn key(&self) -> String {
        match self {
            ReconcileTask::Resource(r) => format!("reconcile:{}:{}", r.kind, r.id),
            ReconcileTask::Full(r) => format!("reconcile-full:{}:{}", r.kind, r.id),
            ReconcileTask::Server(server_id) => format!("reconcile-server:{}", server_id),
            ReconcileTask::Cleanup(r) => format!("cleanup:{}:{}", r.kind, r.id),
        }
    }
}

impl fmt::Display for ReconcileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running { attempt: u32 },
    Retrying { attempt: u32, error: String },
    Succeeded { attempts: u32 },
    Dead { attempts: u32, error: String },
}

impl TaskState {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskState::Queued | TaskState::Running { .. } | TaskState::Retrying { .. }
        )
    }
}

/// Executes a task once. Retries are the scheduler's job.
#[async_trait]
pub trait ReconcileRunner: Send + Sync {
    async fn run(&self, task: &ReconcileTask) -> Result<(), NetworkError>;
}

#[async_trait]
impl ReconcileRunner for NetworkReconciler {
    async fn run(&self, task: &ReconcileTask) -> Result<(), NetworkError> {
        match task {
            ReconcileTask::Resource(resource) => {
                self.reconcile_resource(resource).await?;
            }
            ReconcileTask::Full(resource) => {
                let report = self.reconcile_full(resource).await?;
                if !report.failed_resources.is_empty() {
                    warn!(
                        failed = ?report.failed_resources,
                        "Some resources could not be reconciled"
                    );
                }
            }
            ReconcileTask::Server(server_id) => {
                let server = self.catalog().find_server(*server_id).await?;
                self.sync_server(&server).await?;
            }
            ReconcileTask::Cleanup(resource) => {
                self.detach_deleted_resource(resource).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum Submission {
    Scheduled(TaskHandle),
    /// A task with the same key is already queued or running
    Dropped,
}

impl Submission {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Submission::Scheduled(_))
    }

    pub fn into_handle(self) -> Option<TaskHandle> {
        match self {
            Submission::Scheduled(handle) => Some(handle),
            Submission::Dropped => None,
        }
    }
}

#[derive(Debug)]
pub struct TaskHandle {
    key: String,
    join: JoinHandle<TaskState>,
}

impl TaskHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the task to finish and return its terminal state
    pub async fn wait(self) -> TaskState {
        match self.join.await {
            Ok(state) => state,
            Err(e) => TaskState::Dead {
                attempts: 0,
                error: e.to_string(),
            },
        }
    }
}

struct TaskEntry {
    state: TaskState,
    /// Set once the state is terminal
    finished_at: Option<Instant>,
}

#[derive(Clone)]
pub struct ReconcileScheduler {
    runner: Arc<dyn ReconcileRunner>,
    permits: Arc<Semaphore>,
    states: Arc<Mutex<HashMap<String, TaskEntry>>>,
    max_attempts: u32,
    base_delay: Duration,
    retention: Duration,
}

impl ReconcileScheduler {
    pub fn new(runner: Arc<dyn ReconcileRunner>, settings: &NetworkSettings) -> Self {
        Self::with_limits(
            runner,
            settings.worker_concurrency,
            settings.max_attempts,
            Duration::from_millis(settings.retry_base_delay_ms),
        )
    }

    pub fn with_limits(
        runner: Arc<dyn ReconcileRunner>,
        concurrency: usize,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            runner,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            states: Arc::new(Mutex::new(HashMap::new())),
            max_attempts: max_attempts.max(1),
            base_delay,
            retention: TERMINAL_STATE_RETENTION,
        }
    }

    /// Keep finished states for `retention` instead of the default
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub async fn submit(&self, task: ReconcileTask) -> Submission {
        self.submit_after(task, Duration::ZERO).await
    }

    /// Schedule a task to start after `delay`. The key is held from now on.
    pub async fn submit_after(&self, task: ReconcileTask, delay: Duration) -> Submission {
        let key = task.key();
        {
            let mut states = self.states.lock().await;
            if states.get(&key).is_some_and(|e| e.state.is_in_flight()) {
                debug!(key = %key, "Task already in flight, dropping trigger");
                return Submission::Dropped;
            }
            states.insert(
                key.clone(),
                TaskEntry {
                    state: TaskState::Queued,
                    finished_at: None,
                },
            );
        }

        let scheduler = self.clone();
        let task_key = key.clone();
        let join = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.execute(task_key, task).await
        });

        Submission::Scheduled(TaskHandle { key, join })
    }

    async fn execute(&self, key: String, task: ReconcileTask) -> TaskState {
        let mut attempt = 0;
        let terminal = loop {
            attempt += 1;

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    break TaskState::Dead {
                        attempts: attempt - 1,
                        error: e.to_string(),
                    }
                }
            };
            self.set_state(&key, TaskState::Running { attempt }).await;

            // A panicking runner ends the task instead of pinning its key
            let runner = self.runner.clone();
            let attempt_task = task.clone();
            let result = match tokio::spawn(async move { runner.run(&attempt_task).await }).await
            {
                Ok(result) => result,
                Err(e) => {
                    drop(permit);
                    error!(
                        target: OPS_LOG_TARGET,
                        key = %key,
                        attempts = attempt,
                        "Network reconciliation aborted: {}",
                        e
                    );
                    break TaskState::Dead {
                        attempts: attempt,
                        error: "reconciliation task aborted".to_string(),
                    };
                }
            };
            drop(permit);

            match result {
                Ok(()) => {
                    debug!(key = %key, attempt, "Task succeeded");
                    break TaskState::Succeeded { attempts: attempt };
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        key = %key,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Task failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        e
                    );
                    self.set_state(
                        &key,
                        TaskState::Retrying {
                            attempt,
                            error: e.to_string(),
                        },
                    )
                    .await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        target: OPS_LOG_TARGET,
                        key = %key,
                        attempts = attempt,
                        retryable = e.is_retryable(),
                        "Network reconciliation gave up: {}",
                        e
                    );
                    break TaskState::Dead {
                        attempts: attempt,
                        error: e.user_message(),
                    };
                }
            }
        };

        self.set_state(&key, terminal.clone()).await;
        if let TaskState::Succeeded { attempts } = &terminal {
            if *attempts > 1 {
                info!(key = %key, attempts, "Task succeeded after retries");
            }
        }
        terminal
    }

    /// base, 2x base, 4x base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Record a state; a terminal one also expires finished entries past
    /// the retention window
    async fn set_state(&self, key: &str, state: TaskState) {
        let mut states = self.states.lock().await;
        let finished_at = (!state.is_in_flight()).then(Instant::now);
        if finished_at.is_some() {
            let retention = self.retention;
            states.retain(|_, entry| {
                entry
                    .finished_at
                    .map_or(true, |finished| finished.elapsed() <= retention)
            });
        }
        states.insert(key.to_string(), TaskEntry { state, finished_at });
    }

    pub async fn is_in_flight(&self, key: &str) -> bool {
        self.states
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.state.is_in_flight())
    }

    /// Current state, or the terminal state of the last run for the key
    /// while it is retained
    pub async fn state(&self, key: &str) -> Option<TaskState> {
        self.states
            .lock()
            .await
            .get(key)
            .map(|entry| entry.state.clone())
    }

    /// Number of keys with a tracked state, finished ones included
    pub async fn tracked_count(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.states
            .lock()
            .await
            .values()
            .filter(|entry| entry.state.is_in_flight())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Counts runs; blocks until released when gated; fails the first
    /// `failures` attempts with `error`.
    struct FakeRunner {
        runs: AtomicUsize,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
        gate: Option<Arc<Notify>>,
        failures: usize,
        retryable: bool,
        panics: bool,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                runs: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                gate: None,
                failures: 0,
                retryable: true,
                panics: false,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn failing(failures: usize, retryable: bool) -> Self {
            Self {
                failures,
                retryable,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl ReconcileRunner for FakeRunner {
        async fn run(&self, _task: &ReconcileTask) -> Result<(), NetworkError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.panics {
                panic!("runner blew up");
            }

            if run < self.failures {
                return Err(if self.retryable {
                    NetworkError::Driver {
                        operation: "connect".to_string(),
                        network: "temps-env-1".to_string(),
                        message: "daemon unavailable".to_string(),
                    }
                } else {
                    NetworkError::IsolationDisabled
                });
            }
            Ok(())
        }
    }

    fn scheduler(runner: Arc<FakeRunner>, concurrency: usize) -> ReconcileScheduler {
        ReconcileScheduler::with_limits(runner, concurrency, 3, Duration::from_millis(1))
    }

    #[test]
    fn test_task_keys() {
        let app = ResourceRef::application(42);
        assert_eq!(ReconcileTask::Resource(app).key(), "reconcile:application:42");
        assert_eq!(ReconcileTask::Full(app).key(), "reconcile-full:application:42");
        assert_eq!(ReconcileTask::Server(3).key(), "reconcile-server:3");
        assert_eq!(
            ReconcileTask::Cleanup(ResourceRef::database(9)).key(),
            "cleanup:database:9"
        );
    }

    #[tokio::test]
    async fn test_same_key_is_dropped_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let runner = Arc::new(FakeRunner::gated(gate.clone()));
        let scheduler = scheduler(runner.clone(), 4);
        let task = ReconcileTask::Resource(ResourceRef::application(1));

        let first = scheduler.submit(task.clone()).await;
        let second = scheduler.submit(task.clone()).await;

        assert!(first.is_scheduled());
        assert!(matches!(second, Submission::Dropped));
        assert!(scheduler.is_in_flight(&task.key()).await);

        gate.notify_one();
        let state = first.into_handle().unwrap().wait().await;

        assert_eq!(state, TaskState::Succeeded { attempts: 1 });
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_in_flight(&task.key()).await);

        // Key is free again once the run finished
        gate.notify_one();
        let again = scheduler.submit(task).await;
        assert!(again.is_scheduled());
        again.into_handle().unwrap().wait().await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_keys_run_concurrently() {
        let gate = Arc::new(Notify::new());
        let runner = Arc::new(FakeRunner::gated(gate.clone()));
        let scheduler = scheduler(runner.clone(), 4);

        let a = scheduler
            .submit(ReconcileTask::Resource(ResourceRef::application(1)))
            .await
            .into_handle()
            .unwrap();
        let b = scheduler
            .submit(ReconcileTask::Resource(ResourceRef::application(2)))
            .await
            .into_handle()
            .unwrap();

        while runner.concurrent.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.in_flight_count().await, 2);

        gate.notify_waiters();
        assert_eq!(a.wait().await, TaskState::Succeeded { attempts: 1 });
        assert_eq!(b.wait().await, TaskState::Succeeded { attempts: 1 });
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let runner = Arc::new(FakeRunner::new());
        let scheduler = scheduler(runner.clone(), 1);

        let mut handles = Vec::new();
        for id in 0..5 {
            handles.push(
                scheduler
                    .submit(ReconcileTask::Server(id))
                    .await
                    .into_handle()
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.wait().await;
        }

        assert_eq!(runner.runs.load(Ordering::SeqCst), 5);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let runner = Arc::new(FakeRunner::failing(2, true));
        let scheduler = scheduler(runner.clone(), 2);

        let state = scheduler
            .submit(ReconcileTask::Server(1))
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;

        assert_eq!(state, TaskState::Succeeded { attempts: 3 });
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_dead() {
        let runner = Arc::new(FakeRunner::failing(10, true));
        let scheduler = scheduler(runner.clone(), 2);
        let task = ReconcileTask::Server(1);

        let state = scheduler
            .submit(task.clone())
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;

        assert!(matches!(state, TaskState::Dead { attempts: 3, .. }));
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.state(&task.key()).await, Some(state));
    }

    #[tokio::test]
    async fn test_configuration_errors_are_not_retried() {
        let runner = Arc::new(FakeRunner::failing(10, false));
        let scheduler = scheduler(runner.clone(), 2);

        let state = scheduler
            .submit(ReconcileTask::Resource(ResourceRef::service(1)))
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;

        assert!(matches!(state, TaskState::Dead { attempts: 1, .. }));
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_runner_frees_its_key() {
        let runner = Arc::new(FakeRunner {
            panics: true,
            ..FakeRunner::new()
        });
        let scheduler = scheduler(runner.clone(), 2);
        let task = ReconcileTask::Resource(ResourceRef::application(3));

        let state = scheduler
            .submit(task.clone())
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;

        assert!(matches!(state, TaskState::Dead { attempts: 1, .. }));
        assert_eq!(scheduler.state(&task.key()).await, Some(state));
        assert!(!scheduler.is_in_flight(&task.key()).await);
        assert!(scheduler.submit(task).await.is_scheduled());
    }

    #[tokio::test]
    async fn test_finished_states_expire() {
        let runner = Arc::new(FakeRunner::new());
        let scheduler = scheduler(runner, 2).with_retention(Duration::from_millis(5));
        let old = ReconcileTask::Cleanup(ResourceRef::application(1));
        let new = ReconcileTask::Cleanup(ResourceRef::application(2));

        scheduler
            .submit(old.clone())
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;
        assert!(scheduler.state(&old.key()).await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler
            .submit(new.clone())
            .await
            .into_handle()
            .unwrap()
            .wait()
            .await;

        assert_eq!(scheduler.state(&old.key()).await, None);
        assert_eq!(
            scheduler.state(&new.key()).await,
            Some(TaskState::Succeeded { attempts: 1 })
        );
        assert_eq!(scheduler.tracked_count().await, 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let scheduler = ReconcileScheduler::with_limits(
            Arc::new(FakeRunner::new()),
            1,
            3,
            Duration::from_millis(2000),
        );
        assert_eq!(scheduler.backoff(1), Duration::from_millis(2000));
        assert_eq!(scheduler.backoff(2), Duration::from_millis(4000));
        assert_eq!(scheduler.backoff(3), Duration::from_millis(8000));
    }
}
