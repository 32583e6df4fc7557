//! Top-level scheduler: lifecycle, batch assignment, supervision.
//!
//! The manager owns the shared scheduler state (batch map, pause flag),
//! spawns the dispatch loops, and runs the periodic monitor and cleanup
//! tasks. All cross-process state lives in the store; everything here is
//! rebuildable from it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::kernel::platform::PlatformClient;
use crate::kernel::stream_hub::StreamHub;
use crate::models::{
    job::{MAX_PRIORITY, MAX_RETRIES},
    Job, JobInput, JobStats, JobStatus, JobType,
};

use super::events::{EngineEvent, QueueState};
use super::processor::{ActionProcessor, ProcessorConfig};
use super::queue::{QueueConfig, SchedulerShared, TaskQueue};
use super::rate_limiter::{RateLimitTable, RateLimiter};
use super::store::JobStore;
use super::worker_pool::{WorkerPool, WorkerPoolConfig};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub pool: WorkerPoolConfig,
    pub processor: ProcessorConfig,
    pub queue: QueueConfig,
    pub rate_limits: RateLimitTable,
    /// Number of parallel dispatch loops.
    pub dispatch_loops: usize,
    pub monitor_interval: StdDuration,
    pub cleanup_interval: StdDuration,
    /// Grace period before loops are force-terminated on stop.
    pub stop_grace: StdDuration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            processor: ProcessorConfig::default(),
            queue: QueueConfig::default(),
            rate_limits: RateLimitTable::default(),
            dispatch_loops: 12,
            monitor_interval: StdDuration::from_secs(30),
            cleanup_interval: StdDuration::from_secs(5 * 60),
            stop_grace: StdDuration::from_secs(5),
        }
    }
}

impl TaskManagerConfig {
    /// Derive from application config.
    pub fn from_app_config(config: &crate::Config) -> Self {
        Self {
            pool: WorkerPoolConfig {
                max_concurrent_workers: config.max_concurrent_workers,
                max_requests_per_worker: config.max_requests_per_worker,
            },
            processor: ProcessorConfig {
                platform_host: config.platform_host.clone(),
                ..ProcessorConfig::default()
            },
            rate_limits: RateLimitTable::default()
                .with_read_budget(
                    config.max_requests_per_worker,
                    config.request_interval_seconds,
                )
                .with_env_overrides(),
            dispatch_loops: config.max_concurrent_workers,
            ..Self::default()
        }
    }
}

// ============================================================================
// Submission
// ============================================================================

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("priority {0} out of range (0..=10)")]
    InvalidPriority(i16),
    #[error("invalid input params: {0}")]
    InvalidParams(String),
    #[error("unknown account {0}")]
    UnknownAccount(Uuid),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of submitting a job.
#[derive(Debug, Clone)]
pub enum Submission {
    Created(Job),
    /// An equivalent action already exists; references its job.
    Duplicate(Job),
}

impl Submission {
    pub fn job(&self) -> &Job {
        match self {
            Submission::Created(job) | Submission::Duplicate(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Submission::Created(_))
    }
}

/// Aggregate queue + pool snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub jobs: JobStats,
    pub queue_state: QueueState,
    pub current_batch: u32,
    pub total_workers: i64,
    pub active_workers: usize,
    pub worker_capacity: usize,
}

// ============================================================================
// TaskManager
// ============================================================================

struct Runtime {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Lifecycle {
    state: QueueState,
    runtime: Option<Runtime>,
}

pub struct TaskManager {
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    limiter: Arc<RateLimiter>,
    queue: Arc<TaskQueue>,
    hub: StreamHub,
    shared: Arc<SchedulerShared>,
    config: TaskManagerConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        platform: Arc<dyn PlatformClient>,
        hub: StreamHub,
        config: TaskManagerConfig,
    ) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(store.clone(), config.rate_limits.clone()));
        let pool = Arc::new(WorkerPool::new(
            store.clone(),
            limiter.clone(),
            config.pool.clone(),
        ));
        let processor = Arc::new(ActionProcessor::new(
            store.clone(),
            pool.clone(),
            limiter.clone(),
            platform,
            hub.clone(),
            config.processor.clone(),
        ));
        let shared = SchedulerShared::new();
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            pool.clone(),
            limiter.clone(),
            processor,
            hub.clone(),
            shared.clone(),
            config.queue.clone(),
        ));

        Arc::new(Self {
            store,
            pool,
            limiter,
            queue,
            hub,
            shared,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: QueueState::Stopped,
                runtime: None,
            }),
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate and enqueue a job. Duplicate-sensitive submissions
    /// resolve idempotently to the existing job.
    pub async fn add_job(
        &self,
        job_type: JobType,
        input_params: serde_json::Value,
        priority: i16,
    ) -> Result<Submission, SubmitError> {
        if !(0..=MAX_PRIORITY).contains(&priority) {
            return Err(SubmitError::InvalidPriority(priority));
        }
        let input = JobInput::parse(job_type, &input_params)
            .map_err(|e| SubmitError::InvalidParams(e.to_string()))?;

        if let Some(account_id) = input.account_id() {
            if self
                .store
                .find_account(account_id)
                .await
                .map_err(SubmitError::Internal)?
                .is_none()
            {
                return Err(SubmitError::UnknownAccount(account_id));
            }

            // Duplicate-sensitive: an existing live or completed action on
            // the same target answers this submission.
            if let (Some(action_type), Some(target)) =
                (job_type.action_type(), input.target_id())
            {
                if let Some(existing) = self
                    .store
                    .find_existing_action(account_id, &[action_type], target)
                    .await
                    .map_err(SubmitError::Internal)?
                {
                    if let Some(job_id) = existing.job_id {
                        if let Some(job) = self
                            .store
                            .find_job(job_id)
                            .await
                            .map_err(SubmitError::Internal)?
                        {
                            info!(
                                job_id = %job.id,
                                action_id = %existing.id,
                                "duplicate submission resolved to existing job"
                            );
                            return Ok(Submission::Duplicate(job));
                        }
                    }
                }
            }
        }

        let job = Job::builder()
            .job_type(job_type)
            .input_params(input_params)
            .priority(priority)
            .build();
        let job = self
            .store
            .insert_job(job)
            .await
            .map_err(SubmitError::Internal)?;

        {
            let mut state = self.shared.state.lock().await;
            if state.batches.is_empty() {
                state.current_batch = 1;
            }
            let batch = state.current_batch;
            state.batches.insert(job.id, batch);
        }

        Ok(Submission::Created(job))
    }

    /// Cancel a job. Pending/locked jobs cancel immediately; running jobs
    /// finish and have their result discarded. Returns false for jobs
    /// already terminal or unknown.
    pub async fn cancel_job(&self, id: Uuid) -> Result<bool> {
        if self.store.mark_job_cancelled(id).await? {
            self.hub.publish(&EngineEvent::JobUpdate {
                job_id: id,
                status: JobStatus::Cancelled,
                result: None,
            });
            return Ok(true);
        }
        self.store.set_cancel_requested(id).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the dispatch loops, monitor and cleanup tasks. Idempotent.
    ///
    /// Interrupted jobs from a previous process are swept back to pending
    /// before anything dispatches.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.runtime.is_some() {
            return Ok(());
        }

        let recovered = self.store.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "recovered interrupted jobs");
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.config.dispatch_loops + 2);

        for loop_id in 0..self.config.dispatch_loops {
            let queue = self.queue.clone();
            let token = cancel.child_token();
            handles.push(tokio::spawn(queue.run(loop_id, token)));
        }

        {
            let manager = self.clone();
            let token = cancel.child_token();
            handles.push(tokio::spawn(async move {
                manager.monitor_loop(token).await;
            }));
        }
        {
            let manager = self.clone();
            let token = cancel.child_token();
            handles.push(tokio::spawn(async move {
                manager.cleanup_loop(token).await;
            }));
        }

        lifecycle.runtime = Some(Runtime { cancel, handles });
        lifecycle.state = QueueState::Running;
        self.shared.set_paused(false);

        info!(loops = self.config.dispatch_loops, "task manager started");
        self.hub.publish(&EngineEvent::QueueStatus {
            status: QueueState::Running,
            message: "queue started".to_string(),
        });

        Ok(())
    }

    /// Stop new dequeues; in-flight jobs finish. Idempotent.
    pub async fn pause(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.shared.set_paused(true);
        if lifecycle.state == QueueState::Running {
            lifecycle.state = QueueState::Paused;
            self.hub.publish(&EngineEvent::QueueStatus {
                status: QueueState::Paused,
                message: "queue paused".to_string(),
            });
        }
    }

    /// Resume dequeues after a pause. Idempotent.
    pub async fn resume(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.shared.set_paused(false);
        if lifecycle.state == QueueState::Paused {
            lifecycle.state = QueueState::Running;
            self.hub.publish(&EngineEvent::QueueStatus {
                status: QueueState::Running,
                message: "queue resumed".to_string(),
            });
        }
    }

    /// Cancel all loops with a grace window, then force-terminate.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let runtime = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.state = QueueState::Stopped;
            lifecycle.runtime.take()
        };

        let Some(Runtime { cancel, handles }) = runtime else {
            return Ok(());
        };

        cancel.cancel();

        let grace = self.config.stop_grace;
        let mut handles = handles;
        let drained = {
            let drain = futures::future::join_all(handles.iter_mut());
            tokio::time::timeout(grace, drain).await.is_ok()
        };
        if !drained {
            for handle in &handles {
                if !handle.is_finished() {
                    warn!("force-terminating dispatch task after grace period");
                    handle.abort();
                }
            }
        }

        info!("task manager stopped");
        self.hub.publish(&EngineEvent::QueueStatus {
            status: QueueState::Stopped,
            message: "queue stopped".to_string(),
        });

        Ok(())
    }

    pub async fn queue_state(&self) -> QueueState {
        self.lifecycle.lock().await.state
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let jobs = self.store.job_stats().await?;
        let current_batch = self.shared.state.lock().await.current_batch;
        Ok(QueueStats {
            jobs,
            queue_state: self.queue_state().await,
            current_batch,
            total_workers: self.store.count_workers().await?,
            active_workers: self.pool.active_count().await,
            worker_capacity: self.config.pool.max_concurrent_workers,
        })
    }

    // ------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------

    async fn monitor_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.monitor_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.monitor_tick().await {
                        error!(error = %e, "monitor tick failed");
                    }
                }
            }
        }
    }

    /// One supervisory pass: rotate workers, reassign orphaned jobs,
    /// advance batches, roll request windows, log utilisation.
    pub async fn monitor_tick(&self) -> Result<()> {
        let report = self.pool.rotate().await?;

        if !report.deactivated.is_empty() {
            self.reassign_orphans(&report.deactivated).await?;
        }

        self.advance_batches().await?;
        self.store.reset_request_windows().await?;

        info!(
            active = report.active,
            capacity = report.capacity,
            deactivated = report.deactivated.len(),
            "pool utilisation"
        );

        Ok(())
    }

    /// Jobs still assigned to deactivated workers go back to the pool, or
    /// fail when nobody can take them.
    async fn reassign_orphans(&self, worker_ids: &[Uuid]) -> Result<()> {
        let orphans = self.store.load_jobs_assigned(worker_ids).await?;
        let ids: Vec<Uuid> = orphans
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Locked))
            .map(|j| j.id)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let replacements = self.store.lock_eligible_workers(1).await?;
        if replacements.is_empty() {
            warn!(count = ids.len(), "no workers left for orphaned jobs");
            for id in &ids {
                self.store.mark_job_failed(*id, "no available workers").await?;
                self.hub.publish(&EngineEvent::JobUpdate {
                    job_id: *id,
                    status: JobStatus::Failed,
                    result: None,
                });
            }
        } else {
            info!(count = ids.len(), "reassigning jobs from deactivated workers");
            self.store.reassign_jobs(&ids, None).await?;
        }

        Ok(())
    }

    /// Advance the batch generation once every current-batch job is
    /// terminal and later-batch jobs are waiting.
    pub async fn advance_batches(&self) -> Result<()> {
        let (current, current_ids, has_future) = {
            let state = self.shared.state.lock().await;
            let current = state.current_batch;
            let current_ids: Vec<Uuid> = state
                .batches
                .iter()
                .filter(|(_, b)| **b <= current)
                .map(|(id, _)| *id)
                .collect();
            let has_future = state.batches.values().any(|b| *b > current);
            (current, current_ids, has_future)
        };

        let jobs = self.store.load_jobs_by_ids(&current_ids).await?;
        let all_terminal = jobs.iter().all(|j| j.status.is_terminal());

        let mut state = self.shared.state.lock().await;
        for job in jobs.iter().filter(|j| j.status.is_terminal()) {
            state.batches.remove(&job.id);
        }
        // Entries whose rows vanished are dropped too.
        let found: std::collections::HashSet<Uuid> = jobs.iter().map(|j| j.id).collect();
        for id in current_ids.iter().filter(|id| !found.contains(id)) {
            state.batches.remove(id);
        }

        if all_terminal && has_future && state.current_batch == current {
            state.current_batch += 1;
            info!(batch = state.current_batch, "advanced to next batch");
        }

        Ok(())
    }

    async fn cleanup_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.limiter.cleanup().await {
                        error!(error = %e, "cleanup tick failed");
                    }
                }
            }
        }
    }

    /// Retry ceiling, exposed for the API layer.
    pub fn max_retries() -> i32 {
        MAX_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::engine::testing::{worker_account, MemoryJobStore, MockPlatform};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn manager_with(store: Arc<MemoryJobStore>) -> Arc<TaskManager> {
        TaskManager::new(
            store,
            MockPlatform::shared(),
            StreamHub::new(),
            TaskManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn add_job_validates_priority() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store);

        let err = manager
            .add_job(JobType::ScrapeProfile, json!({"username": "a"}), 11)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPriority(11)));
    }

    #[tokio::test]
    async fn add_job_validates_params() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store);

        let err = manager
            .add_job(JobType::ScrapeProfile, json!({"user": "a"}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn add_job_rejects_unknown_account() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store);

        let err = manager
            .add_job(
                JobType::Like,
                json!({"account_id": Uuid::new_v4(), "target": "1"}),
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn duplicate_submission_returns_original_job() {
        let store = MemoryJobStore::shared();
        let worker = worker_account("WRK-1");
        store.put_account(worker.clone()).await;
        let manager = manager_with(store.clone());

        let first = manager
            .add_job(
                JobType::Like,
                json!({"account_id": worker.id, "target": "123"}),
                0,
            )
            .await
            .unwrap();
        assert!(first.is_created());

        // Simulate dispatch having recorded the attempt.
        manager
            .limiter()
            .record_attempt(
                worker.id,
                Some(first.job().id),
                crate::models::ActionType::Like,
                crate::models::ApiMethod::Graphql,
                Some("123"),
                None,
            )
            .await
            .unwrap();

        let second = manager
            .add_job(
                JobType::Like,
                json!({"account_id": worker.id, "target": "123"}),
                0,
            )
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.job().id, first.job().id);

        // Exactly one job and one action row.
        assert_eq!(store.all_jobs().await.len(), 1);
        assert_eq!(store.all_actions().await.len(), 1);
    }

    #[tokio::test]
    async fn batch_advances_when_current_drains() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store.clone());

        let first = manager
            .add_job(JobType::ScrapeProfile, json!({"username": "a"}), 0)
            .await
            .unwrap();

        // A later submission lands in a future batch.
        {
            let mut state = manager.shared.state.lock().await;
            let job_id = first.job().id;
            assert_eq!(state.batches[&job_id], 1);
            state.batches.insert(Uuid::new_v4(), 2);
        }

        // Current batch not drained yet: no advance.
        manager.advance_batches().await.unwrap();
        assert_eq!(manager.shared.state.lock().await.current_batch, 1);

        store
            .mark_job_completed(first.job().id, &json!({}))
            .await
            .unwrap();
        manager.advance_batches().await.unwrap();
        assert_eq!(manager.shared.state.lock().await.current_batch, 2);
    }

    #[tokio::test]
    async fn pause_resume_roundtrip_is_noop_on_state() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store.clone());
        manager.start().await.unwrap();

        let before = store.all_jobs().await.len();
        manager.pause().await;
        assert_eq!(manager.queue_state().await, QueueState::Paused);
        manager.resume().await;
        assert_eq!(manager.queue_state().await, QueueState::Running);
        assert_eq!(store.all_jobs().await.len(), before);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store);

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.queue_state().await, QueueState::Running);

        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.queue_state().await, QueueState::Stopped);
    }

    #[tokio::test]
    async fn cancel_pending_job_is_immediate() {
        let store = MemoryJobStore::shared();
        let manager = manager_with(store.clone());

        let submission = manager
            .add_job(JobType::ScrapeProfile, json!({"username": "a"}), 0)
            .await
            .unwrap();
        let id = submission.job().id;

        assert!(manager.cancel_job(id).await.unwrap());
        let job = store.find_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        // Terminal: a second cancel is a no-op.
        assert!(!manager.cancel_job(id).await.unwrap());
    }

    #[tokio::test]
    async fn monitor_reassigns_jobs_of_stale_workers() {
        let store = MemoryJobStore::shared();
        let stale = worker_account("WRK-STALE");
        let healthy = worker_account("WRK-OK");
        store.put_account(stale.clone()).await;
        store.put_account(healthy.clone()).await;

        let manager = manager_with(store.clone());

        // Activate the stale worker, then age it past the health window.
        let selected = manager
            .pool()
            .get_available(crate::models::ActionClass::Read, 2)
            .await
            .unwrap();
        assert_eq!(selected.len(), 2);
        store
            .backdate_last_task(stale.id, Utc::now() - Duration::minutes(45))
            .await;

        // Give the stale worker a pending assignment.
        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "a"}))
            .worker_account_id(stale.id)
            .build();
        let job = store.insert_job(job).await.unwrap();

        manager.monitor_tick().await.unwrap();

        let account = store.find_account(stale.id).await.unwrap().unwrap();
        assert!(!account.is_active);

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.worker_account_id.is_none());
    }
}
