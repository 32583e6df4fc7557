//! Dispatch loops: claim pending jobs, bind them to workers, hand the
//! pairs to the processor.
//!
//! `max_concurrent_workers` copies of [`TaskQueue::run`] execute in
//! parallel. Store-level skip-locked claiming keeps them from stepping on
//! each other; the in-memory batch map (shared with the manager) keeps
//! batch N+1 from dispatching before batch N drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::kernel::stream_hub::StreamHub;
use crate::models::{
    action::{ActionInsert, ActionStatus},
    job::MAX_RETRIES,
    Account, ActionClass, Job, JobStatus, JobType,
};

use super::events::EngineEvent;
use super::processor::ActionProcessor;
use super::rate_limiter::{Decision, DenyReason, RateLimiter};
use super::store::JobStore;
use super::worker_pool::{Reservation, UnavailableReason, WorkerPool};

// ============================================================================
// Shared scheduler state
// ============================================================================

/// Batch bookkeeping shared between the manager and the dispatch loops.
/// One mutex guards it all.
#[derive(Default)]
pub struct SchedState {
    pub current_batch: u32,
    /// job id → batch generation, assigned at enqueue time.
    pub batches: HashMap<Uuid, u32>,
}

pub struct SchedulerShared {
    pub paused: AtomicBool,
    pub state: Mutex<SchedState>,
}

impl Default for SchedulerShared {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            state: Mutex::new(SchedState {
                current_batch: 1,
                batches: HashMap::new(),
            }),
        }
    }
}

impl SchedulerShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs claimed per loop iteration.
    pub batch_size: i64,
    /// Sleep between empty-queue polls.
    pub poll_interval: StdDuration,
    /// Backoff after a zero-worker iteration.
    pub no_worker_backoff: StdDuration,
    /// Hard per-job deadline.
    pub job_deadline: StdDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: StdDuration::from_millis(100),
            no_worker_backoff: StdDuration::from_secs(1),
            job_deadline: StdDuration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Tick {
    Worked,
    Idle,
    NoWorkers,
}

// ============================================================================
// TaskQueue
// ============================================================================

pub struct TaskQueue {
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    limiter: Arc<RateLimiter>,
    processor: Arc<ActionProcessor>,
    hub: StreamHub,
    shared: Arc<SchedulerShared>,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<WorkerPool>,
        limiter: Arc<RateLimiter>,
        processor: Arc<ActionProcessor>,
        hub: StreamHub,
        shared: Arc<SchedulerShared>,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            pool,
            limiter,
            processor,
            hub,
            shared,
            config,
        }
    }

    /// One dispatch loop. Runs until cancelled; never propagates errors.
    pub async fn run(self: Arc<Self>, loop_id: usize, cancel: CancellationToken) {
        info!(loop_id, "dispatch loop starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if self.shared.is_paused() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            match self.tick().await {
                Ok(Tick::Worked) => {}
                Ok(Tick::Idle) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(Tick::NoWorkers) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.no_worker_backoff) => {}
                    }
                }
                Err(e) => {
                    // Internal errors are logged, never fatal to the loop.
                    error!(loop_id, error = %e, "dispatch iteration failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(StdDuration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(loop_id, "dispatch loop stopped");
    }

    /// One claim → bind → execute pass.
    async fn tick(&self) -> Result<Tick> {
        let claimed = self.store.dequeue_pending(self.config.batch_size).await?;
        if claimed.is_empty() {
            return Ok(Tick::Idle);
        }

        // Batch gating: jobs from a future generation go back until the
        // current one drains.
        let (jobs, future_jobs) = {
            let state = self.shared.state.lock().await;
            claimed.into_iter().partition::<Vec<_>, _>(|job| {
                state
                    .batches
                    .get(&job.id)
                    .map_or(true, |batch| *batch <= state.current_batch)
            })
        };
        if !future_jobs.is_empty() {
            let ids: Vec<Uuid> = future_jobs.iter().map(|j| j.id).collect();
            self.store.release_locked(&ids).await?;
            debug!(count = ids.len(), "deferred future-batch jobs");
        }
        if jobs.is_empty() {
            return Ok(Tick::Idle);
        }

        let mut groups: HashMap<JobType, Vec<Job>> = HashMap::new();
        for job in jobs {
            groups.entry(job.job_type).or_default().push(job);
        }

        let mut assignments: HashMap<Uuid, (Account, Vec<(Job, Option<Uuid>)>)> = HashMap::new();
        let mut saw_starvation = false;

        for (job_type, group) in groups {
            let class = job_type.action_class();

            if job_type.is_mutating() {
                for job in group {
                    if let Some((job, worker, action_id)) = self.bind_pinned(job, class).await? {
                        assignments
                            .entry(worker.id)
                            .or_insert_with(|| (worker, Vec::new()))
                            .1
                            .push((job, action_id));
                    }
                }
            } else {
                saw_starvation |= self.bind_reads(group, class, &mut assignments).await?;
            }
        }

        if assignments.is_empty() {
            return Ok(if saw_starvation {
                Tick::NoWorkers
            } else {
                Tick::Worked
            });
        }

        // Per-worker queues run serially; workers run in parallel.
        let runs = assignments.into_values().map(|(worker, jobs)| async move {
            for (job, action_id) in jobs {
                self.execute_one(&job, &worker, action_id).await;
            }
            self.pool.release(worker.id).await;
        });
        join_all(runs).await;

        Ok(Tick::Worked)
    }

    /// Bind read jobs to available workers, round-robin. Returns true if
    /// the pool came up empty and jobs were released.
    async fn bind_reads(
        &self,
        group: Vec<Job>,
        class: ActionClass,
        assignments: &mut HashMap<Uuid, (Account, Vec<(Job, Option<Uuid>)>)>,
    ) -> Result<bool> {
        let mut unassigned = Vec::new();

        // Jobs requeued on their original worker stay there when it is
        // still usable.
        for job in group {
            if let Some(worker_id) = job.worker_account_id {
                if let Reservation::Ready(worker) =
                    self.pool.reserve(worker_id, class, None).await?
                {
                    assignments
                        .entry(worker.id)
                        .or_insert_with(|| (worker, Vec::new()))
                        .1
                        .push((job, None));
                    continue;
                }
            }
            unassigned.push(job);
        }

        if unassigned.is_empty() {
            return Ok(false);
        }

        let workers = self.pool.get_available(class, unassigned.len()).await?;
        if workers.is_empty() {
            let ids: Vec<Uuid> = unassigned.iter().map(|j| j.id).collect();
            self.store.release_locked(&ids).await?;
            debug!(count = ids.len(), %class, "no available workers, released jobs");
            return Ok(true);
        }

        for (i, job) in unassigned.into_iter().enumerate() {
            let worker = &workers[i % workers.len()];
            assignments
                .entry(worker.id)
                .or_insert_with(|| (worker.clone(), Vec::new()))
                .1
                .push((job, None));
        }

        Ok(false)
    }

    /// Bind one mutating job to its pinned account, creating the attempt
    /// record. Returns None when the job was resolved here (duplicate,
    /// deferred, or failed).
    async fn bind_pinned(
        &self,
        job: Job,
        class: ActionClass,
    ) -> Result<Option<(Job, Account, Option<Uuid>)>> {
        let input = match job.typed_input() {
            Ok(input) => input,
            Err(e) => {
                self.store
                    .mark_job_failed(job.id, &format!("invalid input: {e}"))
                    .await?;
                self.publish(job.id, JobStatus::Failed);
                return Ok(None);
            }
        };
        let (Some(account_id), Some(action_type)) =
            (input.account_id(), job.job_type.action_type())
        else {
            self.store
                .mark_job_failed(job.id, "invalid input: missing account binding")
                .await?;
            self.publish(job.id, JobStatus::Failed);
            return Ok(None);
        };
        let target = input.target_id().map(str::to_string);

        match self.pool.reserve(account_id, class, target.as_deref()).await? {
            Reservation::Ready(worker) => {
                let insert = self
                    .limiter
                    .record_attempt(
                        account_id,
                        Some(job.id),
                        action_type,
                        input.api_method(),
                        target.as_deref(),
                        None,
                    )
                    .await?;

                match insert {
                    ActionInsert::Created(action) => Ok(Some((job, worker, Some(action.id)))),
                    ActionInsert::Duplicate(action) => {
                        // Idempotent: point at the existing attempt.
                        self.complete_duplicate(&job, action.id, target.as_deref())
                            .await?;
                        self.pool.release(worker.id).await;
                        Ok(None)
                    }
                }
            }

            Reservation::RateLimited(Decision::Denied {
                reason: DenyReason::Duplicate,
                ..
            }) => {
                let existing = match &target {
                    Some(target) => {
                        self.store
                            .find_completed_action(account_id, &[action_type], target)
                            .await?
                    }
                    None => None,
                };
                match existing {
                    Some(action) => {
                        self.complete_duplicate(&job, action.id, target.as_deref())
                            .await?
                    }
                    None => {
                        self.store.mark_job_failed(job.id, "duplicate").await?;
                        self.publish(job.id, JobStatus::Failed);
                    }
                }
                Ok(None)
            }

            Reservation::RateLimited(decision) => {
                // Deferral does not charge the retry budget.
                let retry_at = match decision {
                    Decision::Denied { retry_at, .. } => retry_at,
                    Decision::Allowed => None,
                };
                let not_before = retry_at.unwrap_or_else(|| Utc::now() + Duration::seconds(60));
                debug!(job_id = %job.id, %not_before, "job deferred by rate limit");
                self.store
                    .requeue_job(job.id, false, Some(not_before), false)
                    .await?;
                Ok(None)
            }

            Reservation::Unavailable(UnavailableReason::NotFound) => {
                self.store
                    .mark_job_failed(job.id, "account not found")
                    .await?;
                self.publish(job.id, JobStatus::Failed);
                Ok(None)
            }

            Reservation::Unavailable(reason) => {
                debug!(job_id = %job.id, %reason, "pinned worker unavailable, deferring");
                self.store
                    .requeue_job(
                        job.id,
                        false,
                        Some(Utc::now() + Duration::seconds(30)),
                        false,
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    async fn complete_duplicate(
        &self,
        job: &Job,
        action_id: Uuid,
        target: Option<&str>,
    ) -> Result<()> {
        let result = json!({
            "duplicate": true,
            "action_id": action_id,
            "target": target,
        });
        self.store.mark_job_completed(job.id, &result).await?;
        self.publish(job.id, JobStatus::Completed);
        Ok(())
    }

    /// Run one bound pair under the per-job deadline.
    async fn execute_one(&self, job: &Job, worker: &Account, action_id: Option<Uuid>) {
        if let Some(action_id) = action_id {
            if let Err(e) = self
                .limiter
                .update_status(action_id, ActionStatus::Running, None, None)
                .await
            {
                error!(job_id = %job.id, error = %e, "failed to mark action running");
            }
        }
        if let Err(e) = self.store.mark_job_running(job.id, worker.id).await {
            error!(job_id = %job.id, error = %e, "failed to mark job running");
            return;
        }
        self.publish(job.id, JobStatus::Running);

        match timeout(
            self.config.job_deadline,
            self.processor.process(job, worker, action_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id = %job.id, error = %e, "processor error");
                if let Err(e) = self.store.mark_job_failed(job.id, "internal error").await {
                    error!(job_id = %job.id, error = %e, "failed to persist job failure");
                }
                self.publish(job.id, JobStatus::Failed);
            }
            Err(_) => {
                warn!(job_id = %job.id, "job exceeded deadline");
                self.handle_deadline(job, action_id).await;
            }
        }
    }

    async fn handle_deadline(&self, job: &Job, action_id: Option<Uuid>) {
        if let Some(action_id) = action_id {
            if let Err(e) = self
                .limiter
                .update_status(action_id, ActionStatus::Failed, Some("timeout"), None)
                .await
            {
                error!(job_id = %job.id, error = %e, "failed to fail timed-out action");
            }
        }

        let outcome = if job.retry_count < MAX_RETRIES {
            self.store.requeue_job(job.id, true, None, false).await
        } else {
            self.store.mark_job_failed(job.id, "timeout").await
        };
        if let Err(e) = outcome {
            error!(job_id = %job.id, error = %e, "failed to persist deadline outcome");
        } else {
            let status = if job.retry_count < MAX_RETRIES {
                JobStatus::Pending
            } else {
                JobStatus::Failed
            };
            self.publish(job.id, status);
        }
    }

    fn publish(&self, job_id: Uuid, status: JobStatus) {
        self.hub.publish(&EngineEvent::JobUpdate {
            job_id,
            status,
            result: None,
        });
    }
}
