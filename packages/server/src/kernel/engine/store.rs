//! The durable store seam.
//!
//! `JobStore` is the narrow transactional surface the engine is written
//! against: job lifecycle transitions, dedup-aware action records, and the
//! worker/account queries the rate limiter and worker pool need. The
//! production implementation is [`PgJobStore`]; engine tests run against
//! the in-memory store in [`super::testing`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::pagination::{Page, Paginated};
use crate::models::{
    account::ValidationState,
    action::{ActionInsert, ActionStatus, ActionType, NewAction, RateLimitHint},
    Account, Action, Job, JobStats, JobStatus, JobType,
};

/// Durable CRUD for jobs, actions and accounts.
///
/// Every method is one transaction; multi-row updates commit atomically.
/// Callers hold ids, never rows, across calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    async fn insert_job(&self, job: Job) -> Result<Job>;
    async fn find_job(&self, id: Uuid) -> Result<Option<Job>>;
    async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>>;

    /// Non-terminal jobs assigned to any of the given workers.
    async fn load_jobs_assigned(&self, worker_ids: &[Uuid]) -> Result<Vec<Job>>;

    /// Claim up to `limit` pending jobs (priority desc, created_at asc)
    /// with skip-locked semantics; claimed jobs transition to `locked`.
    async fn dequeue_pending(&self, limit: i64) -> Result<Vec<Job>>;

    /// Return locked jobs to `pending` (no workers were available).
    async fn release_locked(&self, ids: &[Uuid]) -> Result<u64>;

    async fn mark_job_running(&self, id: Uuid, worker_account_id: Uuid) -> Result<()>;
    async fn mark_job_completed(&self, id: Uuid, result: &serde_json::Value) -> Result<()>;
    async fn mark_job_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Cancel a job that is not running; returns whether anything changed.
    async fn mark_job_cancelled(&self, id: Uuid) -> Result<bool>;

    /// Flag a running job so its result is discarded when it finishes.
    async fn set_cancel_requested(&self, id: Uuid) -> Result<bool>;

    /// Discard the result of a cancelled job that was allowed to finish.
    async fn mark_job_cancelled_after_run(&self, id: Uuid) -> Result<()>;

    /// Return a job to `pending` for another attempt.
    async fn requeue_job(
        &self,
        id: Uuid,
        bump_retry: bool,
        not_before: Option<DateTime<Utc>>,
        keep_worker: bool,
    ) -> Result<()>;

    /// Move jobs onto a different worker (or unassign with None).
    async fn reassign_jobs(&self, ids: &[Uuid], worker_account_id: Option<Uuid>) -> Result<()>;

    /// Boot sweep: running/locked jobs from a dead process → pending.
    async fn recover_interrupted(&self) -> Result<u64>;

    async fn list_jobs(
        &self,
        page: &Page,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
    ) -> Result<Paginated<Job>>;

    async fn job_stats(&self) -> Result<JobStats>;

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Record a new attempt; duplicates resolve to the existing row.
    async fn create_action(&self, new: NewAction) -> Result<ActionInsert>;

    async fn update_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
        rate_limit: Option<RateLimitHint>,
    ) -> Result<()>;

    /// A live or completed action for (account, types, target).
    async fn find_existing_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>>;

    /// A completed action for (account, types, target).
    async fn find_completed_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>>;

    /// Non-failed attempts since `since`, newest first.
    async fn recent_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        since: DateTime<Utc>,
    ) -> Result<Vec<Action>>;

    async fn count_running_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
    ) -> Result<i64>;

    /// Fail actions stuck in `running` since before `older_than`.
    async fn expire_stale_running(&self, older_than: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>>;
    async fn find_account_by_no(&self, account_no: &str) -> Result<Option<Account>>;
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Dispatchable workers, least-loaded first, locked with skip-locked
    /// semantics so concurrent dispatchers never double-select.
    async fn lock_eligible_workers(&self, limit: i64) -> Result<Vec<Account>>;

    async fn count_workers(&self) -> Result<i64>;

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()>;
    async fn set_validation_state(&self, id: Uuid, state: ValidationState) -> Result<()>;
    async fn set_rate_limited_until(&self, id: Uuid, until: DateTime<Utc>) -> Result<()>;

    /// Record a finished job on the worker's counters + last_task_time.
    async fn record_account_outcome(&self, id: Uuid, success: bool) -> Result<()>;

    /// Refresh `last_task_time` for workers just handed work.
    async fn touch_last_task(&self, ids: &[Uuid]) -> Result<()>;

    /// Count one outbound request against the account's sliding windows.
    async fn bump_request_counters(&self, id: Uuid) -> Result<()>;

    /// Roll expired 15-minute / 24-hour request windows forward.
    async fn reset_request_windows(&self) -> Result<u64>;
}

/// PostgreSQL-backed store. Thin: the SQL lives with the models.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: Job) -> Result<Job> {
        job.insert(&self.pool).await
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>> {
        Job::find_by_id(id, &self.pool).await
    }

    async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        Job::load_by_ids(ids, &self.pool).await
    }

    async fn load_jobs_assigned(&self, worker_ids: &[Uuid]) -> Result<Vec<Job>> {
        Job::load_assigned(worker_ids, &self.pool).await
    }

    async fn dequeue_pending(&self, limit: i64) -> Result<Vec<Job>> {
        Job::dequeue_pending(limit, &self.pool).await
    }

    async fn release_locked(&self, ids: &[Uuid]) -> Result<u64> {
        Job::release_locked(ids, &self.pool).await
    }

    async fn mark_job_running(&self, id: Uuid, worker_account_id: Uuid) -> Result<()> {
        Job::mark_running(id, worker_account_id, &self.pool).await
    }

    async fn mark_job_completed(&self, id: Uuid, result: &serde_json::Value) -> Result<()> {
        Job::mark_completed(id, result, &self.pool).await
    }

    async fn mark_job_failed(&self, id: Uuid, error: &str) -> Result<()> {
        Job::mark_failed(id, error, &self.pool).await
    }

    async fn mark_job_cancelled(&self, id: Uuid) -> Result<bool> {
        Job::mark_cancelled(id, &self.pool).await
    }

    async fn set_cancel_requested(&self, id: Uuid) -> Result<bool> {
        Job::set_cancel_requested(id, &self.pool).await
    }

    async fn mark_job_cancelled_after_run(&self, id: Uuid) -> Result<()> {
        Job::mark_cancelled_after_run(id, &self.pool).await
    }

    async fn requeue_job(
        &self,
        id: Uuid,
        bump_retry: bool,
        not_before: Option<DateTime<Utc>>,
        keep_worker: bool,
    ) -> Result<()> {
        Job::requeue(id, bump_retry, not_before, keep_worker, &self.pool).await
    }

    async fn reassign_jobs(&self, ids: &[Uuid], worker_account_id: Option<Uuid>) -> Result<()> {
        Job::reassign(ids, worker_account_id, &self.pool).await
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        Job::recover_interrupted(&self.pool).await
    }

    async fn list_jobs(
        &self,
        page: &Page,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
    ) -> Result<Paginated<Job>> {
        Job::list(page, status, job_type, &self.pool).await
    }

    async fn job_stats(&self) -> Result<JobStats> {
        Job::stats(&self.pool).await
    }

    async fn create_action(&self, new: NewAction) -> Result<ActionInsert> {
        Action::insert_dedup(&new, &self.pool).await
    }

    async fn update_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
        rate_limit: Option<RateLimitHint>,
    ) -> Result<()> {
        Action::update_status(id, status, error, rate_limit, &self.pool).await
    }

    async fn find_existing_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>> {
        Action::find_existing(account_id, action_types, target_id, &self.pool).await
    }

    async fn find_completed_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>> {
        Action::find_completed(account_id, action_types, target_id, &self.pool).await
    }

    async fn recent_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        since: DateTime<Utc>,
    ) -> Result<Vec<Action>> {
        Action::recent(account_id, action_types, since, &self.pool).await
    }

    async fn count_running_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
    ) -> Result<i64> {
        Action::count_running(account_id, action_types, &self.pool).await
    }

    async fn expire_stale_running(&self, older_than: DateTime<Utc>) -> Result<u64> {
        Action::expire_stale_running(older_than, &self.pool).await
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        Account::find_by_id(id, &self.pool).await
    }

    async fn find_account_by_no(&self, account_no: &str) -> Result<Option<Account>> {
        Account::find_by_account_no(account_no, &self.pool).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Account::list(&self.pool).await
    }

    async fn lock_eligible_workers(&self, limit: i64) -> Result<Vec<Account>> {
        Account::lock_eligible_workers(limit, &self.pool).await
    }

    async fn count_workers(&self) -> Result<i64> {
        Account::count_workers(&self.pool).await
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()> {
        Account::set_active(id, active, &self.pool).await
    }

    async fn set_validation_state(&self, id: Uuid, state: ValidationState) -> Result<()> {
        Account::set_validation_state(id, state, &self.pool).await
    }

    async fn set_rate_limited_until(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        Account::set_rate_limited_until(id, until, &self.pool).await
    }

    async fn record_account_outcome(&self, id: Uuid, success: bool) -> Result<()> {
        Account::record_outcome(id, success, &self.pool).await
    }

    async fn touch_last_task(&self, ids: &[Uuid]) -> Result<()> {
        Account::touch_last_task(ids, &self.pool).await
    }

    async fn bump_request_counters(&self, id: Uuid) -> Result<()> {
        Account::bump_request_counters(id, &self.pool).await
    }

    async fn reset_request_windows(&self) -> Result<u64> {
        Account::reset_request_windows(&self.pool).await
    }
}
