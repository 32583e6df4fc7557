//! Test doubles for the engine: an in-memory [`JobStore`] and a scripted
//! [`PlatformClient`].
//!
//! Both are compiled unconditionally so integration tests and downstream
//! harnesses can drive the full engine without Postgres or the platform.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::pagination::{Page, Paginated};
use crate::kernel::platform::{ActionReceipt, PlatformClient, PlatformError};
use crate::models::{
    account::ValidationState,
    action::{ActionInsert, ActionStatus, ActionType, NewAction, RateLimitHint},
    Account, Action, ApiMethod, Job, JobStats, JobStatus, JobType, ProfileUpdateParams,
};

use super::store::JobStore;

// ============================================================================
// MemoryJobStore
// ============================================================================

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    actions: HashMap<Uuid, Action>,
    accounts: HashMap<Uuid, Account>,
}

/// In-memory store with the same observable behaviour as the Postgres
/// implementation: dequeue ordering, dedup on live/completed actions,
/// recovery sweeps, window counters.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed an account directly.
    pub async fn put_account(&self, account: Account) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    /// Snapshot of every action row, for assertions.
    pub async fn all_actions(&self) -> Vec<Action> {
        let mut actions: Vec<_> = self.state.lock().await.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.created_at);
        actions
    }

    /// Snapshot of every job row, for assertions.
    pub async fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<_> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Backdate an action's created_at, to exercise sliding windows.
    pub async fn backdate_action(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(action) = self.state.lock().await.actions.get_mut(&id) {
            action.created_at = created_at;
        }
    }

    /// Backdate a worker's last_task_time, to exercise the health check.
    pub async fn backdate_last_task(&self, id: Uuid, last_task_time: DateTime<Utc>) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            account.last_task_time = Some(last_task_time);
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: Job) -> Result<Job> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect())
    }

    async fn load_jobs_assigned(&self, worker_ids: &[Uuid]) -> Result<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| {
                j.worker_account_id
                    .is_some_and(|w| worker_ids.contains(&w))
                    && matches!(
                        j.status,
                        JobStatus::Pending | JobStatus::Locked | JobStatus::Running
                    )
            })
            .cloned()
            .collect())
    }

    async fn dequeue_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let mut ready: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending && j.not_before.map_or(true, |nb| nb <= now)
            })
            .map(|j| j.id)
            .collect();

        ready.sort_by(|a, b| {
            let ja = &state.jobs[a];
            let jb = &state.jobs[b];
            jb.priority
                .cmp(&ja.priority)
                .then(ja.created_at.cmp(&jb.created_at))
        });
        ready.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            let job = state.jobs.get_mut(&id).expect("job exists");
            job.status = JobStatus::Locked;
            claimed.push(job.clone());
        }

        Ok(claimed)
    }

    async fn release_locked(&self, ids: &[Uuid]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for id in ids {
            if let Some(job) = state.jobs.get_mut(id) {
                if job.status == JobStatus::Locked {
                    job.status = JobStatus::Pending;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn mark_job_running(&self, id: Uuid, worker_account_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.worker_account_id = Some(worker_account_id);
            job.not_before = None;
        }
        Ok(())
    }

    async fn mark_job_completed(&self, id: Uuid, result: &Value) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.result = Some(result.clone());
            job.error = None;
            job.completed_at = Some(now);
            job.execution_time_ms = job
                .started_at
                .map(|s| (now - s).num_milliseconds());
        }
        Ok(())
    }

    async fn mark_job_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_job_cancelled(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            if matches!(
                job.status,
                JobStatus::Pending | JobStatus::Locked | JobStatus::Failed
            ) {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn set_cancel_requested(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            if job.status == JobStatus::Running {
                job.cancel_requested = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn mark_job_cancelled_after_run(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Cancelled;
            job.result = None;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn requeue_job(
        &self,
        id: Uuid,
        bump_retry: bool,
        not_before: Option<DateTime<Utc>>,
        keep_worker: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Pending;
            if bump_retry {
                job.retry_count += 1;
            }
            job.not_before = not_before;
            if !keep_worker {
                job.worker_account_id = None;
            }
            job.started_at = None;
        }
        Ok(())
    }

    async fn reassign_jobs(&self, ids: &[Uuid], worker_account_id: Option<Uuid>) -> Result<()> {
        let mut state = self.state.lock().await;
        for id in ids {
            if let Some(job) = state.jobs.get_mut(id) {
                job.worker_account_id = worker_account_id;
            }
        }
        Ok(())
    }

    async fn recover_interrupted(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut recovered = 0;
        for job in state.jobs.values_mut() {
            if matches!(job.status, JobStatus::Running | JobStatus::Locked) {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.worker_account_id = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn list_jobs(
        &self,
        page: &Page,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
    ) -> Result<Paginated<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = jobs.len() as i64;
        let items = jobs
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size() as usize)
            .collect();

        Ok(Paginated::new(items, page, total))
    }

    async fn job_stats(&self) -> Result<JobStats> {
        let state = self.state.lock().await;
        let mut stats = JobStats::default();
        for job in state.jobs.values() {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Locked => stats.locked += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn create_action(&self, new: NewAction) -> Result<ActionInsert> {
        let mut state = self.state.lock().await;

        if let Some(target) = &new.target_id {
            let existing = state
                .actions
                .values()
                .filter(|a| {
                    a.account_id == new.account_id
                        && a.action_type == new.action_type
                        && a.target_id.as_deref() == Some(target.as_str())
                        && (a.status.is_live() || a.status == ActionStatus::Completed)
                })
                .max_by_key(|a| a.created_at)
                .cloned();
            if let Some(existing) = existing {
                return Ok(ActionInsert::Duplicate(existing));
            }
        }

        let action = Action::builder()
            .account_id(new.account_id)
            .action_type(new.action_type)
            .api_method(new.api_method)
            .build();
        let mut action = action;
        action.job_id = new.job_id;
        action.target_id = new.target_id;
        action.meta = new.meta;

        state.actions.insert(action.id, action.clone());
        Ok(ActionInsert::Created(action))
    }

    async fn update_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
        rate_limit: Option<RateLimitHint>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(action) = state.actions.get_mut(&id) {
            action.status = status;
            action.error_message = error.map(str::to_string);
            if let Some(hint) = rate_limit {
                if hint.reset.is_some() {
                    action.rate_limit_reset = hint.reset;
                }
                if hint.remaining.is_some() {
                    action.rate_limit_remaining = hint.remaining;
                }
            }
            if matches!(
                status,
                ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled
            ) {
                action.executed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn find_existing_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|a| {
                a.account_id == account_id
                    && action_types.contains(&a.action_type)
                    && a.target_id.as_deref() == Some(target_id)
                    && (a.status.is_live() || a.status == ActionStatus::Completed)
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn find_completed_action(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
    ) -> Result<Option<Action>> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .find(|a| {
                a.account_id == account_id
                    && action_types.contains(&a.action_type)
                    && a.target_id.as_deref() == Some(target_id)
                    && a.status == ActionStatus::Completed
            })
            .cloned())
    }

    async fn recent_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
        since: DateTime<Utc>,
    ) -> Result<Vec<Action>> {
        let state = self.state.lock().await;
        let mut actions: Vec<_> = state
            .actions
            .values()
            .filter(|a| {
                a.account_id == account_id
                    && action_types.contains(&a.action_type)
                    && a.created_at >= since
                    && a.status != ActionStatus::Failed
            })
            .cloned()
            .collect();
        actions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(actions)
    }

    async fn count_running_actions(
        &self,
        account_id: Uuid,
        action_types: &[ActionType],
    ) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .values()
            .filter(|a| {
                a.account_id == account_id
                    && action_types.contains(&a.action_type)
                    && a.status == ActionStatus::Running
            })
            .count() as i64)
    }

    async fn expire_stale_running(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for action in state.actions.values_mut() {
            if action.status == ActionStatus::Running && action.created_at < older_than {
                action.status = ActionStatus::Failed;
                action.error_message = Some("timeout".to_string());
                action.executed_at = Some(Utc::now());
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_no(&self, account_no: &str) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.account_no == account_no && a.deleted_at.is_none())
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<_> = state
            .accounts
            .values()
            .filter(|a| a.deleted_at.is_none())
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_no.cmp(&b.account_no));
        Ok(accounts)
    }

    async fn lock_eligible_workers(&self, limit: i64) -> Result<Vec<Account>> {
        let now = Utc::now();
        let state = self.state.lock().await;

        let mut workers: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.is_dispatchable(now))
            .cloned()
            .collect();
        workers.sort_by_key(|a| (a.requests_15min, a.total_completed));
        workers.truncate(limit.max(0) as usize);

        Ok(workers)
    }

    async fn touch_last_task(&self, ids: &[Uuid]) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for id in ids {
            if let Some(account) = state.accounts.get_mut(id) {
                account.last_task_time = Some(now);
            }
        }
        Ok(())
    }

    async fn count_workers(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.kind == crate::models::AccountKind::Worker && a.deleted_at.is_none())
            .count() as i64)
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            account.is_active = active;
        }
        Ok(())
    }

    async fn set_validation_state(&self, id: Uuid, vstate: ValidationState) -> Result<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            account.validation_state = vstate;
        }
        Ok(())
    }

    async fn set_rate_limited_until(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            account.rate_limited_until = Some(until);
        }
        Ok(())
    }

    async fn record_account_outcome(&self, id: Uuid, success: bool) -> Result<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            if success {
                account.total_completed += 1;
            } else {
                account.total_failed += 1;
            }
            account.last_task_time = Some(Utc::now());
        }
        Ok(())
    }

    async fn bump_request_counters(&self, id: Uuid) -> Result<()> {
        if let Some(account) = self.state.lock().await.accounts.get_mut(&id) {
            let now = Utc::now();
            account.requests_15min += 1;
            account.requests_24h += 1;
            account.last_rate_limit_reset.get_or_insert(now);
            account.last_24h_reset.get_or_insert(now);
        }
        Ok(())
    }

    async fn reset_request_windows(&self) -> Result<u64> {
        let now = Utc::now();
        let mut reset = 0;
        let mut state = self.state.lock().await;
        for account in state.accounts.values_mut() {
            if account
                .last_rate_limit_reset
                .is_some_and(|t| now - t >= chrono::Duration::minutes(15))
            {
                account.requests_15min = 0;
                account.last_rate_limit_reset = Some(now);
                reset += 1;
            }
            if account
                .last_24h_reset
                .is_some_and(|t| now - t >= chrono::Duration::hours(24))
            {
                account.requests_24h = 0;
                account.last_24h_reset = Some(now);
                reset += 1;
            }
        }
        Ok(reset)
    }
}

// ============================================================================
// MockPlatform
// ============================================================================

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: &'static str,
    pub account_no: String,
    pub target: Option<String>,
}

#[derive(Default)]
struct MockPlatformState {
    calls: Vec<MockCall>,
    scripted: HashMap<&'static str, VecDeque<PlatformError>>,
}

/// Scripted platform double: succeeds by default, fails with queued
/// errors when scripted, and records every call for inspection.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockPlatformState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue an error for the next call to `operation`.
    pub async fn script_error(&self, operation: &'static str, error: PlatformError) {
        self.state
            .lock()
            .await
            .scripted
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub async fn calls(&self) -> Vec<MockCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: &'static str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    async fn record(
        &self,
        operation: &'static str,
        worker: &Account,
        target: Option<&str>,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(MockCall {
            operation,
            account_no: worker.account_no.clone(),
            target: target.map(str::to_string),
        });
        if let Some(queue) = state.scripted.get_mut(operation) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn scrape_profile(
        &self,
        worker: &Account,
        username: &str,
    ) -> Result<Value, PlatformError> {
        self.record("scrape_profile", worker, Some(username)).await?;
        Ok(json!({"username": username, "followers": 42}))
    }

    async fn scrape_posts(
        &self,
        worker: &Account,
        username: &str,
        count: u32,
        _hours: Option<u32>,
        _max_replies: Option<u32>,
    ) -> Result<Value, PlatformError> {
        self.record("scrape_posts", worker, Some(username)).await?;
        Ok(json!({"username": username, "posts": [], "requested": count}))
    }

    async fn search_trending(&self, worker: &Account, count: u32) -> Result<Value, PlatformError> {
        self.record("search_trending", worker, None).await?;
        Ok(json!({"trends": [], "requested": count}))
    }

    async fn search_posts(
        &self,
        worker: &Account,
        query: &str,
        count: u32,
    ) -> Result<Value, PlatformError> {
        self.record("search_posts", worker, Some(query)).await?;
        Ok(json!({"query": query, "posts": [], "requested": count}))
    }

    async fn search_users(
        &self,
        worker: &Account,
        query: &str,
        count: u32,
    ) -> Result<Value, PlatformError> {
        self.record("search_users", worker, Some(query)).await?;
        Ok(json!({"query": query, "users": [], "requested": count}))
    }

    async fn like(
        &self,
        worker: &Account,
        post_id: &str,
        _method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("like", worker, Some(post_id)).await?;
        Ok(ActionReceipt::with_id(post_id))
    }

    async fn retweet(
        &self,
        worker: &Account,
        post_id: &str,
        _method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("retweet", worker, Some(post_id)).await?;
        Ok(ActionReceipt::with_id(post_id))
    }

    async fn reply(
        &self,
        worker: &Account,
        post_id: &str,
        _text: &str,
        _media: Option<&str>,
        _method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("reply", worker, Some(post_id)).await?;
        Ok(ActionReceipt::with_id(format!("{post_id}-reply")))
    }

    async fn quote(
        &self,
        worker: &Account,
        post_id: &str,
        _text: &str,
        _media: Option<&str>,
        _method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("quote", worker, Some(post_id)).await?;
        Ok(ActionReceipt::with_id(format!("{post_id}-quote")))
    }

    async fn create_post(
        &self,
        worker: &Account,
        _text: &str,
        _media: Option<&str>,
        _method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("create_post", worker, None).await?;
        Ok(ActionReceipt::with_id(Uuid::new_v4().simple().to_string()))
    }

    async fn follow(&self, worker: &Account, user: &str) -> Result<ActionReceipt, PlatformError> {
        self.record("follow", worker, Some(user)).await?;
        Ok(ActionReceipt::with_id(user))
    }

    async fn direct_message(
        &self,
        worker: &Account,
        user: &str,
        _text: &str,
        _media: Option<&str>,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("direct_message", worker, Some(user)).await?;
        Ok(ActionReceipt::with_id(user))
    }

    async fn update_profile(
        &self,
        worker: &Account,
        _update: &ProfileUpdateParams,
    ) -> Result<ActionReceipt, PlatformError> {
        self.record("update_profile", worker, None).await?;
        Ok(ActionReceipt::default())
    }
}

/// A dispatchable worker account for tests.
pub fn worker_account(account_no: &str) -> Account {
    Account::builder()
        .account_no(account_no)
        .login(account_no.to_lowercase())
        .auth_token("auth".to_string())
        .csrf_token("ct0".to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_dequeues_by_priority_then_age() {
        let store = MemoryJobStore::new();

        let low = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "a"}))
            .priority(1i16)
            .build();
        let high = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "b"}))
            .priority(9i16)
            .build();

        store.insert_job(low.clone()).await.unwrap();
        store.insert_job(high.clone()).await.unwrap();

        let claimed = store.dequeue_pending(10).await.unwrap();
        assert_eq!(claimed[0].id, high.id);
        assert_eq!(claimed[1].id, low.id);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Locked));

        // Locked jobs are invisible to a second dequeue.
        assert!(store.dequeue_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_deduplicates_actions() {
        let store = MemoryJobStore::new();
        let account = worker_account("WRK-1");
        let account_id = account.id;
        store.put_account(account).await;

        let new = |target: &str| {
            NewAction::builder()
                .account_id(account_id)
                .action_type(ActionType::Like)
                .target_id(target.to_string())
                .build()
        };

        let first = store.create_action(new("123")).await.unwrap();
        assert!(first.is_created());

        let second = store.create_action(new("123")).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(second.action().id, first.action().id);
        assert_eq!(store.all_actions().await.len(), 1);
    }

    #[tokio::test]
    async fn mock_platform_scripts_errors_in_order() {
        let platform = MockPlatform::new();
        let worker = worker_account("WRK-1");

        platform
            .script_error("like", PlatformError::Transient("reset".into()))
            .await;

        assert!(platform.like(&worker, "1", ApiMethod::Graphql).await.is_err());
        assert!(platform.like(&worker, "2", ApiMethod::Graphql).await.is_ok());
        assert_eq!(platform.call_count("like").await, 2);
    }

    #[tokio::test]
    async fn recover_interrupted_resets_mid_flight_jobs() {
        let store = MemoryJobStore::new();
        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "a"}))
            .build();
        store.insert_job(job.clone()).await.unwrap();

        store.dequeue_pending(1).await.unwrap();
        store.mark_job_running(job.id, Uuid::new_v4()).await.unwrap();

        let swept = store.recover_interrupted().await.unwrap();
        assert_eq!(swept, 1);

        let job = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.worker_account_id.is_none());
    }
}
