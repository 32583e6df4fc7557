//! Execution of one bound (job, worker) pair.
//!
//! The processor is a dispatcher keyed on job type: each branch makes
//! exactly one `PlatformClient` call with arguments projected from the
//! job's input and the worker's credentials, then turns the outcome into
//! persisted state. Worker loops never see errors from here; every path
//! ends in a store transition.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::kernel::platform::{canonical_post_url, ActionReceipt, PlatformClient, PlatformError};
use crate::kernel::stream_hub::StreamHub;
use crate::models::{
    action::{ActionStatus, RateLimitHint},
    job::MAX_RETRIES,
    Account, Job, JobInput, JobStatus, JobType,
};

use super::events::EngineEvent;
use super::rate_limiter::RateLimiter;
use super::store::JobStore;
use super::worker_pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Host for canonical post URLs.
    pub platform_host: String,
    /// Per-platform-call deadline.
    pub call_timeout: StdDuration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            platform_host: "x.com".to_string(),
            call_timeout: StdDuration::from_secs(60),
        }
    }
}

pub struct ActionProcessor {
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    limiter: Arc<RateLimiter>,
    platform: Arc<dyn PlatformClient>,
    hub: StreamHub,
    config: ProcessorConfig,
}

impl ActionProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<WorkerPool>,
        limiter: Arc<RateLimiter>,
        platform: Arc<dyn PlatformClient>,
        hub: StreamHub,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            pool,
            limiter,
            platform,
            hub,
            config,
        }
    }

    /// Execute one bound pair and persist the outcome.
    ///
    /// `action_id` is present for mutating jobs, whose attempt row was
    /// created at dispatch.
    pub async fn process(&self, job: &Job, worker: &Account, action_id: Option<Uuid>) -> Result<()> {
        let input = match job.typed_input() {
            Ok(input) => input,
            Err(e) => {
                // Should have been rejected at submission; terminal either way.
                return self
                    .fail_permanent(job, worker, action_id, &format!("invalid input: {e}"))
                    .await;
            }
        };

        self.store.bump_request_counters(worker.id).await?;

        let call = self.dispatch(&input, worker);
        let outcome = match timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(self.config.call_timeout.as_secs())),
        };

        match outcome {
            Ok(result) => self.complete(job, worker, action_id, result).await,
            Err(error) => self.handle_error(job, worker, action_id, error).await,
        }
    }

    /// One platform call per job type.
    async fn dispatch(&self, input: &JobInput, worker: &Account) -> Result<Value, PlatformError> {
        let login = worker.login.as_deref().unwrap_or(&worker.account_no);
        let host = &self.config.platform_host;

        match input {
            JobInput::ScrapeProfile(p) => self.platform.scrape_profile(worker, &p.username).await,
            JobInput::ScrapePosts(p) => {
                self.platform
                    .scrape_posts(worker, &p.username, p.count, p.hours, p.max_replies)
                    .await
            }
            JobInput::SearchTrending(p) => self.platform.search_trending(worker, p.count).await,
            JobInput::SearchPosts(p) => {
                self.platform.search_posts(worker, &p.query, p.count).await
            }
            JobInput::SearchUsers(p) => {
                self.platform.search_users(worker, &p.query, p.count).await
            }
            JobInput::BatchSearch(p) => {
                // One search per query; partial results are still results.
                let mut results = Vec::with_capacity(p.queries.len());
                for query in &p.queries {
                    let result = self.platform.search_posts(worker, query, p.count).await?;
                    results.push(json!({"query": query, "result": result}));
                }
                Ok(json!({ "searches": results }))
            }
            JobInput::Like(p) => {
                let receipt = self
                    .platform
                    .like(worker, &p.target, p.api_method.unwrap_or_default())
                    .await?;
                Ok(engagement_result(host, login, &p.target, &receipt))
            }
            JobInput::Retweet(p) => {
                let receipt = self
                    .platform
                    .retweet(worker, &p.target, p.api_method.unwrap_or_default())
                    .await?;
                Ok(engagement_result(host, login, &p.target, &receipt))
            }
            JobInput::Reply(p) => {
                let receipt = self
                    .platform
                    .reply(
                        worker,
                        &p.target,
                        &p.text,
                        p.media.as_deref(),
                        p.api_method.unwrap_or_default(),
                    )
                    .await?;
                Ok(composed_result(host, login, &receipt))
            }
            JobInput::Quote(p) => {
                let receipt = self
                    .platform
                    .quote(
                        worker,
                        &p.target,
                        &p.text,
                        p.media.as_deref(),
                        p.api_method.unwrap_or_default(),
                    )
                    .await?;
                Ok(composed_result(host, login, &receipt))
            }
            JobInput::CreatePost(p) => {
                let receipt = self
                    .platform
                    .create_post(
                        worker,
                        &p.text,
                        p.media.as_deref(),
                        p.api_method.unwrap_or_default(),
                    )
                    .await?;
                Ok(composed_result(host, login, &receipt))
            }
            JobInput::Follow(p) => {
                let receipt = self.platform.follow(worker, &p.user).await?;
                Ok(json!({
                    "user": p.user,
                    "user_id": receipt.id,
                    "following": true,
                }))
            }
            JobInput::DirectMessage(p) => {
                let receipt = self
                    .platform
                    .direct_message(worker, &p.user, &p.text, p.media.as_deref())
                    .await?;
                Ok(json!({
                    "user": p.user,
                    "message_id": receipt.id,
                    "sent": true,
                }))
            }
            JobInput::UpdateProfile(p) => {
                let receipt = self.platform.update_profile(worker, p).await?;
                let mut result = json!({ "updated": true });
                if let Some(payload) = receipt.payload {
                    result["profile"] = payload;
                }
                Ok(result)
            }
        }
    }

    async fn complete(
        &self,
        job: &Job,
        worker: &Account,
        action_id: Option<Uuid>,
        result: Value,
    ) -> Result<()> {
        // Reload by id: an external cancel may have landed mid-run, in
        // which case the result is discarded.
        let cancel_requested = self
            .store
            .find_job(job.id)
            .await?
            .map(|j| j.cancel_requested)
            .unwrap_or(false);

        if cancel_requested {
            if let Some(action_id) = action_id {
                self.limiter
                    .update_status(action_id, ActionStatus::Cancelled, None, None)
                    .await?;
            }
            self.store.mark_job_cancelled_after_run(job.id).await?;
            self.publish_update(job, JobStatus::Cancelled, None);
            info!(job_id = %job.id, "cancelled job finished, result discarded");
            return Ok(());
        }

        if let Some(action_id) = action_id {
            self.limiter
                .update_status(action_id, ActionStatus::Completed, None, None)
                .await?;
        }
        self.store.mark_job_completed(job.id, &result).await?;
        self.store.record_account_outcome(worker.id, true).await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            account_no = %worker.account_no,
            "job completed"
        );
        self.publish_update(job, JobStatus::Completed, Some(result));

        Ok(())
    }

    async fn handle_error(
        &self,
        job: &Job,
        worker: &Account,
        action_id: Option<Uuid>,
        error: PlatformError,
    ) -> Result<()> {
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            account_no = %worker.account_no,
            error = %error,
            "job attempt failed"
        );

        match error {
            PlatformError::RateLimited {
                retry_after_secs,
                remaining,
            } => {
                let reset = Utc::now() + Duration::seconds(retry_after_secs.unwrap_or(900));
                if let Some(action_id) = action_id {
                    self.limiter
                        .update_status(
                            action_id,
                            ActionStatus::Failed,
                            Some("rate limited"),
                            Some(RateLimitHint {
                                reset: Some(reset),
                                remaining,
                            }),
                        )
                        .await?;
                }
                // Park the worker until the platform says otherwise.
                self.store.set_rate_limited_until(worker.id, reset).await?;

                if job.retry_count < MAX_RETRIES {
                    self.store
                        .requeue_job(job.id, true, Some(reset), false)
                        .await?;
                    self.publish_update(job, JobStatus::Pending, None);
                } else {
                    self.fail_job(job, worker, "rate limited after maximum retries")
                        .await?;
                }
                Ok(())
            }

            PlatformError::Auth(message) => {
                if let Some(action_id) = action_id {
                    self.limiter
                        .update_status(action_id, ActionStatus::Failed, Some(&message), None)
                        .await?;
                }
                self.pool.deactivate_for_revalidation(worker.id).await?;
                // Reassignment does not charge the retry budget.
                self.reassign_or_fail(job, worker, false, None).await
            }

            PlatformError::Transient(_) | PlatformError::Timeout(_) => {
                let message = error.to_string();
                if let Some(action_id) = action_id {
                    self.limiter
                        .update_status(action_id, ActionStatus::Failed, Some(&message), None)
                        .await?;
                }

                if job.retry_count < MAX_RETRIES {
                    let backoff = Duration::seconds(2i64.pow(job.retry_count as u32));
                    self.retry_preferring_original(job, worker, Some(Utc::now() + backoff))
                        .await
                } else {
                    self.fail_job(
                        job,
                        worker,
                        &format!("error persisted after maximum retries: {message}"),
                    )
                    .await
                }
            }

            PlatformError::NotFound(message) | PlatformError::Rejected(message) => {
                self.fail_permanent(job, worker, action_id, &message).await
            }
        }
    }

    /// Transient retry path: the original worker is preferred when it is
    /// still dispatchable (less platform churn); otherwise any eligible
    /// worker; otherwise the job fails.
    async fn retry_preferring_original(
        &self,
        job: &Job,
        worker: &Account,
        not_before: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();
        let original_ok = self
            .store
            .find_account(worker.id)
            .await?
            .map(|a| a.is_dispatchable(now) && !a.is_stale(now))
            .unwrap_or(false);

        if original_ok {
            self.store.requeue_job(job.id, true, not_before, true).await?;
            self.publish_update(job, JobStatus::Pending, None);
            return Ok(());
        }

        self.reassign_or_fail(job, worker, true, not_before).await
    }

    /// Move the job onto some other worker, or fail it when none exists.
    async fn reassign_or_fail(
        &self,
        job: &Job,
        failed_worker: &Account,
        bump_retry: bool,
        not_before: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let pinned = job
            .typed_input()
            .ok()
            .and_then(|input| input.account_id())
            .is_some();

        if pinned {
            // A pinned action cannot move accounts; with its account out
            // of service the job cannot proceed.
            return self.fail_job(job, failed_worker, "no available workers").await;
        }

        let candidates = self.store.lock_eligible_workers(8).await?;
        let has_other = candidates.iter().any(|c| c.id != failed_worker.id);

        if has_other {
            self.store
                .requeue_job(job.id, bump_retry, not_before, false)
                .await?;
            self.publish_update(job, JobStatus::Pending, None);
            Ok(())
        } else {
            self.fail_job(job, failed_worker, "no available workers").await
        }
    }

    async fn fail_permanent(
        &self,
        job: &Job,
        worker: &Account,
        action_id: Option<Uuid>,
        message: &str,
    ) -> Result<()> {
        if let Some(action_id) = action_id {
            self.limiter
                .update_status(action_id, ActionStatus::Failed, Some(message), None)
                .await?;
        }
        self.fail_job(job, worker, message).await
    }

    async fn fail_job(&self, job: &Job, worker: &Account, message: &str) -> Result<()> {
        self.store.mark_job_failed(job.id, message).await?;
        self.store.record_account_outcome(worker.id, false).await?;
        self.publish_update(job, JobStatus::Failed, None);
        Ok(())
    }

    fn publish_update(&self, job: &Job, status: JobStatus, result: Option<Value>) {
        self.hub.publish(&EngineEvent::JobUpdate {
            job_id: job.id,
            status,
            result: result.clone(),
        });
        if job.job_type == JobType::UpdateProfile {
            self.hub.publish(&EngineEvent::ProfileUpdateStatus {
                id: job.id,
                status,
                error: None,
            });
        }
    }
}

/// Result payload for like/retweet: the target post.
fn engagement_result(host: &str, login: &str, target: &str, receipt: &ActionReceipt) -> Value {
    let id = receipt.id.as_deref().unwrap_or(target);
    json!({
        "tweet_id": id,
        "tweet_url": canonical_post_url(host, login, id),
    })
}

/// Result payload for reply/quote/create: the newly created post.
fn composed_result(host: &str, login: &str, receipt: &ActionReceipt) -> Value {
    match receipt.id.as_deref() {
        Some(id) => json!({
            "tweet_id": id,
            "tweet_url": canonical_post_url(host, login, id),
        }),
        None => json!({ "posted": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::engine::rate_limiter::RateLimitTable;
    use crate::kernel::engine::testing::{worker_account, MemoryJobStore, MockPlatform};
    use crate::kernel::engine::worker_pool::WorkerPoolConfig;
    use crate::models::{ActionType, ApiMethod, ValidationState};

    struct Harness {
        store: Arc<MemoryJobStore>,
        platform: Arc<MockPlatform>,
        limiter: Arc<RateLimiter>,
        processor: ActionProcessor,
    }

    fn harness() -> Harness {
        let store = MemoryJobStore::shared();
        let platform = MockPlatform::shared();
        let limiter = Arc::new(RateLimiter::new(store.clone(), RateLimitTable::default()));
        let pool = Arc::new(WorkerPool::new(
            store.clone(),
            limiter.clone(),
            WorkerPoolConfig::default(),
        ));
        let processor = ActionProcessor::new(
            store.clone(),
            pool,
            limiter.clone(),
            platform.clone(),
            StreamHub::new(),
            ProcessorConfig::default(),
        );
        Harness {
            store,
            platform,
            limiter,
            processor,
        }
    }

    async fn seed_like_job(h: &Harness, worker: &Account, target: &str) -> (Job, Uuid) {
        let job = Job::builder()
            .job_type(JobType::Like)
            .input_params(json!({"account_id": worker.id, "target": target}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();

        let insert = h
            .limiter
            .record_attempt(
                worker.id,
                Some(job.id),
                ActionType::Like,
                ApiMethod::Graphql,
                Some(target),
                None,
            )
            .await
            .unwrap();
        let action_id = insert.action().id;
        h.limiter
            .update_status(action_id, ActionStatus::Running, None, None)
            .await
            .unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();

        (job, action_id)
    }

    #[tokio::test]
    async fn single_like_completes_with_canonical_url() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        let (job, action_id) = seed_like_job(&h, &worker, "123").await;
        h.processor
            .process(&job, &worker, Some(action_id))
            .await
            .unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["tweet_id"], "123");
        assert_eq!(result["tweet_url"], "https://x.com/wrk-1/status/123");

        let actions = h.store.all_actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, ActionStatus::Completed);

        let account = h.store.find_account(worker.id).await.unwrap().unwrap();
        assert_eq!(account.total_completed, 1);
    }

    #[tokio::test]
    async fn platform_429_requeues_and_parks_worker() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        h.platform
            .script_error(
                "like",
                PlatformError::RateLimited {
                    retry_after_secs: Some(300),
                    remaining: Some(0),
                },
            )
            .await;

        let (job, action_id) = seed_like_job(&h, &worker, "123").await;
        h.processor
            .process(&job, &worker, Some(action_id))
            .await
            .unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        let not_before = job.not_before.unwrap();
        let wait = not_before - Utc::now();
        assert!(wait > Duration::seconds(290) && wait <= Duration::seconds(300));

        let account = h.store.find_account(worker.id).await.unwrap().unwrap();
        let until = account.rate_limited_until.unwrap();
        assert!(!account.is_dispatchable(Utc::now()));
        assert!(account.is_dispatchable(until + Duration::seconds(1)));

        let actions = h.store.all_actions().await;
        assert_eq!(actions[0].status, ActionStatus::Failed);
        assert!(actions[0].rate_limit_reset.is_some());
    }

    #[tokio::test]
    async fn auth_failure_deactivates_and_fails_pinned_job() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        h.platform
            .script_error("like", PlatformError::Auth("401".into()))
            .await;

        let (job, action_id) = seed_like_job(&h, &worker, "123").await;
        h.processor
            .process(&job, &worker, Some(action_id))
            .await
            .unwrap();

        let account = h.store.find_account(worker.id).await.unwrap().unwrap();
        assert!(!account.is_active);
        assert_eq!(account.validation_state, ValidationState::Pending);

        // Pinned actions cannot move to another account.
        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.error.as_deref(), Some("no available workers"));
    }

    #[tokio::test]
    async fn auth_failure_reassigns_unpinned_scrape() {
        let h = harness();
        let failing = worker_account("WRK-1");
        let spare = worker_account("WRK-2");
        h.store.put_account(failing.clone()).await;
        h.store.put_account(spare).await;

        h.platform
            .script_error("scrape_profile", PlatformError::Auth("403".into()))
            .await;

        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "alice"}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, failing.id).await.unwrap();

        h.processor.process(&job, &failing, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        // Reassignment leaves the retry budget untouched.
        assert_eq!(job.retry_count, 0);
        assert!(job.worker_account_id.is_none());
    }

    #[tokio::test]
    async fn transient_error_retries_with_backoff() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        h.platform
            .script_error("scrape_profile", PlatformError::Transient("reset".into()))
            .await;

        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "alice"}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();

        h.processor.process(&job, &worker, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        // Original worker preferred.
        assert_eq!(job.worker_account_id, Some(worker.id));
        assert!(job.not_before.is_some());
    }

    #[tokio::test]
    async fn transient_error_fails_after_max_retries() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        h.platform
            .script_error("scrape_profile", PlatformError::Transient("reset".into()))
            .await;

        let mut job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "alice"}))
            .build();
        job.retry_count = MAX_RETRIES;
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();

        h.processor.process(&job, &worker, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("maximum retries"));

        let account = h.store.find_account(worker.id).await.unwrap().unwrap();
        assert_eq!(account.total_failed, 1);
    }

    #[tokio::test]
    async fn business_rejection_is_permanent() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        h.platform
            .script_error("follow", PlatformError::Rejected("target suspended".into()))
            .await;

        let job = Job::builder()
            .job_type(JobType::Follow)
            .input_params(json!({"account_id": worker.id, "user": "bob"}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();

        h.processor.process(&job, &worker, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("target suspended"));
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn cancel_requested_discards_result() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "alice"}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();
        assert!(h.store.set_cancel_requested(job.id).await.unwrap());

        h.processor.process(&job, &worker, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn follow_result_shape() {
        let h = harness();
        let worker = worker_account("WRK-1");
        h.store.put_account(worker.clone()).await;

        let job = Job::builder()
            .job_type(JobType::Follow)
            .input_params(json!({"account_id": worker.id, "user": "bob"}))
            .build();
        let job = h.store.insert_job(job).await.unwrap();
        h.store.mark_job_running(job.id, worker.id).await.unwrap();

        h.processor.process(&job, &worker, None).await.unwrap();

        let job = h.store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert_eq!(result["user"], "bob");
        assert_eq!(result["following"], true);
    }
}
