//! Job model: the unit of work submitted by callers.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::action::{ActionClass, ActionType, ApiMethod};
use crate::common::pagination::{Page, Paginated};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Locked,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// The closed set of job types callers may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ScrapeProfile,
    ScrapePosts,
    SearchTrending,
    SearchPosts,
    SearchUsers,
    BatchSearch,
    Like,
    Retweet,
    Reply,
    Quote,
    CreatePost,
    Follow,
    DirectMessage,
    UpdateProfile,
}

impl JobType {
    /// Rate-limit bucket this job type draws from.
    pub fn action_class(&self) -> ActionClass {
        match self {
            JobType::Like => ActionClass::Like,
            JobType::Retweet => ActionClass::Retweet,
            JobType::Reply | JobType::Quote | JobType::CreatePost => ActionClass::Post,
            JobType::Follow => ActionClass::Follow,
            JobType::DirectMessage => ActionClass::Dm,
            JobType::UpdateProfile => ActionClass::ProfileUpdate,
            JobType::ScrapeProfile
            | JobType::ScrapePosts
            | JobType::SearchTrending
            | JobType::SearchPosts
            | JobType::SearchUsers
            | JobType::BatchSearch => ActionClass::Read,
        }
    }

    /// The durable action record type for mutating jobs; None for reads.
    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            JobType::Like => Some(ActionType::Like),
            JobType::Retweet => Some(ActionType::Retweet),
            JobType::Reply => Some(ActionType::Reply),
            JobType::Quote => Some(ActionType::Quote),
            JobType::CreatePost => Some(ActionType::CreatePost),
            JobType::Follow => Some(ActionType::Follow),
            JobType::DirectMessage => Some(ActionType::DirectMessage),
            JobType::UpdateProfile => Some(ActionType::UpdateProfile),
            _ => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.action_type().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ScrapeProfile => "scrape_profile",
            JobType::ScrapePosts => "scrape_posts",
            JobType::SearchTrending => "search_trending",
            JobType::SearchPosts => "search_posts",
            JobType::SearchUsers => "search_users",
            JobType::BatchSearch => "batch_search",
            JobType::Like => "like",
            JobType::Retweet => "retweet",
            JobType::Reply => "reply",
            JobType::Quote => "quote",
            JobType::CreatePost => "create_post",
            JobType::Follow => "follow",
            JobType::DirectMessage => "direct_message",
            JobType::UpdateProfile => "update_profile",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Typed input params
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeProfileParams {
    pub username: String,
}

fn default_count() -> u32 {
    15
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapePostsParams {
    pub username: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replies: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingParams {
    #[serde(default = "default_count")]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSearchParams {
    pub queries: Vec<String>,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Like / retweet: act on one post with one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngageParams {
    pub account_id: Uuid,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_method: Option<ApiMethod>,
}

/// Reply / quote: compose against a target post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeParams {
    pub account_id: Uuid,
    pub target: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_method: Option<ApiMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePostParams {
    pub account_id: Uuid,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_method: Option<ApiMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowParams {
    pub account_id: Uuid,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmParams {
    pub account_id: Uuid,
    pub user: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdateParams {
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Typed view over a job's `input_params`.
///
/// The store persists opaque JSON; the engine and the API always go
/// through this variant, parsed against the job's declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum JobInput {
    ScrapeProfile(ScrapeProfileParams),
    ScrapePosts(ScrapePostsParams),
    SearchTrending(TrendingParams),
    SearchPosts(SearchParams),
    SearchUsers(SearchParams),
    BatchSearch(BatchSearchParams),
    Like(EngageParams),
    Retweet(EngageParams),
    Reply(ComposeParams),
    Quote(ComposeParams),
    CreatePost(CreatePostParams),
    Follow(FollowParams),
    DirectMessage(DmParams),
    UpdateProfile(ProfileUpdateParams),
}

impl JobInput {
    /// Parse raw input params against a job type.
    pub fn parse(job_type: JobType, value: &serde_json::Value) -> Result<Self> {
        let parsed = match job_type {
            JobType::ScrapeProfile => JobInput::ScrapeProfile(from_value(value)?),
            JobType::ScrapePosts => JobInput::ScrapePosts(from_value(value)?),
            JobType::SearchTrending => JobInput::SearchTrending(from_value(value)?),
            JobType::SearchPosts => JobInput::SearchPosts(from_value(value)?),
            JobType::SearchUsers => JobInput::SearchUsers(from_value(value)?),
            JobType::BatchSearch => JobInput::BatchSearch(from_value(value)?),
            JobType::Like => JobInput::Like(from_value(value)?),
            JobType::Retweet => JobInput::Retweet(from_value(value)?),
            JobType::Reply => JobInput::Reply(from_value(value)?),
            JobType::Quote => JobInput::Quote(from_value(value)?),
            JobType::CreatePost => JobInput::CreatePost(from_value(value)?),
            JobType::Follow => JobInput::Follow(from_value(value)?),
            JobType::DirectMessage => JobInput::DirectMessage(from_value(value)?),
            JobType::UpdateProfile => JobInput::UpdateProfile(from_value(value)?),
        };

        Ok(parsed)
    }

    /// The account pinned to perform this job, if the type requires one.
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            JobInput::Like(p) | JobInput::Retweet(p) => Some(p.account_id),
            JobInput::Reply(p) | JobInput::Quote(p) => Some(p.account_id),
            JobInput::CreatePost(p) => Some(p.account_id),
            JobInput::Follow(p) => Some(p.account_id),
            JobInput::DirectMessage(p) => Some(p.account_id),
            JobInput::UpdateProfile(p) => Some(p.account_id),
            _ => None,
        }
    }

    /// The de-duplication target (post id or user handle), when one exists.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            JobInput::Like(p) | JobInput::Retweet(p) => Some(&p.target),
            JobInput::Reply(p) | JobInput::Quote(p) => Some(&p.target),
            JobInput::Follow(p) => Some(&p.user),
            JobInput::DirectMessage(p) => Some(&p.user),
            _ => None,
        }
    }

    /// API method requested for the platform call, when it applies.
    pub fn api_method(&self) -> ApiMethod {
        match self {
            JobInput::Like(p) | JobInput::Retweet(p) => p.api_method.unwrap_or_default(),
            JobInput::Reply(p) | JobInput::Quote(p) => p.api_method.unwrap_or_default(),
            JobInput::CreatePost(p) => p.api_method.unwrap_or_default(),
            // DMs only exist on the REST surface.
            JobInput::DirectMessage(_) => ApiMethod::Rest,
            _ => ApiMethod::default(),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| anyhow!("invalid input_params: {e}"))
}

// ============================================================================
// Job Model
// ============================================================================

const COLUMNS: &str = "id, job_type, status, input_params, result, error, priority, \
    retry_count, cancel_requested, worker_account_id, not_before, created_at, started_at, \
    completed_at, execution_time_ms";

pub const MAX_RETRIES: i32 = 3;
pub const MAX_PRIORITY: i16 = 10;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub job_type: JobType,
    #[builder(default)]
    pub status: JobStatus,
    pub input_params: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,
    #[builder(default = 0)]
    pub priority: i16,
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = false)]
    pub cancel_requested: bool,
    #[builder(default, setter(strip_option))]
    pub worker_account_id: Option<Uuid>,
    #[builder(default, setter(strip_option))]
    pub not_before: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub execution_time_ms: Option<i64>,
}

impl Job {
    /// Typed view over `input_params`.
    pub fn typed_input(&self) -> Result<JobInput> {
        JobInput::parse(self.job_type, &self.input_params)
    }

    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await?;

        Ok(job)
    }

    /// Non-terminal jobs currently assigned to any of the given workers.
    pub async fn load_assigned(worker_ids: &[Uuid], db: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM jobs
            WHERE worker_account_id = ANY($1)
              AND status IN ('pending', 'locked', 'running')
            "#
        ))
        .bind(worker_ids)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    pub async fn load_by_ids(ids: &[Uuid], db: &PgPool) -> Result<Vec<Self>> {
        let jobs =
            sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(db)
                .await?;

        Ok(jobs)
    }

    pub async fn insert(&self, db: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO jobs (
                id, job_type, status, input_params, result, error, priority,
                retry_count, cancel_requested, worker_account_id, not_before, created_at,
                started_at, completed_at, execution_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.job_type)
        .bind(self.status)
        .bind(&self.input_params)
        .bind(&self.result)
        .bind(&self.error)
        .bind(self.priority)
        .bind(self.retry_count)
        .bind(self.cancel_requested)
        .bind(self.worker_account_id)
        .bind(self.not_before)
        .bind(self.created_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .bind(self.execution_time_ms)
        .fetch_one(db)
        .await?;

        Ok(job)
    }

    /// Claim pending jobs atomically using FOR UPDATE SKIP LOCKED.
    ///
    /// Claimed jobs transition pending → locked and are invisible to other
    /// dispatch loops until released or run.
    pub async fn dequeue_pending(limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND (not_before IS NULL OR not_before <= NOW())
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'locked'
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(jobs)
    }

    /// Put locked jobs back in the pending pool (no workers available).
    pub async fn release_locked(ids: &[Uuid], db: &PgPool) -> Result<u64> {
        let released =
            sqlx::query("UPDATE jobs SET status = 'pending' WHERE id = ANY($1) AND status = 'locked'")
                .bind(ids)
                .execute(db)
                .await?
                .rows_affected();

        Ok(released)
    }

    pub async fn mark_running(id: Uuid, worker_account_id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), worker_account_id = $2, not_before = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(worker_account_id)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn mark_completed(id: Uuid, result: &serde_json::Value, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                error = NULL,
                completed_at = NOW(),
                execution_time_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn mark_failed(id: Uuid, error: &str, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                completed_at = NOW(),
                execution_time_ms = CASE
                    WHEN started_at IS NULL THEN NULL
                    ELSE (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Cancel a job that has not started running. Returns false otherwise.
    pub async fn mark_cancelled(id: Uuid, db: &PgPool) -> Result<bool> {
        let cancelled = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'locked', 'failed')
            "#,
        )
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

        Ok(cancelled > 0)
    }

    /// Flag a running job for cancellation once it finishes.
    pub async fn set_cancel_requested(id: Uuid, db: &PgPool) -> Result<bool> {
        let flagged = sqlx::query(
            "UPDATE jobs SET cancel_requested = TRUE WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

        Ok(flagged > 0)
    }

    /// Discard the result of a finished run for an externally cancelled job.
    pub async fn mark_cancelled_after_run(id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', result = NULL, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Return a job to the pending pool for another attempt.
    pub async fn requeue(
        id: Uuid,
        bump_retry: bool,
        not_before: Option<DateTime<Utc>>,
        keep_worker: bool,
        db: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                not_before = $3,
                worker_account_id = CASE WHEN $4 THEN worker_account_id ELSE NULL END,
                started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(bump_retry)
        .bind(not_before)
        .bind(keep_worker)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Move a set of jobs onto a different worker (or unassign them).
    pub async fn reassign(ids: &[Uuid], worker_account_id: Option<Uuid>, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE jobs SET worker_account_id = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(worker_account_id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Boot-time sweep: anything mid-flight from a previous process goes
    /// back to pending with its start timestamp cleared.
    pub async fn recover_interrupted(db: &PgPool) -> Result<u64> {
        let recovered = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', started_at = NULL, worker_account_id = NULL
            WHERE status IN ('running', 'locked')
            "#,
        )
        .execute(db)
        .await?
        .rows_affected();

        Ok(recovered)
    }

    pub async fn list(
        page: &Page,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
        db: &PgPool,
    ) -> Result<Paginated<Self>> {
        let jobs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
              AND ($2::job_type IS NULL OR job_type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(status)
        .bind(job_type)
        .bind(page.size())
        .bind(page.offset())
        .fetch_all(db)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
              AND ($2::job_type IS NULL OR job_type = $2)
            "#,
        )
        .bind(status)
        .bind(job_type)
        .fetch_one(db)
        .await?;

        Ok(Paginated::new(jobs, page, total))
    }

    pub async fn stats(db: &PgPool) -> Result<JobStats> {
        let stats = sqlx::query_as::<_, JobStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'locked') AS locked,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled
            FROM jobs
            "#,
        )
        .fetch_one(db)
        .await?;

        Ok(stats)
    }
}

/// Aggregate job counts for the stats endpoint.
#[derive(FromRow, Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub locked: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_starts_pending_with_no_retries() {
        let job = Job::builder()
            .job_type(JobType::ScrapeProfile)
            .input_params(json!({"username": "alice"}))
            .build();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.worker_account_id.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Locked.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn post_variants_share_the_post_class() {
        assert_eq!(JobType::Reply.action_class(), ActionClass::Post);
        assert_eq!(JobType::Quote.action_class(), ActionClass::Post);
        assert_eq!(JobType::CreatePost.action_class(), ActionClass::Post);
    }

    #[test]
    fn scrapes_and_searches_are_read_class() {
        for job_type in [
            JobType::ScrapeProfile,
            JobType::ScrapePosts,
            JobType::SearchTrending,
            JobType::SearchPosts,
            JobType::SearchUsers,
            JobType::BatchSearch,
        ] {
            assert_eq!(job_type.action_class(), ActionClass::Read);
            assert!(!job_type.is_mutating());
        }
    }

    #[test]
    fn parse_like_input() {
        let account_id = Uuid::new_v4();
        let input = JobInput::parse(
            JobType::Like,
            &json!({"account_id": account_id, "target": "123"}),
        )
        .unwrap();

        assert_eq!(input.account_id(), Some(account_id));
        assert_eq!(input.target_id(), Some("123"));
        assert_eq!(input.api_method(), ApiMethod::Graphql);
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let err = JobInput::parse(JobType::Reply, &json!({"target": "123"}));
        assert!(err.is_err());
    }

    #[test]
    fn scrape_posts_defaults_count() {
        let input =
            JobInput::parse(JobType::ScrapePosts, &json!({"username": "alice"})).unwrap();
        match input {
            JobInput::ScrapePosts(p) => {
                assert_eq!(p.count, 15);
                assert!(p.hours.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn dm_always_uses_rest() {
        let input = JobInput::parse(
            JobType::DirectMessage,
            &json!({"account_id": Uuid::new_v4(), "user": "bob", "text": "hi"}),
        )
        .unwrap();
        assert_eq!(input.api_method(), ApiMethod::Rest);
        assert_eq!(input.target_id(), Some("bob"));
    }

    #[test]
    fn create_post_has_no_dedup_target() {
        let input = JobInput::parse(
            JobType::CreatePost,
            &json!({"account_id": Uuid::new_v4(), "text": "hello"}),
        )
        .unwrap();
        assert_eq!(input.target_id(), None);
    }
}
