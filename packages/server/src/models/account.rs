//! Worker account model.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "account_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Normal,
    #[default]
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "validation_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    #[default]
    Pending,
    Validating,
    Recovering,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "oauth_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OauthState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

// ============================================================================
// Account Model
// ============================================================================

const COLUMNS: &str = "id, account_no, kind, login, \
    auth_token, csrf_token, consumer_key, consumer_secret, \
    access_token, access_token_secret, bearer_token, \
    proxy_url, proxy_port, proxy_username, proxy_password, user_agent, \
    is_active, total_completed, total_failed, requests_15min, requests_24h, \
    last_rate_limit_reset, last_24h_reset, rate_limited_until, last_task_time, \
    validation_state, oauth_state, recovery_attempts, last_validation_time, \
    created_at, updated_at, deleted_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Account {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub account_no: String,
    #[builder(default)]
    pub kind: AccountKind,
    #[builder(default, setter(strip_option))]
    pub login: Option<String>,

    // Credentials
    #[builder(default, setter(strip_option))]
    pub auth_token: Option<String>,
    #[builder(default, setter(strip_option))]
    pub csrf_token: Option<String>,
    #[builder(default, setter(strip_option))]
    pub consumer_key: Option<String>,
    #[builder(default, setter(strip_option))]
    pub consumer_secret: Option<String>,
    #[builder(default, setter(strip_option))]
    pub access_token: Option<String>,
    #[builder(default, setter(strip_option))]
    pub access_token_secret: Option<String>,
    #[builder(default, setter(strip_option))]
    pub bearer_token: Option<String>,

    // Outbound network identity
    #[builder(default, setter(strip_option))]
    pub proxy_url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub proxy_port: Option<String>,
    #[builder(default, setter(strip_option))]
    pub proxy_username: Option<String>,
    #[builder(default, setter(strip_option))]
    pub proxy_password: Option<String>,
    #[builder(default, setter(strip_option))]
    pub user_agent: Option<String>,

    // Worker state
    #[builder(default = true)]
    pub is_active: bool,
    #[builder(default = 0)]
    pub total_completed: i32,
    #[builder(default = 0)]
    pub total_failed: i32,
    #[builder(default = 0)]
    pub requests_15min: i32,
    #[builder(default = 0)]
    pub requests_24h: i32,
    #[builder(default, setter(strip_option))]
    pub last_rate_limit_reset: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_24h_reset: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub rate_limited_until: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_task_time: Option<DateTime<Utc>>,

    // Validation / recovery
    #[builder(default)]
    pub validation_state: ValidationState,
    #[builder(default)]
    pub oauth_state: OauthState,
    #[builder(default = 0)]
    pub recovery_attempts: i32,
    #[builder(default, setter(strip_option))]
    pub last_validation_time: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Required credential fields for dispatch.
    pub fn has_credentials(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.csrf_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether this account may receive work right now.
    ///
    /// Worker kind, active, validation completed or pending, credentials
    /// present, not soft-deleted, not mid-recovery, not platform-limited.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.kind == AccountKind::Worker
            && self.is_active
            && matches!(
                self.validation_state,
                ValidationState::Completed | ValidationState::Pending
            )
            && self.has_credentials()
            && self.deleted_at.is_none()
            && self.rate_limited_until.map_or(true, |until| until <= now)
    }

    /// A worker is stale when its last task finished more than 30 minutes ago.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.last_task_time
            .is_some_and(|last| now - last > Duration::minutes(30))
    }

    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let account =
            sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM accounts WHERE id = $1"))
                .bind(id)
                .fetch_optional(db)
                .await?;

        Ok(account)
    }

    pub async fn find_by_account_no(account_no: &str, db: &PgPool) -> Result<Option<Self>> {
        let account = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE account_no = $1 AND deleted_at IS NULL"
        ))
        .bind(account_no)
        .fetch_optional(db)
        .await?;

        Ok(account)
    }

    pub async fn list(db: &PgPool) -> Result<Vec<Self>> {
        let accounts = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM accounts WHERE deleted_at IS NULL ORDER BY account_no"
        ))
        .fetch_all(db)
        .await?;

        Ok(accounts)
    }

    /// Load dispatchable workers, least-loaded first.
    ///
    /// Rows are locked with SKIP LOCKED so parallel dispatchers never see
    /// the same candidate set.
    pub async fn lock_eligible_workers(limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let mut tx = db.begin().await?;

        let workers = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM accounts
            WHERE kind = 'worker'
              AND is_active = TRUE
              AND deleted_at IS NULL
              AND validation_state IN ('completed', 'pending')
              AND auth_token IS NOT NULL
              AND csrf_token IS NOT NULL
              AND (rate_limited_until IS NULL OR rate_limited_until <= NOW())
            ORDER BY requests_15min ASC, total_completed ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(workers)
    }

    /// Refresh `last_task_time` for workers that were just handed work, so
    /// the staleness check tracks assignment, not only completion.
    pub async fn touch_last_task(ids: &[Uuid], db: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET last_task_time = NOW(), updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn count_workers(db: &PgPool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts WHERE kind = 'worker' AND deleted_at IS NULL",
        )
        .fetch_one(db)
        .await?;

        Ok(count)
    }

    pub async fn insert(&self, db: &PgPool) -> Result<Self> {
        let account = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO accounts (
                id, account_no, kind, login,
                auth_token, csrf_token, consumer_key, consumer_secret,
                access_token, access_token_secret, bearer_token,
                proxy_url, proxy_port, proxy_username, proxy_password, user_agent,
                is_active, total_completed, total_failed, requests_15min, requests_24h,
                last_rate_limit_reset, last_24h_reset, rate_limited_until, last_task_time,
                validation_state, oauth_state, recovery_attempts, last_validation_time,
                created_at, updated_at, deleted_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(&self.account_no)
        .bind(self.kind)
        .bind(&self.login)
        .bind(&self.auth_token)
        .bind(&self.csrf_token)
        .bind(&self.consumer_key)
        .bind(&self.consumer_secret)
        .bind(&self.access_token)
        .bind(&self.access_token_secret)
        .bind(&self.bearer_token)
        .bind(&self.proxy_url)
        .bind(&self.proxy_port)
        .bind(&self.proxy_username)
        .bind(&self.proxy_password)
        .bind(&self.user_agent)
        .bind(self.is_active)
        .bind(self.total_completed)
        .bind(self.total_failed)
        .bind(self.requests_15min)
        .bind(self.requests_24h)
        .bind(self.last_rate_limit_reset)
        .bind(self.last_24h_reset)
        .bind(self.rate_limited_until)
        .bind(self.last_task_time)
        .bind(self.validation_state)
        .bind(self.oauth_state)
        .bind(self.recovery_attempts)
        .bind(self.last_validation_time)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.deleted_at)
        .fetch_one(db)
        .await?;

        Ok(account)
    }

    /// Flip the activation flag.
    pub async fn set_active(id: Uuid, active: bool, db: &PgPool) -> Result<()> {
        sqlx::query("UPDATE accounts SET is_active = $1, updated_at = NOW() WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    pub async fn set_validation_state(
        id: Uuid,
        state: ValidationState,
        db: &PgPool,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET validation_state = $1, updated_at = NOW() WHERE id = $2")
            .bind(state)
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Park the account until the platform-reported reset passes.
    pub async fn set_rate_limited_until(
        id: Uuid,
        until: DateTime<Utc>,
        db: &PgPool,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET rate_limited_until = $1, updated_at = NOW() WHERE id = $2")
            .bind(until)
            .bind(id)
            .execute(db)
            .await?;

        Ok(())
    }

    /// Record a finished job on the worker's counters.
    pub async fn record_outcome(id: Uuid, success: bool, db: &PgPool) -> Result<()> {
        let column = if success {
            "total_completed"
        } else {
            "total_failed"
        };
        sqlx::query(&format!(
            "UPDATE accounts SET {column} = {column} + 1, last_task_time = NOW(), updated_at = NOW() WHERE id = $1"
        ))
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Count one outbound request against both sliding windows.
    pub async fn bump_request_counters(id: Uuid, db: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET requests_15min = requests_15min + 1,
                requests_24h = requests_24h + 1,
                last_rate_limit_reset = COALESCE(last_rate_limit_reset, NOW()),
                last_24h_reset = COALESCE(last_24h_reset, NOW()),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Roll the per-account request windows forward. Run periodically.
    pub async fn reset_request_windows(db: &PgPool) -> Result<u64> {
        let fifteen = sqlx::query(
            r#"
            UPDATE accounts
            SET requests_15min = 0, last_rate_limit_reset = NOW(), updated_at = NOW()
            WHERE last_rate_limit_reset IS NOT NULL
              AND last_rate_limit_reset <= NOW() - INTERVAL '15 minutes'
            "#,
        )
        .execute(db)
        .await?
        .rows_affected();

        let daily = sqlx::query(
            r#"
            UPDATE accounts
            SET requests_24h = 0, last_24h_reset = NOW(), updated_at = NOW()
            WHERE last_24h_reset IS NOT NULL
              AND last_24h_reset <= NOW() - INTERVAL '24 hours'
            "#,
        )
        .execute(db)
        .await?
        .rows_affected();

        Ok(fifteen + daily)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_worker() -> Account {
        Account::builder()
            .account_no("WRK-001")
            .login("worker_one".to_string())
            .auth_token("tok".to_string())
            .csrf_token("ct0".to_string())
            .build()
    }

    #[test]
    fn new_worker_is_dispatchable() {
        let account = sample_worker();
        assert!(account.is_dispatchable(Utc::now()));
    }

    #[test]
    fn normal_account_is_not_dispatchable() {
        let mut account = sample_worker();
        account.kind = AccountKind::Normal;
        assert!(!account.is_dispatchable(Utc::now()));
    }

    #[test]
    fn missing_csrf_token_blocks_dispatch() {
        let mut account = sample_worker();
        account.csrf_token = None;
        assert!(!account.is_dispatchable(Utc::now()));
        assert!(!account.has_credentials());
    }

    #[test]
    fn recovering_account_is_not_dispatchable() {
        let mut account = sample_worker();
        account.validation_state = ValidationState::Recovering;
        assert!(!account.is_dispatchable(Utc::now()));
    }

    #[test]
    fn soft_deleted_account_is_not_dispatchable() {
        let mut account = sample_worker();
        account.deleted_at = Some(Utc::now());
        assert!(!account.is_dispatchable(Utc::now()));
    }

    #[test]
    fn platform_limited_account_waits_for_reset() {
        let now = Utc::now();
        let mut account = sample_worker();
        account.rate_limited_until = Some(now + Duration::minutes(5));
        assert!(!account.is_dispatchable(now));
        assert!(account.is_dispatchable(now + Duration::minutes(6)));
    }

    #[test]
    fn stale_after_thirty_minutes_idle() {
        let now = Utc::now();
        let mut account = sample_worker();
        assert!(!account.is_stale(now));

        account.last_task_time = Some(now - Duration::minutes(45));
        assert!(account.is_stale(now));

        account.last_task_time = Some(now - Duration::minutes(10));
        assert!(!account.is_stale(now));
    }
}
