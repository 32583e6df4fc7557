//! Action model: the durable record of one mutating attempt.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "action_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Locked,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    /// Statuses covered by the store's partial unique index.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ActionStatus::Pending | ActionStatus::Running | ActionStatus::Locked
        )
    }
}

/// Mutating operations that leave a durable action record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "action_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Like,
    Retweet,
    Reply,
    Quote,
    CreatePost,
    Follow,
    DirectMessage,
    UpdateProfile,
}

impl ActionType {
    pub fn class(&self) -> ActionClass {
        match self {
            ActionType::Like => ActionClass::Like,
            ActionType::Retweet => ActionClass::Retweet,
            ActionType::Reply | ActionType::Quote | ActionType::CreatePost => ActionClass::Post,
            ActionType::Follow => ActionClass::Follow,
            ActionType::DirectMessage => ActionClass::Dm,
            ActionType::UpdateProfile => ActionClass::ProfileUpdate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Like => "like",
            ActionType::Retweet => "retweet",
            ActionType::Reply => "reply",
            ActionType::Quote => "quote",
            ActionType::CreatePost => "create_post",
            ActionType::Follow => "follow",
            ActionType::DirectMessage => "direct_message",
            ActionType::UpdateProfile => "update_profile",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate-limit bucket. Reply, quote and create_post share the `post`
/// bucket and therefore a single daily budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Like,
    Retweet,
    Post,
    Follow,
    Dm,
    ProfileUpdate,
    Read,
}

impl ActionClass {
    /// The action types whose history this bucket is evaluated over.
    /// Empty for `read`, which is tracked on account counters instead.
    pub fn action_types(&self) -> &'static [ActionType] {
        match self {
            ActionClass::Like => &[ActionType::Like],
            ActionClass::Retweet => &[ActionType::Retweet],
            ActionClass::Post => &[ActionType::Reply, ActionType::Quote, ActionType::CreatePost],
            ActionClass::Follow => &[ActionType::Follow],
            ActionClass::Dm => &[ActionType::DirectMessage],
            ActionClass::ProfileUpdate => &[ActionType::UpdateProfile],
            ActionClass::Read => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Like => "like",
            ActionClass::Retweet => "retweet",
            ActionClass::Post => "post",
            ActionClass::Follow => "follow",
            ActionClass::Dm => "dm",
            ActionClass::ProfileUpdate => "profile_update",
            ActionClass::Read => "read",
        }
    }
}

impl std::fmt::Display for ActionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "api_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApiMethod {
    #[default]
    Graphql,
    Rest,
}

// ============================================================================
// Action Model
// ============================================================================

const COLUMNS: &str = "id, account_id, job_id, action_type, api_method, target_id, status, \
    error_message, rate_limit_reset, rate_limit_remaining, meta, created_at, executed_at";

/// Rate-limit metadata reported by the platform on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitHint {
    pub reset: Option<DateTime<Utc>>,
    pub remaining: Option<i32>,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Action {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,
    pub account_id: Uuid,
    #[builder(default, setter(strip_option))]
    pub job_id: Option<Uuid>,
    pub action_type: ActionType,
    #[builder(default)]
    pub api_method: ApiMethod,
    #[builder(default, setter(strip_option))]
    pub target_id: Option<String>,
    #[builder(default)]
    pub status: ActionStatus,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,
    #[builder(default, setter(strip_option))]
    pub rate_limit_reset: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub rate_limit_remaining: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub meta: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Parameters for recording a new attempt.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewAction {
    pub account_id: Uuid,
    #[builder(default, setter(strip_option))]
    pub job_id: Option<Uuid>,
    pub action_type: ActionType,
    #[builder(default)]
    pub api_method: ApiMethod,
    #[builder(default, setter(strip_option))]
    pub target_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub meta: Option<serde_json::Value>,
}

/// Result of a dedup-aware insert.
#[derive(Debug, Clone)]
pub enum ActionInsert {
    /// A new attempt was recorded.
    Created(Action),
    /// The uniqueness invariant matched an existing live or completed row.
    Duplicate(Action),
}

impl ActionInsert {
    pub fn action(&self) -> &Action {
        match self {
            ActionInsert::Created(a) | ActionInsert::Duplicate(a) => a,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ActionInsert::Created(_))
    }
}

impl Action {
    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let action =
            sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM actions WHERE id = $1"))
                .bind(id)
                .fetch_optional(db)
                .await?;

        Ok(action)
    }

    /// Insert a new attempt, mapping the partial unique index onto a typed
    /// duplicate result instead of a raw constraint error.
    pub async fn insert_dedup(new: &NewAction, db: &PgPool) -> Result<ActionInsert> {
        // A completed action on the same target is a duplicate even though
        // the index no longer covers it.
        if let Some(target) = &new.target_id {
            if let Some(existing) = Self::find_existing(
                new.account_id,
                &[new.action_type],
                target,
                db,
            )
            .await?
            {
                return Ok(ActionInsert::Duplicate(existing));
            }
        }

        let inserted = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO actions (
                id, account_id, job_id, action_type, api_method, target_id, status,
                meta, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(new.account_id)
        .bind(new.job_id)
        .bind(new.action_type)
        .bind(new.api_method)
        .bind(&new.target_id)
        .bind(&new.meta)
        .fetch_one(db)
        .await;

        match inserted {
            Ok(action) => Ok(ActionInsert::Created(action)),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("uq_account_action_target") =>
            {
                // Raced with a concurrent insert; surface the winner.
                let target = new.target_id.as_deref().unwrap_or_default();
                let existing =
                    Self::find_existing(new.account_id, &[new.action_type], target, db)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("duplicate action vanished"))?;
                Ok(ActionInsert::Duplicate(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a live or completed action for (account, type, target).
    pub async fn find_existing(
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
        db: &PgPool,
    ) -> Result<Option<Self>> {
        let action = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM actions
            WHERE account_id = $1
              AND action_type = ANY($2)
              AND target_id = $3
              AND status IN ('pending', 'running', 'locked', 'completed')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(account_id)
        .bind(action_types)
        .bind(target_id)
        .fetch_optional(db)
        .await?;

        Ok(action)
    }

    /// Find a completed action for (account, types, target) — the dedup rule.
    pub async fn find_completed(
        account_id: Uuid,
        action_types: &[ActionType],
        target_id: &str,
        db: &PgPool,
    ) -> Result<Option<Self>> {
        let action = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM actions
            WHERE account_id = $1
              AND action_type = ANY($2)
              AND target_id = $3
              AND status = 'completed'
            LIMIT 1
            "#
        ))
        .bind(account_id)
        .bind(action_types)
        .bind(target_id)
        .fetch_optional(db)
        .await?;

        Ok(action)
    }

    /// Non-failed attempts for the account in the given window, newest first.
    pub async fn recent(
        account_id: Uuid,
        action_types: &[ActionType],
        since: DateTime<Utc>,
        db: &PgPool,
    ) -> Result<Vec<Self>> {
        let actions = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM actions
            WHERE account_id = $1
              AND action_type = ANY($2)
              AND created_at >= $3
              AND status != 'failed'
            ORDER BY created_at DESC
            "#
        ))
        .bind(account_id)
        .bind(action_types)
        .bind(since)
        .fetch_all(db)
        .await?;

        Ok(actions)
    }

    pub async fn count_running(
        account_id: Uuid,
        action_types: &[ActionType],
        db: &PgPool,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM actions
            WHERE account_id = $1 AND action_type = ANY($2) AND status = 'running'
            "#,
        )
        .bind(account_id)
        .bind(action_types)
        .fetch_one(db)
        .await?;

        Ok(count)
    }

    pub async fn update_status(
        id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
        rate_limit: Option<RateLimitHint>,
        db: &PgPool,
    ) -> Result<()> {
        let hint = rate_limit.unwrap_or(RateLimitHint {
            reset: None,
            remaining: None,
        });

        sqlx::query(
            r#"
            UPDATE actions
            SET status = $2,
                error_message = $3,
                rate_limit_reset = COALESCE($4, rate_limit_reset),
                rate_limit_remaining = COALESCE($5, rate_limit_remaining),
                executed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled')
                                   THEN NOW() ELSE executed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(hint.reset)
        .bind(hint.remaining)
        .execute(db)
        .await?;

        Ok(())
    }

    /// Demote actions stuck in `running` past the deadline.
    pub async fn expire_stale_running(older_than: DateTime<Utc>, db: &PgPool) -> Result<u64> {
        let expired = sqlx::query(
            r#"
            UPDATE actions
            SET status = 'failed', error_message = 'timeout', executed_at = NOW()
            WHERE status = 'running' AND created_at < $1
            "#,
        )
        .bind(older_than)
        .execute(db)
        .await?
        .rows_affected();

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_class_unions_three_types() {
        let types = ActionClass::Post.action_types();
        assert_eq!(types.len(), 3);
        assert!(types.contains(&ActionType::Reply));
        assert!(types.contains(&ActionType::Quote));
        assert!(types.contains(&ActionType::CreatePost));
    }

    #[test]
    fn every_action_type_maps_into_its_class() {
        for action_type in [
            ActionType::Like,
            ActionType::Retweet,
            ActionType::Reply,
            ActionType::Quote,
            ActionType::CreatePost,
            ActionType::Follow,
            ActionType::DirectMessage,
            ActionType::UpdateProfile,
        ] {
            assert!(action_type.class().action_types().contains(&action_type));
        }
    }

    #[test]
    fn read_class_has_no_action_history() {
        assert!(ActionClass::Read.action_types().is_empty());
    }

    #[test]
    fn live_statuses_match_the_partial_index() {
        assert!(ActionStatus::Pending.is_live());
        assert!(ActionStatus::Running.is_live());
        assert!(ActionStatus::Locked.is_live());
        assert!(!ActionStatus::Completed.is_live());
        assert!(!ActionStatus::Failed.is_live());
        assert!(!ActionStatus::Cancelled.is_live());
    }

    #[test]
    fn action_insert_exposes_the_winning_row() {
        let action = Action::builder()
            .account_id(Uuid::new_v4())
            .action_type(ActionType::Like)
            .target_id("123".to_string())
            .build();

        let dup = ActionInsert::Duplicate(action.clone());
        assert!(!dup.is_created());
        assert_eq!(dup.action().id, action.id);
    }
}
