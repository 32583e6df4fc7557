//! Worker account listing and rate-limit status.

use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::kernel::engine::RateLimitStatus;
use crate::kernel::Kernel;
use crate::models::{Account, AccountKind, ActionClass, OauthState, ValidationState};
use crate::server::error::{ApiError, ApiResult};

/// Account projection for the API. Credentials never leave the store.
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: Uuid,
    pub account_no: String,
    pub kind: AccountKind,
    pub login: Option<String>,
    pub is_active: bool,
    pub total_completed: i32,
    pub total_failed: i32,
    pub requests_15min: i32,
    pub requests_24h: i32,
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub last_task_time: Option<DateTime<Utc>>,
    pub validation_state: ValidationState,
    pub oauth_state: OauthState,
    pub recovery_attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            account_no: account.account_no,
            kind: account.kind,
            login: account.login,
            is_active: account.is_active,
            total_completed: account.total_completed,
            total_failed: account.total_failed,
            requests_15min: account.requests_15min,
            requests_24h: account.requests_24h,
            rate_limited_until: account.rate_limited_until,
            last_task_time: account.last_task_time,
            validation_state: account.validation_state,
            oauth_state: account.oauth_state,
            recovery_attempts: account.recovery_attempts,
            created_at: account.created_at,
        }
    }
}

/// GET /accounts
pub async fn list_accounts(
    Extension(kernel): Extension<Kernel>,
) -> ApiResult<Json<Vec<AccountView>>> {
    let accounts = kernel.store.list_accounts().await?;
    Ok(Json(accounts.into_iter().map(AccountView::from).collect()))
}

/// GET /accounts/{id}/limits — usage across every action class.
pub async fn account_limits(
    Extension(kernel): Extension<Kernel>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<RateLimitStatus>>> {
    let account = kernel
        .store
        .find_account(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let classes = [
        ActionClass::Like,
        ActionClass::Retweet,
        ActionClass::Post,
        ActionClass::Follow,
        ActionClass::Dm,
        ActionClass::ProfileUpdate,
        ActionClass::Read,
    ];

    let mut statuses = Vec::with_capacity(classes.len());
    for class in classes {
        statuses.push(kernel.manager.limiter().status(&account, class).await?);
    }

    Ok(Json(statuses))
}
