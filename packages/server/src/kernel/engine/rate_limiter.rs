//! Per-account, per-action-class admission control.
//!
//! Decisions are computed from durable action history (mutating classes)
//! or the account's sliding request counters (read class). Windows are
//! sliding, evaluated at decision time in UTC.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    action::{ActionInsert, ActionStatus, ActionType, NewAction, RateLimitHint},
    Account, ActionClass, ApiMethod,
};

use super::store::JobStore;

// ============================================================================
// Configuration
// ============================================================================

/// Budget for one action class on one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLimits {
    pub per_15min: u32,
    pub per_hour: u32,
    pub per_day: u32,
    pub min_interval_secs: i64,
    /// Concurrent in-flight cap; `None` means unbounded.
    pub max_parallel: Option<u32>,
}

impl ClassLimits {
    const fn engagement(per_day: u32) -> Self {
        Self {
            per_15min: 1,
            per_hour: 4,
            per_day,
            min_interval_secs: 900,
            max_parallel: Some(1),
        }
    }
}

/// Per-class limits, keyed by [`ActionClass`].
#[derive(Debug, Clone)]
pub struct RateLimitTable {
    limits: HashMap<ActionClass, ClassLimits>,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(ActionClass::Like, ClassLimits::engagement(96));
        limits.insert(ActionClass::Retweet, ClassLimits::engagement(96));
        // Reply, quote and create_post share this budget.
        limits.insert(ActionClass::Post, ClassLimits::engagement(16));
        limits.insert(ActionClass::Follow, ClassLimits::engagement(50));
        limits.insert(ActionClass::Dm, ClassLimits::engagement(1000));
        limits.insert(
            ActionClass::ProfileUpdate,
            ClassLimits {
                per_15min: 4,
                per_hour: 16,
                per_day: 100,
                min_interval_secs: 300,
                max_parallel: Some(1),
            },
        );
        limits.insert(
            ActionClass::Read,
            ClassLimits {
                per_15min: 900,
                per_hour: 3600,
                per_day: 100_000,
                min_interval_secs: 0,
                max_parallel: None,
            },
        );
        Self { limits }
    }
}

impl RateLimitTable {
    pub fn get(&self, class: ActionClass) -> ClassLimits {
        // Every class is present in the default table; overrides replace,
        // never remove.
        self.limits[&class]
    }

    /// Replace the limits for one class.
    pub fn set(&mut self, class: ActionClass, limits: ClassLimits) -> &mut Self {
        self.limits.insert(class, limits);
        self
    }

    /// Apply per-class overrides from the environment.
    ///
    /// Recognised keys: `LIMIT_<CLASS>_PER_15MIN`, `LIMIT_<CLASS>_PER_HOUR`,
    /// `LIMIT_<CLASS>_PER_DAY`, `LIMIT_<CLASS>_MIN_INTERVAL` — e.g.
    /// `LIMIT_POST_PER_DAY=20`. Unset keys keep the defaults.
    pub fn with_env_overrides(mut self) -> Self {
        let classes = [
            ActionClass::Like,
            ActionClass::Retweet,
            ActionClass::Post,
            ActionClass::Follow,
            ActionClass::Dm,
            ActionClass::ProfileUpdate,
            ActionClass::Read,
        ];

        let read_var = |class: ActionClass, suffix: &str| -> Option<u32> {
            let key = format!(
                "LIMIT_{}_{}",
                class.as_str().to_ascii_uppercase(),
                suffix
            );
            std::env::var(key).ok()?.parse().ok()
        };

        for class in classes {
            let mut limits = self.limits[&class];
            if let Some(v) = read_var(class, "PER_15MIN") {
                limits.per_15min = v;
            }
            if let Some(v) = read_var(class, "PER_HOUR") {
                limits.per_hour = v;
            }
            if let Some(v) = read_var(class, "PER_DAY") {
                limits.per_day = v;
            }
            if let Some(v) = read_var(class, "MIN_INTERVAL") {
                limits.min_interval_secs = v as i64;
            }
            self.limits.insert(class, limits);
        }

        self
    }

    /// Derive the read budget from scheduler settings.
    pub fn with_read_budget(mut self, per_15min: i32, interval_secs: i64) -> Self {
        let per_15min = per_15min.max(1) as u32;
        let per_day = if interval_secs > 0 {
            (per_15min as i64 * (24 * 60 * 60) / (15 * 60)).min(1_000_000) as u32
        } else {
            100_000
        };
        self.limits.insert(
            ActionClass::Read,
            ClassLimits {
                per_15min,
                per_hour: per_15min.saturating_mul(4),
                per_day,
                min_interval_secs: 0,
                max_parallel: None,
            },
        );
        self
    }
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    FifteenMin,
    Hour,
    Day,
}

impl WindowKind {
    pub fn duration(&self) -> Duration {
        match self {
            WindowKind::FifteenMin => Duration::minutes(15),
            WindowKind::Hour => Duration::hours(1),
            WindowKind::Day => Duration::hours(24),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WindowKind::FifteenMin => "15-minute",
            WindowKind::Hour => "hourly",
            WindowKind::Day => "daily",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    /// A completed action already exists for this (account, class, target).
    Duplicate,
    /// Too soon after the previous action in this class.
    MinInterval,
    /// The in-flight cap for this class is reached.
    TooManyInFlight,
    /// A sliding window is full.
    Window(WindowKind),
    /// The account's read request budget is exhausted.
    RequestBudget(WindowKind),
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Duplicate => f.write_str("duplicate"),
            DenyReason::MinInterval => f.write_str("minimum interval not elapsed"),
            DenyReason::TooManyInFlight => f.write_str("too many in flight"),
            DenyReason::Window(w) => write!(f, "{} rate limit exceeded", w.label()),
            DenyReason::RequestBudget(w) => write!(f, "{} request budget exhausted", w.label()),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed,
    Denied {
        reason: DenyReason,
        retry_at: Option<DateTime<Utc>>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    fn denied(reason: DenyReason, retry_at: Option<DateTime<Utc>>) -> Self {
        Decision::Denied { reason, retry_at }
    }
}

/// Usage snapshot for one (account, class), for the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub class: ActionClass,
    pub used_15min: u32,
    pub used_hour: u32,
    pub used_day: u32,
    pub remaining_15min: u32,
    pub remaining_hour: u32,
    pub remaining_day: u32,
    pub next_reset_15min: Option<DateTime<Utc>>,
    pub next_reset_day: Option<DateTime<Utc>>,
}

// ============================================================================
// RateLimiter
// ============================================================================

pub struct RateLimiter {
    store: Arc<dyn JobStore>,
    table: RateLimitTable,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn JobStore>, table: RateLimitTable) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// Decide whether `account` may start a `class` action now.
    ///
    /// Checks run in a fixed order: duplicate target, minimum spacing,
    /// in-flight cap, then the 15-minute / hourly / daily sliding windows.
    /// For the post class every window counts reply, quote and create_post
    /// together.
    pub async fn check_allowed(
        &self,
        account: &Account,
        class: ActionClass,
        target: Option<&str>,
    ) -> Result<Decision> {
        let limits = self.table.get(class);
        let now = Utc::now();

        if class == ActionClass::Read {
            return Ok(self.check_read_budget(account, &limits, now));
        }

        let types = class.action_types();

        // 1. Duplicate target.
        if let Some(target) = target {
            if self
                .store
                .find_completed_action(account.id, types, target)
                .await?
                .is_some()
            {
                debug!(account_no = %account.account_no, %class, target, "duplicate action denied");
                return Ok(Decision::denied(DenyReason::Duplicate, None));
            }
        }

        let since = now - Duration::hours(24);
        let recent = self.store.recent_actions(account.id, types, since).await?;

        // Platform-reported reset can push any computed retry time out.
        let reported_reset = recent
            .iter()
            .filter_map(|a| a.rate_limit_reset)
            .max()
            .filter(|reset| *reset > now);
        let elevate = |computed: Option<DateTime<Utc>>| -> Option<DateTime<Utc>> {
            match (computed, reported_reset) {
                (Some(c), Some(r)) => Some(c.max(r)),
                (c, r) => c.or(r),
            }
        };

        // 2. Minimum spacing since the last non-failed attempt.
        if limits.min_interval_secs > 0 {
            if let Some(last) = recent.first() {
                let elapsed = now - last.created_at;
                if elapsed < Duration::seconds(limits.min_interval_secs) {
                    let retry_at =
                        last.created_at + Duration::seconds(limits.min_interval_secs);
                    return Ok(Decision::denied(
                        DenyReason::MinInterval,
                        elevate(Some(retry_at)),
                    ));
                }
            }
        }

        // 3. In-flight cap.
        if let Some(cap) = limits.max_parallel {
            let running = self.store.count_running_actions(account.id, types).await?;
            if running >= cap as i64 {
                return Ok(Decision::denied(DenyReason::TooManyInFlight, None));
            }
        }

        // 4. Sliding windows, shortest first.
        for (window, cap) in [
            (WindowKind::FifteenMin, limits.per_15min),
            (WindowKind::Hour, limits.per_hour),
            (WindowKind::Day, limits.per_day),
        ] {
            let start = now - window.duration();
            let in_window: Vec<_> = recent.iter().filter(|a| a.created_at >= start).collect();
            if in_window.len() >= cap as usize {
                let oldest = in_window
                    .iter()
                    .map(|a| a.created_at)
                    .min()
                    .unwrap_or(now);
                let retry_at = oldest + window.duration();
                return Ok(Decision::denied(
                    DenyReason::Window(window),
                    elevate(Some(retry_at)),
                ));
            }
        }

        Ok(Decision::Allowed)
    }

    /// Read traffic is budgeted on the account's sliding request counters.
    fn check_read_budget(
        &self,
        account: &Account,
        limits: &ClassLimits,
        now: DateTime<Utc>,
    ) -> Decision {
        if account.requests_15min >= limits.per_15min as i32 {
            let retry_at = account
                .last_rate_limit_reset
                .map(|t| t + Duration::minutes(15))
                .filter(|t| *t > now);
            return Decision::denied(
                DenyReason::RequestBudget(WindowKind::FifteenMin),
                retry_at,
            );
        }
        if account.requests_24h >= limits.per_day as i32 {
            let retry_at = account
                .last_24h_reset
                .map(|t| t + Duration::hours(24))
                .filter(|t| *t > now);
            return Decision::denied(DenyReason::RequestBudget(WindowKind::Day), retry_at);
        }
        Decision::Allowed
    }

    /// Record a new attempt as a pending action row.
    ///
    /// Duplicates resolve to the existing row; the caller decides whether
    /// that is an idempotent success or a bug.
    pub async fn record_attempt(
        &self,
        account_id: Uuid,
        job_id: Option<Uuid>,
        action_type: ActionType,
        api_method: ApiMethod,
        target: Option<&str>,
        meta: Option<serde_json::Value>,
    ) -> Result<ActionInsert> {
        let new = NewAction {
            account_id,
            job_id,
            action_type,
            api_method,
            target_id: target.map(str::to_string),
            meta,
        };

        self.store.create_action(new).await
    }

    /// Terminal (or running) transition with optional platform hints.
    pub async fn update_status(
        &self,
        action_id: Uuid,
        status: ActionStatus,
        error: Option<&str>,
        rate_limit: Option<RateLimitHint>,
    ) -> Result<()> {
        self.store
            .update_action(action_id, status, error, rate_limit)
            .await
    }

    /// Demote actions stuck in `running` for over an hour.
    pub async fn cleanup(&self) -> Result<u64> {
        let expired = self
            .store
            .expire_stale_running(Utc::now() - Duration::hours(1))
            .await?;
        if expired > 0 {
            info!(expired, "expired stale running actions");
        }
        Ok(expired)
    }

    /// Usage snapshot for the accounts surface.
    pub async fn status(&self, account: &Account, class: ActionClass) -> Result<RateLimitStatus> {
        let limits = self.table.get(class);
        let now = Utc::now();

        if class == ActionClass::Read {
            return Ok(RateLimitStatus {
                class,
                used_15min: account.requests_15min.max(0) as u32,
                used_hour: account.requests_15min.max(0) as u32,
                used_day: account.requests_24h.max(0) as u32,
                remaining_15min: limits
                    .per_15min
                    .saturating_sub(account.requests_15min.max(0) as u32),
                remaining_hour: limits
                    .per_hour
                    .saturating_sub(account.requests_15min.max(0) as u32),
                remaining_day: limits
                    .per_day
                    .saturating_sub(account.requests_24h.max(0) as u32),
                next_reset_15min: account.last_rate_limit_reset.map(|t| t + Duration::minutes(15)),
                next_reset_day: account.last_24h_reset.map(|t| t + Duration::hours(24)),
            });
        }

        let recent = self
            .store
            .recent_actions(account.id, class.action_types(), now - Duration::hours(24))
            .await?;

        let count_in = |window: WindowKind| {
            recent
                .iter()
                .filter(|a| a.created_at >= now - window.duration())
                .count() as u32
        };
        let oldest_in = |window: WindowKind| {
            recent
                .iter()
                .filter(|a| a.created_at >= now - window.duration())
                .map(|a| a.created_at)
                .min()
                .map(|t| t + window.duration())
        };

        let used_15min = count_in(WindowKind::FifteenMin);
        let used_hour = count_in(WindowKind::Hour);
        let used_day = count_in(WindowKind::Day);

        Ok(RateLimitStatus {
            class,
            used_15min,
            used_hour,
            used_day,
            remaining_15min: limits.per_15min.saturating_sub(used_15min),
            remaining_hour: limits.per_hour.saturating_sub(used_hour),
            remaining_day: limits.per_day.saturating_sub(used_day),
            next_reset_15min: oldest_in(WindowKind::FifteenMin),
            next_reset_day: oldest_in(WindowKind::Day),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::engine::testing::{worker_account, MemoryJobStore};
    use crate::models::action::ActionStatus;

    fn limiter(store: Arc<MemoryJobStore>) -> RateLimiter {
        RateLimiter::new(store, RateLimitTable::default())
    }

    /// A limiter whose post class has no spacing, for daily-cap tests.
    fn limiter_no_spacing(store: Arc<MemoryJobStore>) -> RateLimiter {
        let mut table = RateLimitTable::default();
        table.set(
            ActionClass::Post,
            ClassLimits {
                per_15min: 100,
                per_hour: 100,
                per_day: 16,
                min_interval_secs: 0,
                max_parallel: Some(100),
            },
        );
        RateLimiter::new(store, table)
    }

    async fn record_completed(
        store: &MemoryJobStore,
        limiter: &RateLimiter,
        account_id: Uuid,
        action_type: ActionType,
        target: &str,
        age: Duration,
    ) {
        let insert = limiter
            .record_attempt(account_id, None, action_type, ApiMethod::Graphql, Some(target), None)
            .await
            .unwrap();
        let id = insert.action().id;
        limiter
            .update_status(id, ActionStatus::Completed, None, None)
            .await
            .unwrap();
        store.backdate_action(id, Utc::now() - age).await;
    }

    #[tokio::test]
    async fn fresh_account_is_allowed() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;

        let limiter = limiter(store);
        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("123"))
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn completed_target_is_a_duplicate() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        record_completed(
            &store,
            &limiter,
            account.id,
            ActionType::Like,
            "123",
            Duration::hours(2),
        )
        .await;

        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("123"))
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Denied {
                reason: DenyReason::Duplicate,
                retry_at: None
            }
        );
    }

    #[tokio::test]
    async fn min_interval_denies_with_retry_time() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        // 5 minutes ago — inside the 900 s spacing.
        record_completed(
            &store,
            &limiter,
            account.id,
            ActionType::Like,
            "1",
            Duration::minutes(5),
        )
        .await;

        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("2"))
            .await
            .unwrap();
        match decision {
            Decision::Denied {
                reason: DenyReason::MinInterval,
                retry_at: Some(retry_at),
            } => {
                let wait = retry_at - Utc::now();
                assert!(wait > Duration::minutes(9) && wait <= Duration::minutes(10));
            }
            other => panic!("expected min-interval denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn running_action_blocks_parallel_dispatch() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        let insert = limiter
            .record_attempt(
                account.id,
                None,
                ActionType::Like,
                ApiMethod::Graphql,
                Some("1"),
                None,
            )
            .await
            .unwrap();
        limiter
            .update_status(insert.action().id, ActionStatus::Running, None, None)
            .await
            .unwrap();
        // Push the attempt outside the spacing window so the parallel cap
        // is what trips.
        store
            .backdate_action(insert.action().id, Utc::now() - Duration::minutes(20))
            .await;

        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("2"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Denied {
                reason: DenyReason::TooManyInFlight,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn post_daily_budget_is_shared_across_types() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter_no_spacing(store.clone());

        // 16 posts spread over reply/quote/create within the last day.
        let types = [ActionType::Reply, ActionType::Quote, ActionType::CreatePost];
        for i in 0..16 {
            record_completed(
                &store,
                &limiter,
                account.id,
                types[i % 3],
                &format!("t{i}"),
                Duration::hours(2),
            )
            .await;
        }

        let decision = limiter
            .check_allowed(&account, ActionClass::Post, Some("t-new"))
            .await
            .unwrap();
        match decision {
            Decision::Denied {
                reason: DenyReason::Window(WindowKind::Day),
                retry_at: Some(retry_at),
            } => {
                // Reset when the oldest post ages out of the 24h window.
                assert!(retry_at <= Utc::now() + Duration::hours(24));
            }
            other => panic!("expected daily window denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn window_denial_points_at_oldest_plus_window() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        // One like 16 minutes ago: outside spacing and the 15m window,
        // but the hourly window (cap 4) is not the binding constraint yet.
        record_completed(
            &store,
            &limiter,
            account.id,
            ActionType::Like,
            "1",
            Duration::minutes(16),
        )
        .await;
        assert!(limiter
            .check_allowed(&account, ActionClass::Like, Some("2"))
            .await
            .unwrap()
            .is_allowed());

        // Fill the hourly window.
        for (i, age) in [20i64, 30, 40].into_iter().enumerate() {
            record_completed(
                &store,
                &limiter,
                account.id,
                ActionType::Like,
                &format!("h{i}"),
                Duration::minutes(age),
            )
            .await;
        }

        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("2"))
            .await
            .unwrap();
        match decision {
            Decision::Denied {
                reason: DenyReason::Window(WindowKind::Hour),
                retry_at: Some(retry_at),
            } => {
                // Oldest of the four is ~40 min old; retry ~20 min out.
                let wait = retry_at - Utc::now();
                assert!(wait > Duration::minutes(15) && wait <= Duration::minutes(20));
            }
            other => panic!("expected hourly denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn platform_reported_reset_elevates_retry_time() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        let reported = Utc::now() + Duration::minutes(45);
        let insert = limiter
            .record_attempt(
                account.id,
                None,
                ActionType::Like,
                ApiMethod::Graphql,
                Some("1"),
                None,
            )
            .await
            .unwrap();
        limiter
            .update_status(
                insert.action().id,
                ActionStatus::Completed,
                None,
                Some(RateLimitHint {
                    reset: Some(reported),
                    remaining: Some(0),
                }),
            )
            .await
            .unwrap();
        store
            .backdate_action(insert.action().id, Utc::now() - Duration::minutes(5))
            .await;

        let decision = limiter
            .check_allowed(&account, ActionClass::Like, Some("2"))
            .await
            .unwrap();
        match decision {
            Decision::Denied {
                retry_at: Some(retry_at),
                ..
            } => assert_eq!(retry_at, reported),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_budget_uses_account_counters() {
        let store = MemoryJobStore::shared();
        let mut account = worker_account("WRK-1");
        account.requests_15min = 900;
        account.last_rate_limit_reset = Some(Utc::now() - Duration::minutes(5));
        store.put_account(account.clone()).await;

        let limiter = limiter(store);
        let decision = limiter
            .check_allowed(&account, ActionClass::Read, None)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Denied {
                reason: DenyReason::RequestBudget(WindowKind::FifteenMin),
                retry_at: Some(_)
            }
        ));
    }

    #[tokio::test]
    async fn cleanup_times_out_hour_old_running_actions() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-1");
        store.put_account(account.clone()).await;
        let limiter = limiter(store.clone());

        let insert = limiter
            .record_attempt(
                account.id,
                None,
                ActionType::Follow,
                ApiMethod::Graphql,
                Some("bob"),
                None,
            )
            .await
            .unwrap();
        limiter
            .update_status(insert.action().id, ActionStatus::Running, None, None)
            .await
            .unwrap();
        store
            .backdate_action(insert.action().id, Utc::now() - Duration::hours(2))
            .await;

        assert_eq!(limiter.cleanup().await.unwrap(), 1);

        let actions = store.all_actions().await;
        assert_eq!(actions[0].status, ActionStatus::Failed);
        assert_eq!(actions[0].error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn default_table_matches_policy() {
        let table = RateLimitTable::default();
        assert_eq!(table.get(ActionClass::Post).per_day, 16);
        assert_eq!(table.get(ActionClass::Follow).per_day, 50);
        assert_eq!(table.get(ActionClass::Dm).per_day, 1000);
        assert_eq!(table.get(ActionClass::ProfileUpdate).min_interval_secs, 300);
        assert_eq!(table.get(ActionClass::Read).max_parallel, None);
    }

    #[test]
    fn read_budget_derivation() {
        let table = RateLimitTable::default().with_read_budget(900, 1);
        let read = table.get(ActionClass::Read);
        assert_eq!(read.per_15min, 900);
        assert_eq!(read.per_day, 86_400);
    }

    #[test]
    fn env_overrides_replace_single_fields() {
        std::env::set_var("LIMIT_POST_PER_DAY", "20");
        std::env::set_var("LIMIT_FOLLOW_MIN_INTERVAL", "600");
        let table = RateLimitTable::default().with_env_overrides();
        std::env::remove_var("LIMIT_POST_PER_DAY");
        std::env::remove_var("LIMIT_FOLLOW_MIN_INTERVAL");

        assert_eq!(table.get(ActionClass::Post).per_day, 20);
        // Untouched fields keep their defaults.
        assert_eq!(table.get(ActionClass::Post).per_15min, 1);
        assert_eq!(table.get(ActionClass::Follow).min_interval_secs, 600);
    }
}
