//! Worker account pool: eligibility, health, activation.
//!
//! The pool owns the in-memory set of active (reserved) workers. Durable
//! worker state lives on account rows; the store hands out candidates with
//! skip-locked selection and the pool filters them through health and
//! rate-limit checks before activating.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Account, ActionClass, ValidationState};

use super::rate_limiter::{Decision, RateLimiter};
use super::store::JobStore;

/// How many candidates to pull per requested worker. Health and rate-limit
/// filters discard some.
const OVERSAMPLE: usize = 4;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Cap on the in-memory active set.
    pub max_concurrent_workers: usize,
    /// 15-minute request ceiling above which activation is forbidden.
    pub max_requests_per_worker: i32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 12,
            max_requests_per_worker: 900,
        }
    }
}

/// Why a pinned worker could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No such account row.
    NotFound,
    /// Fails the dispatchability invariant.
    NotDispatchable,
    /// Failed the health check and was quarantined.
    Stale,
    /// 15-minute request budget spent.
    BudgetSpent,
    /// Already active, or the active set is full.
    Busy,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NotFound => f.write_str("account not found"),
            UnavailableReason::NotDispatchable => f.write_str("account not dispatchable"),
            UnavailableReason::Stale => f.write_str("account stale"),
            UnavailableReason::BudgetSpent => f.write_str("request budget spent"),
            UnavailableReason::Busy => f.write_str("worker busy"),
        }
    }
}

/// Outcome of reserving a specific (pinned) worker.
#[derive(Debug)]
pub enum Reservation {
    Ready(Account),
    /// Admission denied by the rate limiter; carries the decision.
    RateLimited(Decision),
    /// Not dispatchable, unhealthy, busy, or the active set is full.
    Unavailable(UnavailableReason),
}

/// Summary of one rotation pass.
#[derive(Debug, Clone)]
pub struct RotationReport {
    pub deactivated: Vec<Uuid>,
    pub active: usize,
    pub capacity: usize,
}

pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    limiter: Arc<RateLimiter>,
    config: WorkerPoolConfig,
    active: Mutex<HashSet<Uuid>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        limiter: Arc<RateLimiter>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            config,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn is_active(&self, id: Uuid) -> bool {
        self.active.lock().await.contains(&id)
    }

    /// Up to `count` workers that are dispatchable, healthy, admissible for
    /// `class`, and not already active. Selected workers are activated and
    /// their `last_task_time` refreshed.
    pub async fn get_available(&self, class: ActionClass, count: usize) -> Result<Vec<Account>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .lock_eligible_workers((count * OVERSAMPLE).max(16) as i64)
            .await?;

        let now = Utc::now();
        let mut selected = Vec::new();
        for account in candidates {
            if selected.len() >= count {
                break;
            }

            if account.is_stale(now) {
                self.quarantine(&account).await?;
                continue;
            }
            if account.requests_15min >= self.config.max_requests_per_worker {
                continue;
            }
            if !self
                .limiter
                .check_allowed(&account, class, None)
                .await?
                .is_allowed()
            {
                continue;
            }
            if !self.try_activate(account.id).await {
                continue;
            }

            selected.push(account);
        }

        if !selected.is_empty() {
            let ids: Vec<Uuid> = selected.iter().map(|a| a.id).collect();
            self.store.touch_last_task(&ids).await?;
            debug!(count = selected.len(), %class, "activated workers");
        }

        Ok(selected)
    }

    /// Reserve one specific worker for a pinned mutating job.
    pub async fn reserve(
        &self,
        account_id: Uuid,
        class: ActionClass,
        target: Option<&str>,
    ) -> Result<Reservation> {
        let Some(account) = self.store.find_account(account_id).await? else {
            return Ok(Reservation::Unavailable(UnavailableReason::NotFound));
        };

        let now = Utc::now();
        if !account.is_dispatchable(now) {
            return Ok(Reservation::Unavailable(UnavailableReason::NotDispatchable));
        }
        if account.is_stale(now) {
            self.quarantine(&account).await?;
            return Ok(Reservation::Unavailable(UnavailableReason::Stale));
        }
        if account.requests_15min >= self.config.max_requests_per_worker {
            return Ok(Reservation::Unavailable(UnavailableReason::BudgetSpent));
        }

        let decision = self.limiter.check_allowed(&account, class, target).await?;
        if !decision.is_allowed() {
            return Ok(Reservation::RateLimited(decision));
        }

        if !self.try_activate(account.id).await {
            return Ok(Reservation::Unavailable(UnavailableReason::Busy));
        }

        self.store.touch_last_task(&[account.id]).await?;
        Ok(Reservation::Ready(account))
    }

    /// Return a worker to the idle pool.
    pub async fn release(&self, id: Uuid) {
        self.active.lock().await.remove(&id);
    }

    /// Remove from the active set and durably deactivate the account.
    pub async fn deactivate(&self, id: Uuid) -> Result<()> {
        self.release(id).await;
        self.store.set_account_active(id, false).await
    }

    /// Deactivate with validation reset, for auth failures.
    pub async fn deactivate_for_revalidation(&self, id: Uuid) -> Result<()> {
        self.deactivate(id).await?;
        self.store
            .set_validation_state(id, ValidationState::Pending)
            .await
    }

    /// Deactivate an unhealthy worker encountered during selection.
    async fn quarantine(&self, account: &Account) -> Result<()> {
        warn!(
            account_no = %account.account_no,
            last_task_time = ?account.last_task_time,
            "worker unhealthy, deactivating"
        );
        self.deactivate(account.id).await
    }

    async fn try_activate(&self, id: Uuid) -> bool {
        let mut active = self.active.lock().await;
        if active.contains(&id) || active.len() >= self.config.max_concurrent_workers {
            return false;
        }
        active.insert(id);
        true
    }

    /// Drop unhealthy or no-longer-dispatchable workers from the active
    /// set. Runs from the periodic monitor.
    pub async fn rotate(&self) -> Result<RotationReport> {
        let now = Utc::now();
        let active_ids: Vec<Uuid> = self.active.lock().await.iter().copied().collect();

        let mut deactivated = Vec::new();
        for id in active_ids {
            let keep = match self.store.find_account(id).await? {
                Some(account) => account.is_dispatchable(now) && !account.is_stale(now),
                None => false,
            };
            if !keep {
                self.deactivate(id).await?;
                deactivated.push(id);
            }
        }

        Ok(RotationReport {
            deactivated,
            active: self.active.lock().await.len(),
            capacity: self.config.max_concurrent_workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::engine::rate_limiter::RateLimitTable;
    use crate::kernel::engine::testing::{worker_account, MemoryJobStore};
    use chrono::Duration;

    fn pool_with(
        store: Arc<MemoryJobStore>,
        config: WorkerPoolConfig,
    ) -> WorkerPool {
        let limiter = Arc::new(RateLimiter::new(store.clone(), RateLimitTable::default()));
        WorkerPool::new(store, limiter, config)
    }

    #[tokio::test]
    async fn selects_up_to_count_workers() {
        let store = MemoryJobStore::shared();
        for i in 0..4 {
            store.put_account(worker_account(&format!("WRK-{i}"))).await;
        }

        let pool = pool_with(store, WorkerPoolConfig::default());
        let workers = pool.get_available(ActionClass::Read, 2).await.unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(pool.active_count().await, 2);
    }

    #[tokio::test]
    async fn active_workers_are_not_reselected() {
        let store = MemoryJobStore::shared();
        store.put_account(worker_account("WRK-0")).await;

        let pool = pool_with(store, WorkerPoolConfig::default());
        let first = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert!(second.is_empty());

        pool.release(first[0].id).await;
        let third = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn activation_cap_is_enforced() {
        let store = MemoryJobStore::shared();
        for i in 0..5 {
            store.put_account(worker_account(&format!("WRK-{i}"))).await;
        }

        let config = WorkerPoolConfig {
            max_concurrent_workers: 3,
            ..WorkerPoolConfig::default()
        };
        let pool = pool_with(store, config);
        let workers = pool.get_available(ActionClass::Read, 5).await.unwrap();
        assert_eq!(workers.len(), 3);
    }

    #[tokio::test]
    async fn stale_worker_is_quarantined() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-0");
        let id = account.id;
        store.put_account(account).await;
        store
            .backdate_last_task(id, Utc::now() - Duration::minutes(45))
            .await;

        let pool = pool_with(store.clone(), WorkerPoolConfig::default());
        let workers = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert!(workers.is_empty());

        // Durably deactivated.
        let account = store.find_account(id).await.unwrap().unwrap();
        assert!(!account.is_active);
    }

    #[tokio::test]
    async fn over_budget_worker_is_skipped() {
        let store = MemoryJobStore::shared();
        let mut account = worker_account("WRK-0");
        account.requests_15min = 900;
        store.put_account(account).await;

        let pool = pool_with(store, WorkerPoolConfig::default());
        let workers = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn reserve_pinned_worker() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-0");
        let id = account.id;
        store.put_account(account).await;

        let pool = pool_with(store, WorkerPoolConfig::default());
        match pool.reserve(id, ActionClass::Like, Some("123")).await.unwrap() {
            Reservation::Ready(worker) => assert_eq!(worker.id, id),
            other => panic!("expected ready, got {other:?}"),
        }

        // Second reserve while busy fails.
        match pool.reserve(id, ActionClass::Like, Some("456")).await.unwrap() {
            Reservation::Unavailable(reason) => assert_eq!(reason, UnavailableReason::Busy),
            other => panic!("expected busy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rotate_drops_stale_actives() {
        let store = MemoryJobStore::shared();
        let account = worker_account("WRK-0");
        let id = account.id;
        store.put_account(account).await;

        let pool = pool_with(store.clone(), WorkerPoolConfig::default());
        let selected = pool.get_available(ActionClass::Read, 1).await.unwrap();
        assert_eq!(selected.len(), 1);

        store
            .backdate_last_task(id, Utc::now() - Duration::minutes(45))
            .await;

        let report = pool.rotate().await.unwrap();
        assert_eq!(report.deactivated, vec![id]);
        assert_eq!(report.active, 0);
        assert_eq!(pool.active_count().await, 0);
    }
}
