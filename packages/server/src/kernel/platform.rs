//! The outbound platform seam.
//!
//! The orchestrator never speaks the platform's wire protocol itself; it
//! calls one [`PlatformClient`] method per operation and interprets typed
//! errors. Protocol adapters implement this trait out of tree; tests use
//! the scripted double in [`crate::kernel::engine::testing`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Account, ApiMethod, ProfileUpdateParams};

/// Errors surfaced by a platform adapter, already classified.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The platform throttled the account. `retry_after_secs` comes from
    /// the response when present.
    #[error("rate limited")]
    RateLimited {
        retry_after_secs: Option<i64>,
        remaining: Option<i32>,
    },

    /// Credentials rejected (401/403 or structured equivalent).
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Target does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform refused the request for business reasons
    /// (suspended target, invalid media, duplicate content, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network failure, 5xx, or a mangled response worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The adapter-level call deadline elapsed.
    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl PlatformError {
    /// Whether a retry on the same or another worker can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. }
                | PlatformError::Transient(_)
                | PlatformError::Timeout(_)
        )
    }

    /// Classify a bare HTTP status the way the dispatch loop expects.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => PlatformError::RateLimited {
                retry_after_secs: None,
                remaining: None,
            },
            401 | 403 => PlatformError::Auth(body),
            404 => PlatformError::NotFound(body),
            500..=599 => PlatformError::Transient(format!("status {status}: {body}")),
            _ => PlatformError::Rejected(format!("status {status}: {body}")),
        }
    }
}

/// Receipt for a successful mutating call.
#[derive(Debug, Clone, Default)]
pub struct ActionReceipt {
    /// Platform-assigned identifier of the affected object (new post id,
    /// liked post id, followed user id, ...).
    pub id: Option<String>,
    /// Structured payload returned alongside, if any.
    pub payload: Option<Value>,
}

impl ActionReceipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            payload: None,
        }
    }
}

/// One method per orchestrated operation. Every call runs with the
/// worker's credentials and proxy identity.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    // Reads
    async fn scrape_profile(&self, worker: &Account, username: &str)
        -> Result<Value, PlatformError>;

    async fn scrape_posts(
        &self,
        worker: &Account,
        username: &str,
        count: u32,
        hours: Option<u32>,
        max_replies: Option<u32>,
    ) -> Result<Value, PlatformError>;

    async fn search_trending(&self, worker: &Account, count: u32) -> Result<Value, PlatformError>;

    async fn search_posts(
        &self,
        worker: &Account,
        query: &str,
        count: u32,
    ) -> Result<Value, PlatformError>;

    async fn search_users(
        &self,
        worker: &Account,
        query: &str,
        count: u32,
    ) -> Result<Value, PlatformError>;

    // Mutations
    async fn like(
        &self,
        worker: &Account,
        post_id: &str,
        method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn retweet(
        &self,
        worker: &Account,
        post_id: &str,
        method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn reply(
        &self,
        worker: &Account,
        post_id: &str,
        text: &str,
        media: Option<&str>,
        method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn quote(
        &self,
        worker: &Account,
        post_id: &str,
        text: &str,
        media: Option<&str>,
        method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn create_post(
        &self,
        worker: &Account,
        text: &str,
        media: Option<&str>,
        method: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn follow(&self, worker: &Account, user: &str) -> Result<ActionReceipt, PlatformError>;

    async fn direct_message(
        &self,
        worker: &Account,
        user: &str,
        text: &str,
        media: Option<&str>,
    ) -> Result<ActionReceipt, PlatformError>;

    async fn update_profile(
        &self,
        worker: &Account,
        update: &ProfileUpdateParams,
    ) -> Result<ActionReceipt, PlatformError>;
}

/// Canonical URL for a post made (or acted on) by a worker.
pub fn canonical_post_url(host: &str, login: &str, post_id: &str) -> String {
    format!("https://{host}/{login}/status/{post_id}")
}

/// Placeholder adapter for deployments where no protocol adapter has
/// been wired yet. Every call is rejected, so jobs fail fast instead of
/// hanging in retry loops.
pub struct UnconfiguredPlatform;

macro_rules! unconfigured {
    () => {
        Err(PlatformError::Rejected(
            "no platform adapter configured".to_string(),
        ))
    };
}

#[async_trait]
impl PlatformClient for UnconfiguredPlatform {
    async fn scrape_profile(&self, _: &Account, _: &str) -> Result<Value, PlatformError> {
        unconfigured!()
    }

    async fn scrape_posts(
        &self,
        _: &Account,
        _: &str,
        _: u32,
        _: Option<u32>,
        _: Option<u32>,
    ) -> Result<Value, PlatformError> {
        unconfigured!()
    }

    async fn search_trending(&self, _: &Account, _: u32) -> Result<Value, PlatformError> {
        unconfigured!()
    }

    async fn search_posts(&self, _: &Account, _: &str, _: u32) -> Result<Value, PlatformError> {
        unconfigured!()
    }

    async fn search_users(&self, _: &Account, _: &str, _: u32) -> Result<Value, PlatformError> {
        unconfigured!()
    }

    async fn like(
        &self,
        _: &Account,
        _: &str,
        _: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn retweet(
        &self,
        _: &Account,
        _: &str,
        _: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn reply(
        &self,
        _: &Account,
        _: &str,
        _: &str,
        _: Option<&str>,
        _: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn quote(
        &self,
        _: &Account,
        _: &str,
        _: &str,
        _: Option<&str>,
        _: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn create_post(
        &self,
        _: &Account,
        _: &str,
        _: Option<&str>,
        _: ApiMethod,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn follow(&self, _: &Account, _: &str) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn direct_message(
        &self,
        _: &Account,
        _: &str,
        _: &str,
        _: Option<&str>,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }

    async fn update_profile(
        &self,
        _: &Account,
        _: &ProfileUpdateParams,
    ) -> Result<ActionReceipt, PlatformError> {
        unconfigured!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            PlatformError::from_status(429, ""),
            PlatformError::RateLimited { .. }
        ));
        assert!(matches!(
            PlatformError::from_status(401, "bad token"),
            PlatformError::Auth(_)
        ));
        assert!(matches!(
            PlatformError::from_status(404, "gone"),
            PlatformError::NotFound(_)
        ));
        assert!(matches!(
            PlatformError::from_status(503, "down"),
            PlatformError::Transient(_)
        ));
        assert!(matches!(
            PlatformError::from_status(422, "bad media"),
            PlatformError::Rejected(_)
        ));
    }

    #[test]
    fn retryable_kinds() {
        assert!(PlatformError::Timeout(60).is_retryable());
        assert!(PlatformError::Transient("reset".into()).is_retryable());
        assert!(PlatformError::RateLimited {
            retry_after_secs: Some(300),
            remaining: Some(0)
        }
        .is_retryable());
        assert!(!PlatformError::Auth("no".into()).is_retryable());
        assert!(!PlatformError::Rejected("no".into()).is_retryable());
        assert!(!PlatformError::NotFound("no".into()).is_retryable());
    }

    #[test]
    fn canonical_url_shape() {
        assert_eq!(
            canonical_post_url("x.com", "worker_one", "123"),
            "https://x.com/worker_one/status/123"
        );
    }
}
