//! The orchestration engine.
//!
//! ```text
//! TaskManager (lifecycle, batches, monitor)
//!     │
//!     ├─► TaskQueue × N  (claim → bind → execute)
//!     │       ├─► WorkerPool (eligibility, health, activation)
//!     │       │       └─► RateLimiter (admission)
//!     │       └─► ActionProcessor (platform call → persisted outcome)
//!     └─► JobStore (all durable state)
//! ```

pub mod events;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod store;
pub mod testing;
pub mod worker_pool;

pub use events::{EngineEvent, QueueState};
pub use manager::{QueueStats, Submission, SubmitError, TaskManager, TaskManagerConfig};
pub use processor::{ActionProcessor, ProcessorConfig};
pub use queue::{QueueConfig, SchedulerShared, TaskQueue};
pub use rate_limiter::{
    ClassLimits, Decision, DenyReason, RateLimitStatus, RateLimitTable, RateLimiter, WindowKind,
};
pub use store::{JobStore, PgJobStore};
pub use worker_pool::{Reservation, RotationReport, WorkerPool, WorkerPoolConfig};
