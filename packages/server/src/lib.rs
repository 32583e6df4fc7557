//! Multi-account automation orchestrator.
//!
//! The crate is organised in three layers:
//! - [`models`] — sqlx-backed rows (accounts, jobs, actions) with their SQL.
//! - [`kernel`] — the orchestration engine: rate limiter, worker pool,
//!   action processor, task queue/manager, and the `PlatformClient` seam.
//! - [`server`] — the axum REST/WS front door, which only reads persisted
//!   state and calls manager lifecycle methods.

pub mod common;
pub mod config;
pub mod kernel;
pub mod models;
pub mod server;

pub use config::Config;
