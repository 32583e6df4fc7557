//! REST/WS front door. Reads persisted state, calls manager lifecycle
//! methods; no orchestration logic lives here.

pub mod app;
pub mod csv;
pub mod error;
pub mod routes;

pub use app::build_app;
pub use error::{ApiError, ApiResult};
