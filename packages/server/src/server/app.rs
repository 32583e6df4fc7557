//! Application setup and router.

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::Kernel;
use crate::server::routes::{
    accounts::{account_limits, list_accounts},
    actions::upload_actions_csv,
    health::health_handler,
    jobs::{
        cancel_job, create_job, create_jobs_bulk, get_job, job_stats, list_jobs, upload_jobs_csv,
    },
    queue::{queue_command, queue_status},
    stream::ws_handler,
};

pub fn build_app(kernel: Kernel) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/bulk", post(create_jobs_bulk))
        .route("/jobs/upload", post(upload_jobs_csv))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/actions/upload", post(upload_actions_csv))
        .route("/accounts", get(list_accounts))
        .route("/accounts/:id/limits", get(account_limits))
        .route("/queue/status", get(queue_status))
        .route("/queue/:command", post(queue_command))
        .route("/ws", get(ws_handler))
        .layer(Extension(kernel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
