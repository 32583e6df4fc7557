//! Scheduler lifecycle endpoints.

use axum::extract::{Extension, Path};
use axum::Json;
use serde::Serialize;

use crate::kernel::engine::QueueState;
use crate::kernel::Kernel;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub status: QueueState,
}

/// POST /queue/{start|stop|pause|resume}
pub async fn queue_command(
    Extension(kernel): Extension<Kernel>,
    Path(command): Path<String>,
) -> ApiResult<Json<QueueStatusResponse>> {
    match command.as_str() {
        "start" => kernel.manager.start().await?,
        "stop" => kernel.manager.stop().await?,
        "pause" => kernel.manager.pause().await,
        "resume" => kernel.manager.resume().await,
        other => {
            return Err(ApiError::validation(format!(
                "unknown queue command: {other}"
            )))
        }
    }

    Ok(Json(QueueStatusResponse {
        status: kernel.manager.queue_state().await,
    }))
}

/// GET /queue/status
pub async fn queue_status(
    Extension(kernel): Extension<Kernel>,
) -> ApiResult<Json<QueueStatusResponse>> {
    Ok(Json(QueueStatusResponse {
        status: kernel.manager.queue_state().await,
    }))
}
