//! Mutating-action CSV import.

use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::kernel::Kernel;
use crate::server::csv::{parse_actions_csv, RowError};
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct ActionImportResponse {
    pub created: Vec<Uuid>,
    /// Rows that resolved to an already-existing action's job.
    pub duplicates: Vec<Uuid>,
    pub errors: Vec<RowError>,
}

/// POST /actions/upload — multipart CSV of mutating actions.
///
/// Rows import independently: bad rows are reported, good rows enqueue.
pub async fn upload_actions_csv(
    Extension(kernel): Extension<Kernel>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ActionImportResponse>)> {
    let mut file: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::validation(format!("unreadable file: {e}")))?;
            file = Some(bytes.to_vec());
        }
    }
    let file = file.ok_or_else(|| ApiError::validation("missing file field"))?;

    let (rows, mut errors) = parse_actions_csv(&file).map_err(ApiError::Validation)?;

    let mut created = Vec::new();
    let mut duplicates = Vec::new();

    for row in rows {
        let account = match kernel.store.find_account_by_no(&row.account_no).await? {
            Some(account) => account,
            None => {
                errors.push(RowError {
                    line: row.line,
                    message: format!("unknown account: {}", row.account_no),
                });
                continue;
            }
        };

        let params = row.input_params(account.id);
        match kernel
            .manager
            .add_job(row.job_type, params, row.priority)
            .await
        {
            Ok(submission) if submission.is_created() => created.push(submission.job().id),
            Ok(submission) => duplicates.push(submission.job().id),
            Err(e) => errors.push(RowError {
                line: row.line,
                message: e.to_string(),
            }),
        }
    }

    let status = if created.is_empty() && duplicates.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(ActionImportResponse {
            created,
            duplicates,
            errors,
        }),
    ))
}
