//! Job submission and inspection endpoints.

use axum::extract::{Extension, Multipart, Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::common::pagination::{Page, Paginated};
use crate::kernel::engine::{QueueStats, Submission};
use crate::kernel::Kernel;
use crate::models::{Job, JobStatus, JobType};
use crate::server::csv::parse_usernames_csv;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub input_params: Value,
    #[serde(default)]
    pub priority: Option<i16>,
}

#[derive(Debug, Serialize)]
pub struct JobSubmitted {
    pub id: Uuid,
    pub status: JobStatus,
    /// True when the submission resolved to an existing job.
    pub duplicate: bool,
}

impl From<&Submission> for JobSubmitted {
    fn from(submission: &Submission) -> Self {
        let job = submission.job();
        Self {
            id: job.id,
            status: job.status,
            duplicate: !submission.is_created(),
        }
    }
}

/// POST /jobs
pub async fn create_job(
    Extension(kernel): Extension<Kernel>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobSubmitted>)> {
    let submission = kernel
        .manager
        .add_job(
            request.job_type,
            request.input_params,
            request.priority.unwrap_or(0),
        )
        .await?;

    let status = if submission.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(JobSubmitted::from(&submission))))
}

#[derive(Debug, Deserialize)]
pub struct BulkJobsRequest {
    pub jobs: Vec<CreateJobRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkJobsResponse {
    pub submitted: Vec<JobSubmitted>,
}

/// POST /jobs/bulk — a list of same-type jobs.
pub async fn create_jobs_bulk(
    Extension(kernel): Extension<Kernel>,
    Json(request): Json<BulkJobsRequest>,
) -> ApiResult<(StatusCode, Json<BulkJobsResponse>)> {
    if request.jobs.is_empty() {
        return Err(ApiError::validation("jobs list is empty"));
    }
    let first_type = request.jobs[0].job_type;
    if request.jobs.iter().any(|j| j.job_type != first_type) {
        return Err(ApiError::validation("bulk jobs must share one type"));
    }

    let mut submitted = Vec::with_capacity(request.jobs.len());
    for job in request.jobs {
        let submission = kernel
            .manager
            .add_job(job.job_type, job.input_params, job.priority.unwrap_or(0))
            .await?;
        submitted.push(JobSubmitted::from(&submission));
    }

    Ok((StatusCode::CREATED, Json(BulkJobsResponse { submitted })))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub created: usize,
    pub job_ids: Vec<Uuid>,
}

/// POST /jobs/upload — multipart CSV of usernames, one scrape job each.
pub async fn upload_jobs_csv(
    Extension(kernel): Extension<Kernel>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut file: Option<Vec<u8>> = None;
    let mut job_type = JobType::ScrapeProfile;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation(format!("unreadable file: {e}")))?;
                file = Some(bytes.to_vec());
            }
            Some("job_type") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(format!("invalid job_type: {e}")))?;
                job_type = match text.as_str() {
                    "scrape_profile" => JobType::ScrapeProfile,
                    "scrape_posts" => JobType::ScrapePosts,
                    other => {
                        return Err(ApiError::validation(format!(
                            "unsupported upload job type: {other}"
                        )))
                    }
                };
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::validation("missing file field"))?;
    let usernames = parse_usernames_csv(&file).map_err(ApiError::Validation)?;
    if usernames.is_empty() {
        return Err(ApiError::validation("no usernames in file"));
    }

    let mut job_ids = Vec::with_capacity(usernames.len());
    for username in usernames {
        let submission = kernel
            .manager
            .add_job(job_type, serde_json::json!({ "username": username }), 0)
            .await?;
        job_ids.push(submission.job().id);
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            created: job_ids.len(),
            job_ids,
        }),
    ))
}

/// GET /jobs/{id}
pub async fn get_job(
    Extension(kernel): Extension<Kernel>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let job = kernel
        .store
        .find_job(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<JobStatus>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
}

/// GET /jobs
pub async fn list_jobs(
    Extension(kernel): Extension<Kernel>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Paginated<Job>>> {
    let page = Page {
        page: query.page,
        page_size: query.page_size,
    };
    let jobs = kernel
        .store
        .list_jobs(&page, query.status, query.job_type)
        .await?;
    Ok(Json(jobs))
}

/// GET /jobs/stats
pub async fn job_stats(
    Extension(kernel): Extension<Kernel>,
) -> ApiResult<Json<QueueStats>> {
    let stats = kernel.manager.stats().await?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    Extension(kernel): Extension<Kernel>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    if kernel.store.find_job(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let cancelled = kernel.manager.cancel_job(id).await?;
    Ok(Json(CancelResponse { cancelled }))
}
