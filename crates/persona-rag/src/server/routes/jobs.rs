//! Job submission and management endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::providers::JobFilter;
use crate::server::state::AppState;
use crate::types::{IngestionJob, JobPayload};

/// Response from job submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub documents: usize,
    pub message: String,
}

/// POST /api/jobs - Submit a typed job
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<JobPayload>,
) -> Result<Json<SubmitResponse>> {
    let documents = payload.document_count();
    let job_id = state.queue().submit(payload).await?;
    Ok(Json(SubmitResponse {
        job_id,
        documents,
        message: format!("Job queued. Track progress at /api/jobs/{}", job_id),
    }))
}

/// GET /api/jobs - List jobs with optional filters
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<IngestionJob>>> {
    Ok(Json(state.queue().list(&filter)?))
}

/// GET /api/jobs/:id - Get a job's state and progress
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IngestionJob>> {
    Ok(Json(state.queue().get(id)?))
}

/// POST /api/jobs/:id/retry - Re-enqueue a failed job
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IngestionJob>> {
    Ok(Json(state.queue().retry(id).await?))
}

/// POST /api/jobs/:id/cancel - Cancel a pending or processing job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IngestionJob>> {
    Ok(Json(state.queue().cancel(id)?))
}
