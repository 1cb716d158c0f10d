//! Status callbacks from the job service

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use jobservice_client::JobStatus;
use serde::Deserialize;

use super::AppState;
use super::extract::{Json, Path, Security};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::rbac::{Action, Resource, Scope};
use crate::replication::TaskStatus;

/// Router for job status callbacks
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/service/notifications/tasks/{id}", post(task_status))
        .route("/service/notifications/jobs/adminjob/{id}", post(admin_job_status))
}

#[derive(Debug, Deserialize)]
struct StatusReport {
    status: JobStatus,
}

async fn task_status(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
    Json(report): Json<StatusReport>,
) -> Result<StatusCode> {
    state
        .require(&deadline, &principal, Scope::System, Resource::JobHook, Action::Update)
        .await?;
    tracing::debug!(task = id, status = ?report.status, "task status reported");
    state
        .replication
        .apply_task_status(&deadline, id, TaskStatus::from(report.status))
        .await?;
    Ok(StatusCode::OK)
}

async fn admin_job_status(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
    Json(report): Json<StatusReport>,
) -> Result<StatusCode> {
    state
        .require(&deadline, &principal, Scope::System, Resource::JobHook, Action::Update)
        .await?;
    tracing::debug!(admin_job = id, status = ?report.status, "admin job status reported");
    state.schedules.update_status(&deadline, id, report.status).await?;
    Ok(StatusCode::OK)
}
