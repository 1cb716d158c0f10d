//! Project endpoints

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Json as JsonResponse;
use axum::routing::{get, post};
use serde::Deserialize;

use super::AppState;
use super::extract::{Created, Json, Path, Security};
use crate::audit::{AuditRecord, Operation};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::project::{Project, Role};
use crate::rbac::{Action, Resource, Scope};

/// Router for project operations
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects/{pid}", get(get_project).delete(delete_project))
        .route("/api/projects/{pid}/members", post(add_member))
}

#[derive(Debug, Deserialize)]
struct ProjectRequest {
    #[serde(alias = "name")]
    project_name: String,
    #[serde(default)]
    public: bool,
}

/// Create a project owned by the caller
async fn create_project(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    uri: Uri,
    Json(request): Json<ProjectRequest>,
) -> Result<Created> {
    state
        .require(&deadline, &principal, Scope::System, Resource::Project, Action::Create)
        .await?;

    let project = deadline
        .run(
            "project store",
            state
                .projects
                .create(&request.project_name, principal.name(), request.public),
        )
        .await?;

    state.audit.record(AuditRecord::now(
        project.project_id,
        "project",
        project.name.as_str(),
        Operation::Create,
        principal.name(),
    ));
    Ok(Created::at(&uri, project.project_id))
}

/// Get a project. Public projects are readable by anyone.
async fn get_project(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(pid): Path<i64>,
) -> Result<JsonResponse<Project>> {
    let project = deadline.run("project store", state.projects.resolve(pid)).await?;
    if !project.public {
        state
            .require(&deadline, &principal, Scope::Project(pid), Resource::Project, Action::Read)
            .await?;
    }
    Ok(JsonResponse(project))
}

/// Delete a project which no longer holds any notification policy
async fn delete_project(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(pid): Path<i64>,
) -> Result<StatusCode> {
    if principal.is_anonymous() {
        return Err(Error::Unauthenticated);
    }
    let project = deadline.run("project store", state.projects.resolve(pid)).await?;
    state
        .require(&deadline, &principal, Scope::Project(pid), Resource::Project, Action::Delete)
        .await?;

    let policies = deadline
        .run("policy store", state.notifications.count(pid))
        .await?;
    if policies > 0 {
        return Err(Error::PreconditionFailed(format!(
            "project {} still has {policies} webhook policies",
            project.name
        )));
    }

    deadline.run("project store", state.projects.delete(pid)).await?;
    state.audit.record(AuditRecord::now(
        pid,
        "project",
        project.name.as_str(),
        Operation::Delete,
        principal.name(),
    ));
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct MemberRequest {
    username: String,
    role: Role,
}

/// Add a member to a project, or change their role
async fn add_member(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(pid): Path<i64>,
    Json(request): Json<MemberRequest>,
) -> Result<StatusCode> {
    if principal.is_anonymous() {
        return Err(Error::Unauthenticated);
    }
    deadline.run("project store", state.projects.resolve(pid)).await?;
    state
        .require(&deadline, &principal, Scope::Project(pid), Resource::Member, Action::Create)
        .await?;

    if request.username.trim().is_empty() {
        return Err(Error::BadRequest("username is required".into()));
    }
    deadline
        .run(
            "project store",
            state.projects.set_member(pid, &request.username, request.role),
        )
        .await?;
    Ok(StatusCode::CREATED)
}
