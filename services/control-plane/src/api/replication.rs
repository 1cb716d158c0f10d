//! Replication policy and execution endpoints

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Json as JsonResponse;
use axum::routing::get;
use serde::Deserialize;

use super::AppState;
use super::extract::{Created, Json, Log, Path, Query, Security};
use crate::auth::Principal;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::pagination::{Page, PageQuery};
use crate::policy::PolicyQuery;
use crate::rbac::{Action, Resource, Scope};
use crate::replication::{
    Execution, ExecutionQuery, ExecutionStatus, ExecutionTrigger, ReplicationPolicy, ResourceType,
    Task, TaskQuery, TaskStatus,
};

/// Router for replication operations
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/replication/policies",
            get(list_policies).post(create_policy),
        )
        .route(
            "/api/replication/policies/{id}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route(
            "/api/replication/executions",
            get(list_executions).post(start_execution),
        )
        .route(
            "/api/replication/executions/{id}",
            get(get_execution).put(stop_execution),
        )
        .route("/api/replication/executions/{id}/tasks", get(list_tasks))
        .route("/api/replication/executions/{id}/tasks/{tid}", get(get_task))
        .route(
            "/api/replication/executions/{id}/tasks/{tid}/log",
            get(get_task_log),
        )
}

async fn require_policy(state: &AppState, deadline: &Deadline, principal: &Principal, action: Action) -> Result<()> {
    state
        .require(deadline, principal, Scope::System, Resource::ReplicationPolicy, action)
        .await
}

async fn require_replication(state: &AppState, deadline: &Deadline, principal: &Principal, action: Action) -> Result<()> {
    state
        .require(deadline, principal, Scope::System, Resource::Replication, action)
        .await
}

#[derive(Debug, Default, Deserialize)]
struct NameFilter {
    name: Option<String>,
}

async fn list_policies(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Query(page): Query<PageQuery>,
    Query(filter): Query<NameFilter>,
) -> Result<Page<ReplicationPolicy>> {
    require_policy(&state, &deadline, &principal, Action::Read).await?;
    let pagination = page.validate()?;
    let query = PolicyQuery {
        project_id: Some(0),
        name: filter.name,
        pagination,
    };
    let listed = deadline
        .run("policy store", state.replication.policies().list(0, query))
        .await?;
    Ok(pagination.page(listed))
}

async fn create_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    uri: Uri,
    Json(policy): Json<ReplicationPolicy>,
) -> Result<Created> {
    require_policy(&state, &deadline, &principal, Action::Create).await?;
    let policies = state.replication.policies();
    let policy = policies.prepare(0, policy)?;
    state.replication.validate_policy(&deadline, &policy).await?;
    let id = deadline
        .run("policy store", policies.create(&principal, 0, policy))
        .await?;
    Ok(Created::at(&uri, id))
}

async fn get_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<JsonResponse<ReplicationPolicy>> {
    require_policy(&state, &deadline, &principal, Action::Read).await?;
    let policy = deadline
        .run("policy store", state.replication.policies().get(0, id))
        .await?;
    Ok(JsonResponse(policy))
}

async fn update_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
    Json(policy): Json<ReplicationPolicy>,
) -> Result<StatusCode> {
    require_policy(&state, &deadline, &principal, Action::Update).await?;
    let policies = state.replication.policies();
    let policy = policies.prepare(0, policy)?;
    state.replication.validate_policy(&deadline, &policy).await?;
    deadline
        .run("policy store", policies.update(0, id, policy))
        .await?;
    Ok(StatusCode::OK)
}

/// Delete a policy with no execution in progress
async fn delete_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    require_policy(&state, &deadline, &principal, Action::Delete).await?;
    let policies = state.replication.policies();
    deadline.run("policy store", policies.get(0, id)).await?;

    let live = state.replication.live_executions(&deadline, id).await?;
    if !live.is_empty() {
        return Err(Error::PreconditionFailed(format!(
            "replication policy {id} has {} executions in progress",
            live.len()
        )));
    }
    deadline.run("policy store", policies.delete(0, id)).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionFilter {
    policy_id: Option<i64>,
    status: Option<ExecutionStatus>,
    trigger: Option<ExecutionTrigger>,
}

async fn list_executions(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ExecutionFilter>,
) -> Result<Page<Execution>> {
    require_replication(&state, &deadline, &principal, Action::Read).await?;
    let pagination = page.validate()?;
    let query = ExecutionQuery {
        policy_id: filter.policy_id,
        status: filter.status,
        trigger: filter.trigger,
        pagination,
    };
    let listed = state.replication.list_executions(&deadline, &query).await?;
    Ok(pagination.page(listed))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    policy_id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerQuery {
    trigger: Option<ExecutionTrigger>,
}

async fn start_execution(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    uri: Uri,
    Query(trigger): Query<TriggerQuery>,
    Json(request): Json<StartRequest>,
) -> Result<Created> {
    require_replication(&state, &deadline, &principal, Action::Create).await?;
    let trigger = trigger.trigger.unwrap_or_default();
    let execution = state
        .replication
        .start(&deadline, request.policy_id, trigger, None)
        .await?;
    Ok(Created::at(&uri, execution.id))
}

async fn get_execution(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<JsonResponse<Execution>> {
    require_replication(&state, &deadline, &principal, Action::Read).await?;
    let execution = state.replication.get_execution(&deadline, id).await?;
    Ok(JsonResponse(execution))
}

/// Ask an execution to stop. Stopping a finished execution succeeds.
async fn stop_execution(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    require_replication(&state, &deadline, &principal, Action::Update).await?;
    state.replication.stop(&deadline, id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
struct TaskFilter {
    status: Option<TaskStatus>,
    resource_type: Option<ResourceType>,
}

async fn list_tasks(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<TaskFilter>,
) -> Result<Page<Task>> {
    require_replication(&state, &deadline, &principal, Action::Read).await?;
    let pagination = page.validate()?;
    let query = TaskQuery {
        status: filter.status,
        resource_type: filter.resource_type,
        pagination,
    };
    let listed = state.replication.list_tasks(&deadline, id, &query).await?;
    Ok(pagination.page(listed))
}

async fn get_task(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path((id, tid)): Path<(i64, i64)>,
) -> Result<JsonResponse<Task>> {
    require_replication(&state, &deadline, &principal, Action::Read).await?;
    let task = state.replication.get_task(&deadline, id, tid).await?;
    Ok(JsonResponse(task))
}

async fn get_task_log(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path((id, tid)): Path<(i64, i64)>,
) -> Result<Log> {
    require_replication(&state, &deadline, &principal, Action::Read).await?;
    let log = state.replication.get_task_log(&deadline, id, tid).await?;
    Ok(Log(log))
}
