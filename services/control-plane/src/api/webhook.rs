//! Notification (webhook) policy endpoints

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Json as JsonResponse;
use axum::routing::{get, post};
use serde::Deserialize;

use super::AppState;
use super::extract::{Created, Json, Path, Query, Security};
use crate::auth::Principal;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::notification::{NotificationPolicy, test_policy};
use crate::pagination::{Page, PageQuery};
use crate::policy::PolicyQuery;
use crate::rbac::{Action, Resource, Scope};

/// Router for notification policy operations
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/projects/{pid}/webhook/policies",
            get(list_policies).post(create_policy),
        )
        .route("/api/projects/{pid}/webhook/policies/test", post(test))
        .route(
            "/api/projects/{pid}/webhook/policies/{id}",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
}

/// Resolve the project and check the caller's permission within it.
///
/// Anonymous callers are turned away before the project is looked up, so
/// unknown project ids are not revealed to them.
async fn authorize(
    state: &AppState,
    deadline: &Deadline,
    principal: &Principal,
    pid: i64,
    action: Action,
) -> Result<()> {
    if principal.is_anonymous() {
        return Err(Error::Unauthenticated);
    }
    deadline.run("project store", state.projects.resolve(pid)).await?;
    state
        .require(deadline, principal, Scope::Project(pid), Resource::WebhookPolicy, action)
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
    Path(pid): Path<i64>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<NameFilter>,
) -> Result<Page<NotificationPolicy>> {
    authorize(&state, &deadline, &principal, pid, Action::Read).await?;
    let pagination = page.validate()?;
    let query = PolicyQuery {
        project_id: Some(pid),
        name: filter.name,
        pagination,
    };
    let listed = deadline
        .run("policy store", state.notifications.list(pid, query))
        .await?;
    Ok(pagination.page(listed))
}

async fn create_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(pid): Path<i64>,
    uri: Uri,
    Json(policy): Json<NotificationPolicy>,
) -> Result<Created> {
    authorize(&state, &deadline, &principal, pid, Action::Create).await?;
    let id = deadline
        .run("policy store", state.notifications.create(&principal, pid, policy))
        .await?;
    Ok(Created::at(&uri, id))
}

async fn get_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path((pid, id)): Path<(i64, i64)>,
) -> Result<JsonResponse<NotificationPolicy>> {
    authorize(&state, &deadline, &principal, pid, Action::Read).await?;
    let policy = deadline
        .run("policy store", state.notifications.get(pid, id))
        .await?;
    Ok(JsonResponse(policy))
}

async fn update_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path((pid, id)): Path<(i64, i64)>,
    Json(policy): Json<NotificationPolicy>,
) -> Result<StatusCode> {
    authorize(&state, &deadline, &principal, pid, Action::Update).await?;
    deadline
        .run("policy store", state.notifications.update(pid, id, policy))
        .await?;
    Ok(StatusCode::OK)
}

async fn delete_policy(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path((pid, id)): Path<(i64, i64)>,
) -> Result<StatusCode> {
    authorize(&state, &deadline, &principal, pid, Action::Delete).await?;
    deadline
        .run("policy store", state.notifications.delete(pid, id))
        .await?;
    Ok(StatusCode::OK)
}

/// Check that every target of a policy is reachable, without storing it
async fn test(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(pid): Path<i64>,
    Json(policy): Json<NotificationPolicy>,
) -> Result<StatusCode> {
    authorize(&state, &deadline, &principal, pid, Action::Create).await?;
    let policy = state.notifications.prepare(pid, policy)?;
    deadline
        .run("notification target", test_policy(state.prober.as_ref(), &policy))
        .await?;
    Ok(StatusCode::OK)
}
