//! Registry endpoints

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Json as JsonResponse;
use axum::routing::get;

use super::AppState;
use super::extract::{Created, Json, Path, Query, Security};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::pagination::{Page, PageQuery};
use crate::rbac::{Action, Resource, Scope};
use crate::registry::Registry;

/// Router for registry operations
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/registries", get(list_registries).post(create_registry))
        .route("/api/registries/{id}", get(get_registry).delete(delete_registry))
}

async fn list_registries(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Query(page): Query<PageQuery>,
) -> Result<Page<Registry>> {
    state
        .require(&deadline, &principal, Scope::System, Resource::Registry, Action::Read)
        .await?;
    let pagination = page.validate()?;
    let registries = deadline.run("registry store", state.registries.list()).await?;
    let total = registries.len();
    Ok(pagination.page((total, pagination.apply(registries))))
}

async fn create_registry(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    uri: Uri,
    Json(mut registry): Json<Registry>,
) -> Result<Created> {
    state
        .require(&deadline, &principal, Scope::System, Resource::Registry, Action::Create)
        .await?;
    registry.id = 0;
    registry.validate()?;
    let id = deadline
        .run("registry store", state.registries.create(registry))
        .await?;
    tracing::info!(id, "added registry");
    Ok(Created::at(&uri, id))
}

async fn get_registry(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<JsonResponse<Registry>> {
    state
        .require(&deadline, &principal, Scope::System, Resource::Registry, Action::Read)
        .await?;
    deadline
        .run("registry store", state.registries.get(id))
        .await?
        .map(JsonResponse)
        .ok_or_else(|| Error::NotFound(format!("registry {id} not found")))
}

/// Delete a registry no replication policy refers to
async fn delete_registry(
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state
        .require(&deadline, &principal, Scope::System, Resource::Registry, Action::Delete)
        .await?;
    if deadline
        .run("registry store", state.registries.get(id))
        .await?
        .is_none()
    {
        return Err(Error::NotFound(format!("registry {id} not found")));
    }
    if state.replication.registry_in_use(&deadline, id).await? {
        return Err(Error::PreconditionFailed(format!(
            "registry {id} is used by a replication policy"
        )));
    }
    deadline.run("registry store", state.registries.delete(id)).await?;
    Ok(StatusCode::OK)
}
