//! Garbage collection and scan-all endpoints
//!
//! Both jobs share one set of handlers. Each router carries its job name as a
//! request extension, which [AdminJobKind] reads back.

use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};

use super::AppState;
use super::extract::{Created, Json, Log, Path, Security};
use crate::adminjob::{AdminJobName, AdminJobView, Schedule, ScheduleRequest};
use crate::auth::Principal;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::rbac::{Action, Resource, Scope};

const GC_PATH: &str = "/api/system/gc";
const SCAN_ALL_PATH: &str = "/api/system/scanAll";

/// Router for admin job operations
pub fn router() -> Router<AppState> {
    jobs(GC_PATH, AdminJobName::ImageGc).merge(jobs(SCAN_ALL_PATH, AdminJobName::ImageScanAll))
}

fn jobs(prefix: &str, name: AdminJobName) -> Router<AppState> {
    Router::new()
        .route(prefix, get(recent))
        .route(
            &format!("{prefix}/schedule"),
            get(current).post(create_schedule).put(update_schedule),
        )
        .route(&format!("{prefix}/{{id}}"), get(get_job))
        .route(&format!("{prefix}/{{id}}/log"), get(get_log))
        .layer(Extension(name))
}

/// Which admin job a request addresses.
///
/// Scan-all requests are refused while the scanner is switched off.
#[derive(Debug, Clone, Copy)]
struct AdminJobKind(AdminJobName);

impl AdminJobKind {
    fn path(&self) -> &'static str {
        match self.0 {
            AdminJobName::ImageGc => GC_PATH,
            AdminJobName::ImageScanAll => SCAN_ALL_PATH,
        }
    }
}

impl FromRequestParts<AppState> for AdminJobKind {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let name = parts
            .extensions
            .get::<AdminJobName>()
            .copied()
            .ok_or_else(|| Error::internal("admin job route without a job name"))?;
        if name == AdminJobName::ImageScanAll && !state.features.scanner {
            return Err(Error::Unavailable("the vulnerability scanner is not enabled".into()));
        }
        Ok(AdminJobKind(name))
    }
}

async fn authorize(state: &AppState, deadline: &Deadline, principal: &Principal, action: Action) -> Result<()> {
    state
        .require(deadline, principal, Scope::System, Resource::AdminJob, action)
        .await
}

/// The most recent runs
async fn recent(
    AdminJobKind(name): AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
) -> Result<JsonResponse<Vec<AdminJobView>>> {
    authorize(&state, &deadline, &principal, Action::Read).await?;
    let jobs = state.schedules.recent(&deadline, name).await?;
    Ok(JsonResponse(jobs.iter().map(|job| job.view()).collect()))
}

/// The current periodic schedule, as a list of zero or one rows
async fn current(
    AdminJobKind(name): AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
) -> Result<JsonResponse<Vec<AdminJobView>>> {
    authorize(&state, &deadline, &principal, Action::Read).await?;
    let jobs = state.schedules.current(&deadline, name).await?;
    Ok(JsonResponse(jobs.iter().map(|job| job.view()).collect()))
}

async fn create_schedule(
    kind: AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Json(request): Json<ScheduleRequest>,
) -> Result<Response> {
    authorize(&state, &deadline, &principal, Action::Create).await?;
    let schedule = Schedule::try_from(request.into_param())?;
    match state.schedules.create(&deadline, kind.0, schedule).await? {
        Some(job) => Ok(Created::under(kind.path(), job.id).into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}

async fn update_schedule(
    AdminJobKind(name): AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Json(request): Json<ScheduleRequest>,
) -> Result<StatusCode> {
    authorize(&state, &deadline, &principal, Action::Update).await?;
    let schedule = Schedule::try_from(request.into_param())?;
    state.schedules.update(&deadline, name, schedule).await?;
    Ok(StatusCode::OK)
}

async fn get_job(
    AdminJobKind(name): AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<JsonResponse<AdminJobView>> {
    authorize(&state, &deadline, &principal, Action::Read).await?;
    let job = state.schedules.get(&deadline, name, id).await?;
    Ok(JsonResponse(job.view()))
}

async fn get_log(
    AdminJobKind(name): AdminJobKind,
    State(state): State<AppState>,
    deadline: Deadline,
    Security(principal): Security,
    Path(id): Path<i64>,
) -> Result<Log> {
    authorize(&state, &deadline, &principal, Action::Read).await?;
    let log = state.schedules.log(&deadline, name, id).await?;
    Ok(Log(log))
}
