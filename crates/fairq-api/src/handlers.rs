//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and the priority facade,
//! returning JSON responses.

use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use fairq_core::{NICE_OFFSET, PRIO_HELD_USER};
use fairq_state::{JobDetails, JobRecord, JobState};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Priority factors ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct FactorsQuery {
    /// Comma-separated job ids.
    jobs: Option<String>,
    /// Comma-separated user ids.
    users: Option<String>,
}

fn parse_id_list(raw: &Option<String>) -> Vec<u32> {
    raw.as_deref()
        .map(|s| s.split(',').filter_map(|part| part.trim().parse().ok()).collect())
        .unwrap_or_default()
}

/// GET /api/v1/priority/factors?jobs=1,2&users=500
pub async fn priority_factors(
    State(state): State<ApiState>,
    Query(query): Query<FactorsQuery>,
) -> impl IntoResponse {
    let job_filter = parse_id_list(&query.jobs);
    let user_filter = parse_id_list(&query.users);

    match state
        .plugin
        .get_priority_factors_list(&job_filter, &user_filter)
        .await
    {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// Submission payload. Only identity and shape; the priority is assigned
/// by the controller.
#[derive(Deserialize)]
pub struct SubmitRequest {
    pub job_id: u32,
    pub user_id: u32,
    pub name: String,
    pub partition: Option<String>,
    pub total_procs: u32,
    #[serde(default = "default_nice")]
    pub nice: u32,
    /// Earliest start time; defaults to now.
    pub begin_time: Option<u64>,
    #[serde(default = "default_min_nodes")]
    pub min_nodes: u32,
    pub assoc_id: Option<u32>,
    pub qos_id: Option<u32>,
    /// Submit in user-held state.
    #[serde(default)]
    pub hold: bool,
}

fn default_nice() -> u32 {
    NICE_OFFSET
}

fn default_min_nodes() -> u32 {
    1
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> impl IntoResponse {
    match state.store.get_job(request.job_id) {
        Ok(Some(_)) => {
            return error_response("job already exists", StatusCode::CONFLICT)
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    let now = epoch_secs();
    let mut job = JobRecord {
        job_id: request.job_id,
        user_id: request.user_id,
        name: request.name,
        partition: request.partition,
        total_procs: request.total_procs,
        nice: request.nice,
        details: Some(JobDetails {
            begin_time: request.begin_time.unwrap_or(now),
            min_nodes: request.min_nodes,
        }),
        submit_time: now,
        start_time: 0,
        end_time: 0,
        state: JobState::Pending,
        priority: PRIO_HELD_USER,
        direct_set_prio: false,
        assoc_id: request.assoc_id,
        qos_id: request.qos_id,
    };

    if !request.hold {
        let last = state.last_prio.load(Ordering::Relaxed);
        job.priority = state.plugin.set(last, &job).await;
        if job.priority > 1 {
            state.last_prio.store(job.priority, Ordering::Relaxed);
        }
    }

    info!(job_id = job.job_id, priority = job.priority, "job submitted");
    match state.store.put_job(&job) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(job)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_jobs() {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    match state.store.get_job(id) {
        Ok(Some(job)) => ApiResponse::ok(job).into_response(),
        Ok(None) => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// POST /api/v1/jobs/{id}/hold
pub async fn hold_job(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    update_job(&state, id, |job| {
        job.priority = PRIO_HELD_USER;
        job.direct_set_prio = false;
        info!(job_id = job.job_id, "job held");
    })
    .await
}

/// POST /api/v1/jobs/{id}/release
pub async fn release_job(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
) -> impl IntoResponse {
    let job = match state.store.get_job(id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return error_response("job not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let mut released = job;
    released.direct_set_prio = false;
    let last = state.last_prio.load(Ordering::Relaxed);
    released.priority = state.plugin.set(last, &released).await;
    info!(job_id = released.job_id, priority = released.priority, "job released");

    match state.store.put_job(&released) {
        Ok(()) => ApiResponse::ok(released).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    pub priority: u32,
}

/// POST /api/v1/jobs/{id}/priority — admin override; the decay loop will
/// not touch this job again until the override is released.
pub async fn override_priority(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
    Json(request): Json<OverrideRequest>,
) -> impl IntoResponse {
    update_job(&state, id, |job| {
        job.priority = request.priority;
        job.direct_set_prio = true;
        info!(job_id = job.job_id, priority = job.priority, "priority overridden");
    })
    .await
}

async fn update_job(
    state: &ApiState,
    id: u32,
    mutate: impl FnOnce(&mut JobRecord),
) -> axum::response::Response {
    let mut job = match state.store.get_job(id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return error_response("job not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    mutate(&mut job);

    match state.store.put_job(&job) {
        Ok(()) => ApiResponse::ok(job).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

// ── Reconfig ───────────────────────────────────────────────────

/// POST /api/v1/reconfig
pub async fn reconfig(State(state): State<ApiState>) -> impl IntoResponse {
    state.plugin.reconfig().await;
    ApiResponse::ok("reconfig scheduled").into_response()
}

// ── Associations ───────────────────────────────────────────────

/// One row of the share tree listing.
#[derive(Serialize)]
pub struct AssocView {
    pub id: u32,
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub shares_raw: u32,
    pub shares_norm: f64,
    pub usage_raw: f64,
    pub usage_norm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_efctv: Option<f64>,
    pub grp_used_wall: f64,
}

/// GET /api/v1/associations
pub async fn list_associations(State(state): State<ApiState>) -> impl IntoResponse {
    let assoc = state.assoc.read().await;
    let rows: Vec<AssocView> = assoc
        .iter_nodes()
        .map(|node| AssocView {
            id: node.id,
            account: node.account.clone(),
            user: node.user.clone(),
            shares_raw: node.shares_raw,
            shares_norm: node.shares_norm,
            usage_raw: node.usage_raw,
            usage_norm: node.usage_norm,
            usage_efctv: node.usage_efctv,
            grp_used_wall: node.grp_used_wall,
        })
        .collect();
    ApiResponse::ok(rows).into_response()
}
