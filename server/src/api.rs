//! Host API Surface (component F)
//!
//! The HTTP/JSON RPC surface hosts and operators use to talk to the hub:
//! `getTasksForHost`, `setHostData`, refusal submission, task-run status
//! updates, and the read-only admin views. JSON over HTTP stands in for
//! the XML-RPC transport named by interface only; everything downstream
//! of request parsing is unchanged.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use koji_common::api::{
    endpoints, headers, ApiResponse, AssignTaskRequest, ChannelsResponse, CloseTaskRequest,
    DoRunResponse, GetTasksForHostResponse, LogMessagesResponse, OpenTaskRequest, QueryClause,
    QueryRequest, SetHostDataRequest, SetRefusalRequest, TaskOutcome, TaskRefusalsResponse,
    TaskRunsResponse,
};
use koji_common::config::HubConfig;
use koji_common::model::{RunState, TaskState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::assign;
use crate::database::SchedulerDatabase;
use crate::error::ApiError;
use crate::scheduler::Scheduler;

/// Sliding-window request rate limiter, keyed by host name.
pub struct HostRateLimiter {
    limits: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl HostRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            limits: Arc::new(RwLock::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub async fn check(&self, host_name: &str) -> Result<(), ApiError> {
        let now = Instant::now();
        let mut limits = self.limits.write().await;
        let requests = limits.entry(host_name.to_string()).or_default();
        requests.retain(|&t| now.duration_since(t) < self.window);

        if requests.len() >= self.max_requests {
            warn!(host_name, count = requests.len(), "rate limit exceeded");
            return Err(ApiError::TooManyRequests);
        }
        requests.push(now);
        Ok(())
    }
}

impl Clone for HostRateLimiter {
    fn clone(&self) -> Self {
        Self {
            limits: Arc::clone(&self.limits),
            window: self.window,
            max_requests: self.max_requests,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub rate_limiter: HostRateLimiter,
    pub database: Arc<Mutex<SchedulerDatabase>>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        config: HubConfig,
        database: Arc<Mutex<SchedulerDatabase>>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let rate_limiter = HostRateLimiter::new(
            Duration::from_secs(config.rate_limit_window_seconds as u64),
            config.rate_limit_max_requests,
        );
        Self {
            config: Arc::new(config),
            rate_limiter,
            database,
            scheduler,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(endpoints::HOST_TASKS, get(handle_get_tasks_for_host))
        .route(endpoints::HOST_DATA, post(handle_set_host_data))
        .route(endpoints::HOST_REFUSAL, post(handle_set_refusal))
        .route(endpoints::TASK_OPEN, post(handle_open_task))
        .route(endpoints::TASK_CLOSE, post(handle_close_task))
        .route(endpoints::TASK_ASSIGN, post(handle_assign_task))
        .route(endpoints::TASK_RUNS, get(handle_task_runs))
        .route(endpoints::TASK_REFUSALS, get(handle_task_refusals))
        .route(endpoints::HOST_DATA_READ, get(handle_get_host_data))
        .route(endpoints::LOG_MESSAGES, get(handle_log_messages))
        .route(endpoints::CHANNELS, get(handle_list_channels))
        .route(endpoints::DO_RUN, post(handle_do_run))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn validate_api_key(headers: &HeaderMap, expected_key: &str) -> Result<(), ApiError> {
    use subtle::ConstantTimeEq;

    let provided = headers
        .get(headers::API_KEY)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let matches = provided.len() == expected_key.len()
        && bool::from(provided.as_bytes().ct_eq(expected_key.as_bytes()));

    if matches {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn current_host_name(headers: &HeaderMap) -> Option<String> {
    headers
        .get(headers::HOST_NAME)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn now() -> i64 {
    koji_common::utils::current_timestamp()
}

/// `getTasksForHost`: returns the host's ASSIGNED tasks and, as a side
/// effect, refreshes its heartbeat in the same pass so polling doubles
/// as liveness reporting.
async fn handle_get_tasks_for_host(
    State(state): State<AppState>,
    Path(host_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<GetTasksForHostResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    state.rate_limiter.check(&host_name).await?;

    let mut db = state.database.lock().await;
    let host = db
        .get_host_by_name(&host_name)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown host: {host_name}")))?;

    db.touch_host_heartbeat(host.id, now())
        .map_err(ApiError::Database)?;

    let mut assigned = Vec::new();
    let active_runs = db.get_active_runs().map_err(ApiError::Database)?;
    for run in active_runs.into_iter().filter(|r| r.host_id == host.id) {
        if let Some(task) = db.get_task(run.task_id).map_err(ApiError::Database)? {
            if task.state == TaskState::Assigned {
                assigned.push(task);
            }
        }
    }

    Ok(Json(ApiResponse::success(GetTasksForHostResponse {
        tasks: assigned,
    })))
}

/// `setHostData`: registers the host if unknown, otherwise refreshes its
/// self-reported capabilities. Triggers no immediate scheduling decision.
async fn handle_set_host_data(
    State(state): State<AppState>,
    Path(host_name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SetHostDataRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    state.rate_limiter.check(&host_name).await?;

    let mut db = state.database.lock().await;
    db.upsert_host_capabilities(&host_name, &request.capabilities, now())
        .map_err(ApiError::Database)?;

    info!(host_name, "host data updated");
    Ok(Json(ApiResponse::success(())))
}

/// `setRefusal`: a host-initiated refusal. Never changes task state
/// directly, only influences future scheduling.
async fn handle_set_refusal(
    State(state): State<AppState>,
    Path(host_name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SetRefusalRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    state.rate_limiter.check(&host_name).await?;

    let mut db = state.database.lock().await;
    let host = db
        .get_host_by_name(&host_name)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown host: {host_name}")))?;

    db.set_refusal(
        host.id,
        request.task_id,
        request.soft,
        true,
        &request.msg,
        now(),
    )
    .map_err(ApiError::Database)?;

    info!(host_name, task_id = request.task_id, "host recorded refusal");
    Ok(Json(ApiResponse::success(())))
}

/// Transitions a task ASSIGNED -> OPEN, valid only if the caller's host
/// matches the active run's host, otherwise *WrongHost*.
async fn handle_open_task(
    State(state): State<AppState>,
    Path((host_name, task_id)): Path<(String, i64)>,
    headers: HeaderMap,
    Json(_request): Json<OpenTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    state.rate_limiter.check(&host_name).await?;

    let mut db = state.database.lock().await;
    let host = db
        .get_host_by_name(&host_name)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown host: {host_name}")))?;

    let run = db
        .get_active_run_for_task(task_id)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::NotFound(task_id))?;

    if run.host_id != host.id {
        return Err(ApiError::WrongHost {
            task_id,
            host_id: host.id,
        });
    }

    db.set_task_state(task_id, TaskState::Open)
        .map_err(ApiError::Database)?;
    db.set_run_state(run.id, RunState::Running, now())
        .map_err(ApiError::Database)?;

    Ok(Json(ApiResponse::success(())))
}

/// Task-run status update: the host that ran a task reports DONE or FAIL.
/// Valid only from the host the active run is assigned to. Refusals for
/// the task are purged on reaching this terminal state, per the refusal
/// ledger's expiry rule.
async fn handle_close_task(
    State(state): State<AppState>,
    Path((host_name, task_id)): Path<(String, i64)>,
    headers: HeaderMap,
    Json(request): Json<CloseTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;
    state.rate_limiter.check(&host_name).await?;

    let mut db = state.database.lock().await;
    let host = db
        .get_host_by_name(&host_name)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown host: {host_name}")))?;

    let run = db
        .get_active_run_for_task(task_id)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::NotFound(task_id))?;

    if run.host_id != host.id {
        return Err(ApiError::WrongHost {
            task_id,
            host_id: host.id,
        });
    }

    let now = now();
    let (run_state, task_state) = match request.outcome {
        TaskOutcome::Done => (RunState::Done, TaskState::Closed),
        TaskOutcome::Fail => (RunState::Fail, TaskState::Failed),
    };

    db.set_run_state(run.id, run_state, now)
        .map_err(ApiError::Database)?;
    db.set_task_state(task_id, task_state)
        .map_err(ApiError::Database)?;
    db.purge_refusals_for_task(task_id)
        .map_err(ApiError::Database)?;
    db.log(
        Some(task_id),
        Some(host.id),
        Some(&host_name),
        request.msg.as_deref().unwrap_or("task closed"),
        now,
    )
    .map_err(ApiError::Database)?;

    info!(host_name, task_id, outcome = ?request.outcome, "task closed");
    Ok(Json(ApiResponse::success(())))
}

/// Administrative `assignTask`: `force` bypasses host-eligibility checks
/// that the scheduler loop itself always applies.
async fn handle_assign_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AssignTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    assign::assign(
        &mut db,
        request.task_id,
        request.host_id,
        request.override_active,
        now(),
    )?;

    Ok(Json(ApiResponse::success(())))
}

async fn handle_task_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(query): Json<QueryRequest>,
) -> Result<Json<ApiResponse<TaskRunsResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let runs = db.all_runs().map_err(ApiError::Database)?;
    let runs = apply_filters(runs, &query.clauses);
    Ok(Json(ApiResponse::success(TaskRunsResponse { runs })))
}

async fn handle_task_refusals(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(query): Json<QueryRequest>,
) -> Result<Json<ApiResponse<TaskRefusalsResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let refusals = db.all_refusals().map_err(ApiError::Database)?;
    let refusals = apply_filters(refusals, &query.clauses);
    Ok(Json(ApiResponse::success(TaskRefusalsResponse { refusals })))
}

async fn handle_get_host_data(
    State(state): State<AppState>,
    Path(host_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<koji_common::model::HostCapabilities>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let host = db
        .get_host_by_name(&host_name)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::BadRequest(format!("unknown host: {host_name}")))?;
    let caps = db
        .get_host_capabilities(host.id)
        .map_err(ApiError::Database)?
        .ok_or_else(|| ApiError::NotFound(host.id))?;

    Ok(Json(ApiResponse::success(caps)))
}

async fn handle_log_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(query): Json<QueryRequest>,
) -> Result<Json<ApiResponse<LogMessagesResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let messages = db.recent_log_messages(500).map_err(ApiError::Database)?;
    let messages = apply_filters(messages, &query.clauses);
    Ok(Json(ApiResponse::success(LogMessagesResponse { messages })))
}

/// Admin read endpoint letting an operator resolve the channel ids seen on
/// task and host capability rows to their configured names.
async fn handle_list_channels(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ChannelsResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let channels = db.list_channels().map_err(ApiError::Database)?;
    Ok(Json(ApiResponse::success(ChannelsResponse { channels })))
}

/// Operator/test hook: forces a scheduler tick regardless of `run_interval`.
async fn handle_do_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DoRunResponse>>, ApiError> {
    validate_api_key(&headers, &state.config.api_key)?;

    let mut db = state.database.lock().await;
    let report = state
        .scheduler
        .tick(&mut db, &state.config.scheduler, now(), true)
        .map_err(ApiError::Database)?;

    Ok(Json(ApiResponse::success(DoRunResponse {
        ran: report.ran,
        assignments_made: report.assignments_made,
    })))
}

/// Apply a small set of equality clauses to a result set in memory. The
/// admin read endpoints are low-volume diagnostic views, not a query
/// planner, so filtering after the fact is simpler than building SQL
/// dynamically from caller-supplied column names.
fn apply_filters<T: serde::Serialize>(items: Vec<T>, clauses: &[QueryClause]) -> Vec<T> {
    if clauses.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            let value = serde_json::to_value(item).unwrap_or(serde_json::Value::Null);
            clauses.iter().all(|clause| matches_clause(&value, clause))
        })
        .collect()
}

fn matches_clause(value: &serde_json::Value, clause: &QueryClause) -> bool {
    let field = match value.get(&clause.column) {
        Some(f) => f,
        None => return false,
    };
    let field_str = match field {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match clause.op.as_str() {
        "=" => field_str == clause.value,
        "!=" => field_str != clause.value,
        _ => false,
    }
}
