//! API types and structures for hub/build-host communication
//!
//! This module defines the request and response types used by the host
//! API surface: the RPCs a build host calls to poll for work, heartbeat,
//! report refusals, and (for operators) read back scheduler state.

use crate::error::Fault;
use crate::model::{Channel, HostCapabilities, LogMessage, Refusal, Task, TaskRun};
use serde::{Deserialize, Serialize};

/// Generic API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<Fault>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(fault: Fault) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(fault),
        }
    }
}

/// Response body for `GET /api/v1/host/{host_id}/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTasksForHostResponse {
    pub tasks: Vec<Task>,
}

/// Request body for `POST /api/v1/host/{host_id}/data` (`setHostData`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetHostDataRequest {
    pub capabilities: HostCapabilities,
}

/// Request body for `POST /api/v1/host/{host_id}/refusal` (`setRefusal`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRefusalRequest {
    pub task_id: i64,
    pub soft: bool,
    pub msg: String,
}

/// Request body for `POST /api/v1/host/{host_id}/task/{task_id}/open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTaskRequest {}

/// Outcome reported by a build host closing out a task it ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Done,
    Fail,
}

/// Request body for `POST /api/v1/host/{host_id}/task/{task_id}/close`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTaskRequest {
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub msg: Option<String>,
}

/// Request body for the administrative `POST /api/v1/task/assign` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskRequest {
    pub task_id: i64,
    pub host_id: i64,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub override_active: bool,
}

/// A single equality clause used by the read-only admin queries, e.g.
/// `("task_id", "=", "42")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClause {
    pub column: String,
    pub op: String,
    pub value: String,
}

/// Query parameters for `getTaskRuns` / `getTaskRefusals` / `getLogMessages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub clauses: Vec<QueryClause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunsResponse {
    pub runs: Vec<TaskRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRefusalsResponse {
    pub refusals: Vec<Refusal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessagesResponse {
    pub messages: Vec<LogMessage>,
}

/// Response body for the admin read endpoint `getChannels`, letting an
/// operator resolve the channel ids on a task or host capability row to
/// their configured names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsResponse {
    pub channels: Vec<Channel>,
}

/// Response body for the operator/test hook `POST /api/v1/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoRunResponse {
    /// Whether the tick actually ran (false if skipped by the interval
    /// gate or the advisory lock).
    pub ran: bool,
    pub assignments_made: usize,
}

/// HTTP headers used for authentication and host identification.
pub mod headers {
    pub const API_KEY: &str = "X-Koji-Api-Key";
    pub const HOST_NAME: &str = "X-Koji-Host-Name";
}

/// API endpoint paths (host-facing and administrative).
///
/// Host-facing routes key on host *name*, not the hub's internal numeric
/// host id: a build host learns its own name from local configuration
/// before it has ever been assigned an id by the hub, so `setHostData`
/// doubles as the (idempotent) registration call.
pub mod endpoints {
    pub const HOST_TASKS: &str = "/api/v1/host/{host_name}/tasks";
    pub const HOST_DATA: &str = "/api/v1/host/{host_name}/data";
    pub const HOST_REFUSAL: &str = "/api/v1/host/{host_name}/refusal";
    pub const TASK_OPEN: &str = "/api/v1/host/{host_name}/task/{task_id}/open";
    pub const TASK_CLOSE: &str = "/api/v1/host/{host_name}/task/{task_id}/close";
    pub const TASK_ASSIGN: &str = "/api/v1/task/assign";
    pub const TASK_RUNS: &str = "/api/v1/task_runs";
    pub const TASK_REFUSALS: &str = "/api/v1/task_refusals";
    pub const HOST_DATA_READ: &str = "/api/v1/host_data/{host_name}";
    pub const LOG_MESSAGES: &str = "/api/v1/log_messages";
    pub const CHANNELS: &str = "/api/v1/channels";
    pub const DO_RUN: &str = "/api/v1/run";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultCode;

    #[test]
    fn api_response_helpers_round_trip() {
        let success: ApiResponse<i64> = ApiResponse::success(42);
        assert_eq!(success.status, "success");
        assert_eq!(success.data, Some(42));
        assert!(success.error.is_none());

        let failure: ApiResponse<i64> =
            ApiResponse::failure(Fault::new(FaultCode::WrongHost, "nope"));
        assert_eq!(failure.status, "error");
        assert!(failure.data.is_none());
        assert_eq!(failure.error.unwrap().code, FaultCode::WrongHost);
    }

    #[test]
    fn query_request_defaults_to_no_clauses() {
        let q: QueryRequest = serde_json::from_str("{}").unwrap();
        assert!(q.clauses.is_empty());
    }

    #[test]
    fn query_request_deserializes_clauses() {
        let q: QueryRequest = serde_json::from_str(
            r#"{"clauses":[{"column":"task_id","op":"=","value":"42"}]}"#,
        )
        .unwrap();
        assert_eq!(q.clauses.len(), 1);
        assert_eq!(q.clauses[0].column, "task_id");
    }
}
