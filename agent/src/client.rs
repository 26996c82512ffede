//! HTTP client for the hub's host API surface
//!
//! Thin wrapper over `reqwest` translating each RPC in
//! `koji_common::api::endpoints` into a method call: build the URL,
//! attach the auth headers, post or get JSON, and turn a non-success
//! status into a descriptive error.

use anyhow::{Context, Result};
use koji_common::api::{
    endpoints, headers, ApiResponse, CloseTaskRequest, GetTasksForHostResponse, OpenTaskRequest,
    SetHostDataRequest, SetRefusalRequest, TaskOutcome,
};
use koji_common::model::{HostCapabilities, Task};
use tracing::{debug, warn};

pub struct HubClient {
    http: reqwest::Client,
    hub_url: String,
    api_key: String,
    host_name: String,
}

impl HubClient {
    pub fn new(hub_url: impl Into<String>, api_key: impl Into<String>, host_name: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            hub_url: hub_url.into(),
            api_key: api_key.into(),
            host_name: host_name.into(),
        })
    }

    fn url(&self, template: &str) -> String {
        let path = template.replace("{host_name}", &self.host_name);
        format!("{}{}", self.hub_url.trim_end_matches('/'), path)
    }

    fn task_url(&self, template: &str, task_id: i64) -> String {
        let path = template
            .replace("{host_name}", &self.host_name)
            .replace("{task_id}", &task_id.to_string());
        format!("{}{}", self.hub_url.trim_end_matches('/'), path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        if response.status().is_success() {
            let body: ApiResponse<T> = response
                .json()
                .await
                .with_context(|| format!("failed to parse {what} response"))?;
            body.data
                .ok_or_else(|| anyhow::anyhow!("{what} response carried no data"))
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("{what} failed: hub returned {status}: {text}"))
        }
    }

    /// `getTasksForHost`: the host's heartbeat. Returns the host's
    /// currently ASSIGNED tasks.
    pub async fn get_tasks_for_host(&self) -> Result<Vec<Task>> {
        let url = self.url(endpoints::HOST_TASKS);
        let response = self
            .http
            .get(&url)
            .header(headers::API_KEY, &self.api_key)
            .header(headers::HOST_NAME, &self.host_name)
            .send()
            .await
            .with_context(|| format!("failed to reach hub at {url}"))?;

        let body: GetTasksForHostResponse = Self::decode(response, "getTasksForHost").await?;
        debug!(count = body.tasks.len(), "polled assigned tasks");
        Ok(body.tasks)
    }

    /// `setHostData`: registers the host (on first call) and refreshes
    /// its self-reported capabilities.
    pub async fn set_host_data(&self, capabilities: &HostCapabilities) -> Result<()> {
        let url = self.url(endpoints::HOST_DATA);
        let response = self
            .http
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .header(headers::HOST_NAME, &self.host_name)
            .json(&SetHostDataRequest {
                capabilities: capabilities.clone(),
            })
            .send()
            .await
            .with_context(|| format!("failed to reach hub at {url}"))?;

        Self::decode::<()>(response, "setHostData").await
    }

    /// `setRefusal`: report that this host will not run `task_id`.
    pub async fn set_refusal(&self, task_id: i64, soft: bool, msg: impl Into<String>) -> Result<()> {
        let url = self.url(endpoints::HOST_REFUSAL);
        let response = self
            .http
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .header(headers::HOST_NAME, &self.host_name)
            .json(&SetRefusalRequest {
                task_id,
                soft,
                msg: msg.into(),
            })
            .send()
            .await
            .with_context(|| format!("failed to reach hub at {url}"))?;

        Self::decode::<()>(response, "setRefusal").await
    }

    /// Transition a task ASSIGNED -> OPEN.
    pub async fn open_task(&self, task_id: i64) -> Result<()> {
        let url = self.task_url(endpoints::TASK_OPEN, task_id);
        let response = self
            .http
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .header(headers::HOST_NAME, &self.host_name)
            .json(&OpenTaskRequest {})
            .send()
            .await
            .with_context(|| format!("failed to reach hub at {url}"))?;

        if let Err(e) = Self::decode::<()>(response, "openTask").await {
            warn!(task_id, error = %e, "openTask failed");
            return Err(e);
        }
        Ok(())
    }

    /// Report completion of a task this host ran.
    pub async fn close_task(&self, task_id: i64, outcome: TaskOutcome, msg: Option<String>) -> Result<()> {
        let url = self.task_url(endpoints::TASK_CLOSE, task_id);
        let response = self
            .http
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .header(headers::HOST_NAME, &self.host_name)
            .json(&CloseTaskRequest { outcome, msg })
            .send()
            .await
            .with_context(|| format!("failed to reach hub at {url}"))?;

        Self::decode::<()>(response, "closeTask").await
    }
}
