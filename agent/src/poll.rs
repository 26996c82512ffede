//! Poll loop: heartbeat, pick up assigned tasks, run them, report back
//!
//! One `tick` is periodic checks followed by an event-driven step: the
//! daemon is the one polling, not the one being pushed to.

use crate::client::HubClient;
use crate::runner::{RunOutcome, TaskRunner};
use anyhow::Result;
use koji_common::api::TaskOutcome;
use koji_common::config::HostConfig;
use koji_common::model::{HostCapabilities, Task};
use std::time::{Duration, Instant};
use tracing::{info, warn};

struct ActiveTask {
    task: Task,
    due_at: Instant,
}

pub struct Poller {
    client: HubClient,
    runner: Box<dyn TaskRunner>,
    host_config: HostConfig,
    active: Vec<ActiveTask>,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub opened: usize,
    pub closed: usize,
    pub refused: usize,
}

impl Poller {
    pub fn new(client: HubClient, runner: Box<dyn TaskRunner>, host_config: HostConfig) -> Self {
        Self {
            client,
            runner,
            host_config,
            active: Vec::new(),
        }
    }

    fn current_load(&self) -> f64 {
        self.active.iter().map(|a| a.task.weight).sum()
    }

    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            arches: self.host_config.arches.clone(),
            channels: self.host_config.channels.clone(),
            capacity: self.host_config.capacity,
            ready: true,
            task_load: self.current_load(),
            description: None,
        }
    }

    /// One poll cycle: heartbeat, pick up newly assigned tasks, and
    /// finish any tasks whose simulated work has elapsed.
    pub async fn tick(&mut self) -> Result<PollReport> {
        let mut report = PollReport::default();

        self.client.set_host_data(&self.capabilities()).await?;

        let assigned = self.client.get_tasks_for_host().await?;
        for task in assigned {
            if self.active.iter().any(|a| a.task.id == task.id) {
                continue;
            }

            if !self.runner.can_handle(&task.method) {
                warn!(task_id = task.id, method = %task.method, "no handler for method, refusing");
                self.client
                    .set_refusal(task.id, false, format!("no handler registered for method {}", task.method))
                    .await?;
                report.refused += 1;
                continue;
            }

            if let Err(e) = self.client.open_task(task.id).await {
                warn!(task_id = task.id, error = %e, "failed to open assigned task, will retry next tick");
                continue;
            }
            report.opened += 1;

            let due_at = Instant::now() + self.runner.work_duration(&task);
            self.active.push(ActiveTask { task, due_at });
        }

        let now = Instant::now();
        let mut still_active = Vec::with_capacity(self.active.len());
        for active in self.active.drain(..) {
            if active.due_at > now {
                still_active.push(active);
                continue;
            }

            match self.runner.execute(&active.task) {
                RunOutcome::Done => {
                    self.client.close_task(active.task.id, TaskOutcome::Done, None).await?;
                    info!(task_id = active.task.id, "task closed DONE");
                    report.closed += 1;
                }
                RunOutcome::Fail(msg) => {
                    self.client
                        .close_task(active.task.id, TaskOutcome::Fail, Some(msg))
                        .await?;
                    info!(task_id = active.task.id, "task closed FAIL");
                    report.closed += 1;
                }
                RunOutcome::Refuse { soft, msg } => {
                    self.client.set_refusal(active.task.id, soft, msg).await?;
                    report.refused += 1;
                }
            }
        }
        self.active = still_active;

        Ok(report)
    }
}
