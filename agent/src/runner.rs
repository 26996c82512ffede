//! Pluggable task execution
//!
//! The scheduler core treats a task as an opaque record; the real build
//! handlers (RPM build, image build, SCM checkout, ...) are an external
//! collaborator named by interface only. `TaskRunner` is that interface:
//! it lets the daemon be exercised end to end against the hub without a
//! real build pipeline attached.

use koji_common::model::Task;
use std::time::Duration;

/// Result of running a task to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done,
    Fail(String),
    Refuse { soft: bool, msg: String },
}

/// A handler for one or more task methods. Implementations are registered
/// with the daemon by method name, mirroring the process-wide handler
/// table named in the scheduler's dynamic-dispatch model.
pub trait TaskRunner: Send + Sync {
    fn can_handle(&self, method: &str) -> bool;

    /// How long this runner expects to hold the task, used by the poll
    /// loop to simulate load without blocking on real work.
    fn work_duration(&self, task: &Task) -> Duration;

    fn execute(&self, task: &Task) -> RunOutcome;
}

/// A trivial runner that accepts every method and completes instantly.
/// The default used when no task-specific handler is configured.
pub struct NoopTaskRunner;

impl TaskRunner for NoopTaskRunner {
    fn can_handle(&self, _method: &str) -> bool {
        true
    }

    fn work_duration(&self, _task: &Task) -> Duration {
        Duration::from_secs(0)
    }

    fn execute(&self, _task: &Task) -> RunOutcome {
        RunOutcome::Done
    }
}

/// A runner that refuses every task it sees, useful for testing the
/// refusal path without a hub round trip through a real build failure.
pub struct RefusingTaskRunner {
    pub soft: bool,
    pub msg: String,
}

impl TaskRunner for RefusingTaskRunner {
    fn can_handle(&self, _method: &str) -> bool {
        true
    }

    fn work_duration(&self, _task: &Task) -> Duration {
        Duration::from_secs(0)
    }

    fn execute(&self, _task: &Task) -> RunOutcome {
        RunOutcome::Refuse {
            soft: self.soft,
            msg: self.msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: 1,
            method: "buildArch".into(),
            channel_id: 1,
            arch: "x86_64".into(),
            weight: 1.0,
            priority: 10,
            state: koji_common::model::TaskState::Open,
            owner: 1,
            parent: None,
            host_id: Some(1),
            create_ts: 0,
        }
    }

    #[test]
    fn noop_runner_always_completes() {
        let runner = NoopTaskRunner;
        assert!(runner.can_handle("buildArch"));
        assert_eq!(runner.execute(&task()), RunOutcome::Done);
    }

    #[test]
    fn refusing_runner_always_refuses() {
        let runner = RefusingTaskRunner {
            soft: true,
            msg: "out of disk".into(),
        };
        match runner.execute(&task()) {
            RunOutcome::Refuse { soft, msg } => {
                assert!(soft);
                assert_eq!(msg, "out of disk");
            }
            other => panic!("expected Refuse, got {other:?}"),
        }
    }
}
