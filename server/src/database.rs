//! Database management for the scheduler hub
//!
//! This module owns the SQLite connection and all durable state: hosts,
//! tasks, task runs, refusals, host self-reports, the event log, and the
//! advisory lock used to serialize scheduling across hub processes. Each
//! concern lives in its own submodule; this struct is the seam through
//! which the registry, pool, assignment engine, and API layer reach the
//! store, so assignment transactions can live here where both the task
//! and task_run tables are in scope.

pub mod db_channels;
pub mod db_host_data;
pub mod db_hosts;
pub mod db_lock;
pub mod db_log;
pub mod db_refusals;
pub mod db_runs;
pub mod db_tasks;

use anyhow::{Context, Result};
use koji_common::model::{Host, HostCapabilities, LogMessage, Refusal, RunState, Task, TaskState};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATABASE_FILE: &str = "koji_scheduler.db";

/// Manages the SQLite database backing the scheduler.
pub struct SchedulerDatabase {
    db_path: PathBuf,
    connection: Option<Connection>,
    busy_timeout_secs: u64,
}

impl SchedulerDatabase {
    pub fn new<P: AsRef<Path>>(data_dir: P, busy_timeout_secs: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
        }

        Ok(Self {
            db_path: data_dir.join(DATABASE_FILE),
            connection: None,
            busy_timeout_secs,
        })
    }

    /// Creates all tables and seeds the configured channel map. Idempotent;
    /// safe to call on every hub startup.
    pub fn initialize(&mut self, channels: &HashMap<i64, String>) -> Result<()> {
        info!("initializing scheduler database at {}", self.db_path.display());

        let conn = self.get_connection()?;

        db_hosts::create_table(conn)?;
        db_tasks::create_table(conn)?;
        db_runs::create_table(conn)?;
        db_refusals::create_table(conn)?;
        db_host_data::create_table(conn)?;
        db_log::create_table(conn)?;
        db_lock::create_table(conn)?;
        db_channels::create_table(conn)?;
        db_channels::seed(conn, channels)?;

        info!("scheduler database initialization complete");
        Ok(())
    }

    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("failed to open database: {}", self.db_path.display()))?;

            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("failed to enable WAL mode")?;
            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
                .context("failed to set WAL auto-checkpoint")?;
            conn.execute("PRAGMA foreign_keys=ON", [])
                .context("failed to enable foreign key constraints")?;
            conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_secs))
                .context("failed to set busy timeout")?;

            self.connection = Some(conn);
        }
        Ok(self
            .connection
            .as_mut()
            .expect("connection should exist after lazy init"))
    }

    // -- advisory lock --------------------------------------------------

    pub fn try_acquire_lock(
        &mut self,
        name: &str,
        holder: &str,
        now: i64,
        lease_seconds: i64,
    ) -> Result<bool> {
        let conn = self.get_connection()?;
        db_lock::try_acquire(conn, name, holder, now, lease_seconds)
    }

    pub fn release_lock(&mut self, name: &str, holder: &str) -> Result<()> {
        let conn = self.get_connection()?;
        db_lock::release(conn, name, holder)
    }

    pub fn last_run_ts(&mut self, lock_name: &str) -> Result<i64> {
        let conn = self.get_connection()?;
        db_lock::last_run_ts(conn, lock_name)
    }

    pub fn set_last_run_ts(&mut self, lock_name: &str, now: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_lock::set_last_run_ts(conn, lock_name, now)
    }

    // -- hosts ------------------------------------------------------------

    /// Register or refresh a host's self-reported capabilities. Doubles as
    /// registration: a host with no prior row is created on first call.
    pub fn upsert_host_capabilities(
        &mut self,
        host_name: &str,
        caps: &HostCapabilities,
        now: i64,
    ) -> Result<i64> {
        let conn = self.get_connection()?;
        let host_id = db_hosts::upsert_capabilities(conn, host_name, caps, now)?;
        db_host_data::set(conn, host_id, caps)?;
        Ok(host_id)
    }

    pub fn touch_host_heartbeat(&mut self, host_id: i64, now: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_hosts::touch_heartbeat(conn, host_id, now)
    }

    pub fn get_host_by_name(&mut self, name: &str) -> Result<Option<Host>> {
        let conn = self.get_connection()?;
        db_hosts::get_by_name(conn, name)
    }

    pub fn get_host_by_id(&mut self, host_id: i64) -> Result<Option<Host>> {
        let conn = self.get_connection()?;
        db_hosts::get_by_id(conn, host_id)
    }

    pub fn get_host_capabilities(&mut self, host_id: i64) -> Result<Option<HostCapabilities>> {
        let conn = self.get_connection()?;
        db_host_data::get(conn, host_id)
    }

    pub fn get_all_enabled_hosts(&mut self) -> Result<Vec<Host>> {
        let conn = self.get_connection()?;
        db_hosts::get_all_enabled(conn)
    }

    pub fn mark_host_unready(&mut self, host_id: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_hosts::mark_unready(conn, host_id)
    }

    // -- tasks ------------------------------------------------------------

    pub fn free_tasks(&mut self) -> Result<Vec<Task>> {
        let conn = self.get_connection()?;
        db_tasks::free_tasks(conn)
    }

    pub fn get_task(&mut self, task_id: i64) -> Result<Option<Task>> {
        let conn = self.get_connection()?;
        db_tasks::get_task(conn, task_id)
    }

    pub fn set_task_state(&mut self, task_id: i64, state: TaskState) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::set_state(conn, task_id, state)
    }

    /// Return a task to FREE and mark its active run OVERRIDE, in one
    /// transaction. Used by timeout handling and dead-host eviction.
    pub fn override_and_free(&mut self, task_id: i64, now: i64) -> Result<()> {
        let conn = self.get_connection()?;
        let tx = conn.transaction()?;
        db_runs::override_active_run(&tx, task_id, now)?;
        db_tasks::set_free(&tx, task_id)?;
        tx.commit().context("failed to commit override-and-free")?;
        Ok(())
    }

    // -- task runs ---------------------------------------------------------

    pub fn get_active_runs(&mut self) -> Result<Vec<koji_common::model::TaskRun>> {
        let conn = self.get_connection()?;
        db_runs::get_active_runs(conn)
    }

    /// Every run ever recorded, active or historical. Backs the admin
    /// `getTaskRuns` view, which needs a task's full run history, not just
    /// its current in-flight run.
    pub fn all_runs(&mut self) -> Result<Vec<koji_common::model::TaskRun>> {
        let conn = self.get_connection()?;
        db_runs::all_runs(conn)
    }

    pub fn get_active_run_for_task(
        &mut self,
        task_id: i64,
    ) -> Result<Option<koji_common::model::TaskRun>> {
        let conn = self.get_connection()?;
        db_runs::get_active_run_for_task(conn, task_id)
    }

    pub fn set_run_state(&mut self, run_id: i64, state: RunState, now: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_runs::set_state(conn, run_id, state, now)
    }

    /// Assign a FREE task to a host: insert the TaskRun and flip the task
    /// row to ASSIGNED inside one `BEGIN IMMEDIATE` transaction. If
    /// `override_active` is set, any currently-active run for the task is
    /// marked OVERRIDE first rather than erroring out. Returns the new
    /// run id, or an error if the task was not FREE (or not ASSIGNED, when
    /// overriding) by the time the transaction acquired the row lock,
    /// the caller observes this as *TaskAlreadyAssigned*.
    pub fn assign_task(
        &mut self,
        task_id: i64,
        host_id: i64,
        override_active: bool,
        now: i64,
    ) -> Result<i64> {
        let conn = self.get_connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<i64> {
            if override_active {
                db_runs::override_active_run(conn, task_id, now)?;
                db_tasks::set_free(conn, task_id)?;
            }
            db_tasks::assign(conn, task_id, host_id)?;
            db_runs::insert_assigned(conn, task_id, host_id, now)
        })();

        match result {
            Ok(run_id) => {
                conn.execute_batch("COMMIT")?;
                Ok(run_id)
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                Err(e)
            }
        }
    }

    // -- refusals ----------------------------------------------------------

    pub fn set_refusal(
        &mut self,
        host_id: i64,
        task_id: i64,
        soft: bool,
        by_host: bool,
        msg: &str,
        now: i64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_refusals::set_refusal(conn, host_id, task_id, soft, by_host, msg, now)
    }

    pub fn get_refusals_for_task(&mut self, task_id: i64) -> Result<Vec<Refusal>> {
        let conn = self.get_connection()?;
        db_refusals::get_refusals_for_task(conn, task_id)
    }

    pub fn all_refusals(&mut self) -> Result<Vec<Refusal>> {
        let conn = self.get_connection()?;
        db_refusals::all(conn)
    }

    pub fn purge_refusals_for_task(&mut self, task_id: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_refusals::purge_for_task(conn, task_id)
    }

    // -- event log -----------------------------------------------------------

    pub fn log(
        &mut self,
        task_id: Option<i64>,
        host_id: Option<i64>,
        host_name: Option<&str>,
        msg: &str,
        now: i64,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_log::append(conn, task_id, host_id, host_name, msg, now)?;
        Ok(())
    }

    pub fn log_messages_for_task(&mut self, task_id: i64) -> Result<Vec<LogMessage>> {
        let conn = self.get_connection()?;
        db_log::for_task(conn, task_id)
    }

    pub fn recent_log_messages(&mut self, limit: i64) -> Result<Vec<LogMessage>> {
        let conn = self.get_connection()?;
        db_log::recent(conn, limit)
    }

    /// Every configured channel, for the admin read API to resolve a
    /// task's or host's channel ids to human-readable names.
    pub fn list_channels(&mut self) -> Result<Vec<koji_common::model::Channel>> {
        let conn = self.get_connection()?;
        db_channels::all(conn)
    }

    /// Runs a WAL checkpoint, truncating the WAL file back to empty when
    /// nothing else holds it busy.
    pub fn checkpoint_wal(&mut self) -> Result<i64> {
        let conn = self.get_connection()?;
        let (busy, _log_frames, checkpointed): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        if busy != 0 {
            warn!("WAL checkpoint ran while busy; partial checkpoint only");
        }
        Ok(checkpointed)
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close() {
                warn!("error closing database connection: {:?}", e.1);
            } else {
                debug!("database connection closed");
            }
        }
    }
}
