//! Execution store -- the only shared mutable state of the dispatch pipeline.
//!
//! All queries run on the blocking pool. Nothing here takes row locks: two
//! concurrent `fetch_eligible` calls can return the same `Submitted` row.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{Pool, StoreError, StoreResult};
use crate::execution::{
    execution_id_at, format_timestamp, join_test_list, ExecutionRecord, ExecutionStatus,
    NewExecution,
};

const SELECT_COLUMNS: &str = "SELECT id, execution_name, requested_by, environment, browser,
        screen_capture, scheduled_at, frequency, test_list, status, active
    FROM executions";

#[derive(Clone)]
pub struct ExecutionStore {
    pool: Pool,
}

impl ExecutionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    /// Active `Submitted` rows scheduled at or before `now`, oldest first.
    pub async fn fetch_eligible(&self, now: DateTime<Utc>) -> StoreResult<Vec<ExecutionRecord>> {
        let now = format_timestamp(now);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE status = 'Submitted' AND active = 1 AND scheduled_at <= ?1
                 ORDER BY scheduled_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![now], map_record)?;
            let records = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Set the status of one execution. Returns the number of rows changed;
    /// `0` means the row is gone.
    pub async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> StoreResult<usize> {
        let id = execution_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE executions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), format_timestamp(Utc::now()), id],
            )?;
            debug!(execution_id = %id, %status, changed, "execution status updated");
            Ok(changed)
        })
        .await
    }

    /// Mark an execution `Stopped` and record who asked for it.
    pub async fn mark_stopped(&self, execution_id: &str, user: &str) -> StoreResult<usize> {
        let id = execution_id.to_string();
        let user = user.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE executions SET status = ?1, last_updated_by = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    ExecutionStatus::Stopped.as_str(),
                    user,
                    format_timestamp(Utc::now()),
                    id
                ],
            )?;
            Ok(changed)
        })
        .await
    }

    pub async fn get(&self, execution_id: &str) -> StoreResult<Option<ExecutionRecord>> {
        let id = execution_id.to_string();
        self.with_conn(move |conn| get_in(conn, &id)).await
    }

    /// Most recently scheduled executions first.
    pub async fn list_recent(&self, limit: usize) -> StoreResult<Vec<ExecutionRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY scheduled_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], map_record)?;
            let records = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Insert a new `Submitted` execution with an id derived from the current time.
    pub async fn submit(&self, new: NewExecution) -> StoreResult<ExecutionRecord> {
        self.submit_at(new, Utc::now()).await
    }

    /// Insert a new `Submitted` execution as if submitted at `now`.
    pub async fn submit_at(&self, new: NewExecution, now: DateTime<Utc>) -> StoreResult<ExecutionRecord> {
        validate(&new)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = execution_id_at(now);
            ensure_insertable(&tx, &id, &new.execution_name)?;

            tx.execute(
                "INSERT INTO executions (id, execution_name, requested_by, environment, browser,
                     screen_capture, scheduled_at, frequency, test_list, status, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1)",
                params![
                    id,
                    new.execution_name.trim(),
                    new.requested_by.trim(),
                    new.environment,
                    new.browser,
                    new.screen_capture,
                    format_timestamp(new.scheduled_at.unwrap_or(now)),
                    new.frequency,
                    join_test_list(&clean_entries(&new.test_list)),
                    ExecutionStatus::Submitted.as_str(),
                ],
            )?;
            let record = get_in(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            tx.commit()?;

            info!(execution_id = %record.id, name = %record.execution_name, "execution submitted");
            Ok(record)
        })
        .await
    }

    /// Copy an existing execution into a new `Submitted` row owned by `user`.
    pub async fn retrigger(&self, execution_id: &str, execution_name: &str, user: &str) -> StoreResult<ExecutionRecord> {
        self.retrigger_at(execution_id, execution_name, user, Utc::now()).await
    }

    pub async fn retrigger_at(
        &self,
        execution_id: &str,
        execution_name: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ExecutionRecord> {
        let source = self
            .get(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;

        let new = NewExecution {
            execution_name: execution_name.to_string(),
            requested_by: user.to_string(),
            environment: source.environment,
            browser: source.browser,
            screen_capture: source.screen_capture,
            scheduled_at: Some(source.scheduled_at),
            frequency: source.frequency,
            test_list: source.test_list,
        };
        self.submit_at(new, now).await
    }
}

fn validate(new: &NewExecution) -> StoreResult<()> {
    if new.execution_name.trim().is_empty() {
        return Err(StoreError::Invalid("execution name is required".to_string()));
    }
    if new.requested_by.trim().is_empty() {
        return Err(StoreError::Invalid("requesting user is required".to_string()));
    }
    if new.environment.trim().is_empty() {
        return Err(StoreError::Invalid("environment is required".to_string()));
    }
    if clean_entries(&new.test_list).is_empty() {
        return Err(StoreError::Invalid("select at least one test case or test pack".to_string()));
    }
    if new.test_list.iter().any(|t| t.contains(',')) {
        return Err(StoreError::Invalid("test names must not contain ','".to_string()));
    }
    Ok(())
}

fn clean_entries(tests: &[String]) -> Vec<String> {
    tests
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn ensure_insertable(conn: &Connection, id: &str, name: &str) -> StoreResult<()> {
    let name_taken: i64 = conn.query_row(
        "SELECT COUNT(*) FROM executions WHERE execution_name = ?1 AND active = 1",
        params![name.trim()],
        |row| row.get(0),
    )?;
    if name_taken != 0 {
        return Err(StoreError::Conflict(format!("execution name '{}' already exists", name.trim())));
    }

    let id_taken: i64 =
        conn.query_row("SELECT COUNT(*) FROM executions WHERE id = ?1", params![id], |row| row.get(0))?;
    if id_taken != 0 {
        return Err(StoreError::Conflict(format!("an execution with id {id} already exists")));
    }
    Ok(())
}

fn get_in(conn: &Connection, id: &str) -> StoreResult<Option<ExecutionRecord>> {
    let record = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], map_record)
        .optional()?;
    Ok(record)
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let scheduled_raw: String = row.get(6)?;
    let scheduled_at = DateTime::parse_from_rfc3339(&scheduled_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let test_list_raw: String = row.get(8)?;
    let status_raw: String = row.get(9)?;
    let status = status_raw
        .parse::<ExecutionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?;

    Ok(ExecutionRecord {
        id: row.get(0)?,
        execution_name: row.get(1)?,
        requested_by: row.get(2)?,
        environment: row.get(3)?,
        browser: row.get(4)?,
        screen_capture: row.get(5)?,
        scheduled_at,
        frequency: row.get(7)?,
        test_list: test_list_raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        status,
        active: row.get::<_, i64>(10)? != 0,
    })
}
