//! User activity recording.
//!
//! Orchestration code records user-facing events (submissions, stops,
//! retriggers) through the [`ActivityLog`] trait. Recording is best effort:
//! implementations swallow and log their own failures.

use chrono::Utc;
use rusqlite::params;
use tracing::{info, warn};
use uuid::Uuid;

use crate::execution::format_timestamp;
use crate::storage::Pool;

/// Well-known activity actions.
pub mod actions {
    pub const EXECUTION_SUBMITTED: &str = "Execution Submitted";
    pub const EXECUTION_RETRIGGERED: &str = "Execution Retriggered";
    pub const EXECUTION_STOPPED: &str = "Execution Stopped";
}

#[async_trait::async_trait]
pub trait ActivityLog: Send + Sync {
    /// Record that `user` performed `action`. Never fails.
    async fn record(&self, user: &str, action: &str, context: &str);
}

/// Activity log persisted to the `activity_log` table.
#[derive(Clone)]
pub struct SqliteActivityLog {
    pool: Pool,
    hostname: Option<String>,
}

impl SqliteActivityLog {
    pub fn new(pool: Pool) -> Self {
        let hostname = std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty());
        Self { pool, hostname }
    }
}

#[async_trait::async_trait]
impl ActivityLog for SqliteActivityLog {
    async fn record(&self, user: &str, action: &str, context: &str) {
        let pool = self.pool.clone();
        let hostname = self.hostname.clone();
        let (user, action, context) = (user.to_string(), action.to_string(), context.to_string());

        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO activity_log (id, user_name, action, context, hostname, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    user,
                    action,
                    context,
                    hostname,
                    format_timestamp(Utc::now())
                ],
            )?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "activity logging failed"),
            Err(e) => warn!(error = %e, "activity logging task failed"),
        }
    }
}

/// Activity log that only emits a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityLog;

#[async_trait::async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(&self, user: &str, action: &str, context: &str) {
        info!(%user, %action, %context, "activity");
    }
}
