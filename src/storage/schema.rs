//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            execution_name TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            environment TEXT NOT NULL,
            browser TEXT NOT NULL DEFAULT 'chrome',
            screen_capture TEXT NOT NULL DEFAULT 'N',
            scheduled_at TEXT NOT NULL,
            frequency TEXT NOT NULL DEFAULT 'Once',
            test_list TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Submitted',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_executions_eligible
            ON executions(status, active, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_executions_name ON executions(execution_name);

        CREATE TABLE IF NOT EXISTS activity_log (
            id TEXT PRIMARY KEY,
            user_name TEXT NOT NULL,
            action TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '',
            hostname TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_activity_log_created ON activity_log(created_at);",
    )?;

    // Migration: Add 'last_updated_by' to executions if missing
    let has_updated_by: i32 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info('executions') WHERE name='last_updated_by'",
        [],
        |row| row.get(0)
    ).unwrap_or(0);

    if has_updated_by == 0 {
         conn.execute("ALTER TABLE executions ADD COLUMN last_updated_by TEXT", [])?;
    }

    Ok(())
}
