//! Execution records and their status lifecycle.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution.
///
/// `Submitted` rows are picked up by the dispatcher and move to `Started` or
/// `Failed`. Any non-terminal row can be moved to `Stopped` by a teardown.
/// `Completed` is written by the test runner itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Submitted,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "Submitted",
            ExecutionStatus::Started => "Started",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Stopped => "Stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Submitted" => Ok(ExecutionStatus::Submitted),
            "Started" => Ok(ExecutionStatus::Started),
            "Completed" => Ok(ExecutionStatus::Completed),
            "Failed" => Ok(ExecutionStatus::Failed),
            "Stopped" => Ok(ExecutionStatus::Stopped),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// One persisted execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Timestamp-derived row id, also used as the container name.
    pub id: String,
    pub execution_name: String,
    pub requested_by: String,
    pub environment: String,
    pub browser: String,
    pub screen_capture: String,
    pub scheduled_at: DateTime<Utc>,
    pub frequency: String,
    /// Test-case and test-pack names, in run order.
    pub test_list: Vec<String>,
    pub status: ExecutionStatus,
    pub active: bool,
}

/// Fields supplied when submitting a new execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecution {
    pub execution_name: String,
    pub requested_by: String,
    pub environment: String,
    pub browser: String,
    #[serde(default = "default_screen_capture")]
    pub screen_capture: String,
    /// Defaults to now when absent.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default = "default_frequency")]
    pub frequency: String,
    pub test_list: Vec<String>,
}

fn default_screen_capture() -> String {
    "N".to_string()
}

fn default_frequency() -> String {
    "Once".to_string()
}

/// Row id for an execution submitted at `at`: `YYYYMMDDHHMMSS`.
pub fn execution_id_at(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Canonical text form of a timestamp as stored in the database.
///
/// Fixed-width UTC so that string comparison orders by time.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Normalize a delimited test list into runnable names.
///
/// Entries are trimmed and empties dropped; a `.tc` suffix is removed and a
/// `.tp` suffix is expanded to `.testpack`, the form the runner expects.
pub fn normalize_test_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(stem) = s.strip_suffix(".tc") {
                stem.trim_end().to_string()
            } else if let Some(stem) = s.strip_suffix(".tp") {
                format!("{}.testpack", stem.trim_end())
            } else {
                s.to_string()
            }
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join a test list back into its delimited boundary form.
pub fn join_test_list(tests: &[String]) -> String {
    tests.join(",")
}
