//! Wire types for the runlet HTTP API.
//!
//! Every endpoint exchanges small JSON envelopes. The server builds them from
//! the process manager's results and `runletctl` decodes them, so both sides
//! share the definitions in this crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Program and arguments separated by whitespace.
    pub command: String,
}

/// A process identifier, used as the `/start` response and the `/stop` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRef {
    pub uuid: String,
}

/// Body returned by `POST /stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
}

impl StopResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Body returned by `GET /list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// One `"<id> <name> <ACTIVE|TERMINATED>"` line per process.
    pub list: Vec<String>,
    /// Structured form of the same entries.
    #[serde(default)]
    pub processes: Vec<ProcessSummary>,
}

impl ListResponse {
    pub fn new(processes: Vec<ProcessSummary>) -> Self {
        Self {
            list: processes.iter().map(ToString::to_string).collect(),
            processes,
        }
    }
}

/// Body returned by `GET /status`. `None` means the process is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Option<TerminalState>,
}

/// Body returned by `GET /log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogResponse {
    pub log: String,
    /// Set when output beyond the server's log cap was dropped.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Body returned by `POST /purge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

/// Body returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Coarse process status shown by `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Active,
    Terminated,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Terminated => f.write_str("TERMINATED"),
        }
    }
}

/// One entry of a user's process list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub id: String,
    pub name: String,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
}

impl fmt::Display for ProcessSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.name, self.status)
    }
}

/// Recorded exit condition of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalState {
    /// Exit code, absent when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal on Unix.
    pub signal: Option<i32>,
    pub success: bool,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(sig)) => match signal_name(sig) {
                Some(name) => write!(f, "killed by {name} (signal {sig})"),
                None => write!(f, "killed by signal {sig}"),
            },
            (None, None) => f.write_str("exited (unknown status)"),
        }
    }
}

fn signal_name(sig: i32) -> Option<&'static str> {
    match sig {
        1 => Some("SIGHUP"),
        2 => Some("SIGINT"),
        6 => Some("SIGABRT"),
        9 => Some("SIGKILL"),
        11 => Some("SIGSEGV"),
        13 => Some("SIGPIPE"),
        15 => Some("SIGTERM"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(exit_code: Option<i32>, signal: Option<i32>) -> TerminalState {
        TerminalState {
            exit_code,
            signal,
            success: exit_code == Some(0),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_terminal_state_display() {
        assert_eq!(state(Some(0), None).to_string(), "exited with code 0");
        assert_eq!(state(Some(2), None).to_string(), "exited with code 2");
        assert_eq!(
            state(None, Some(9)).to_string(),
            "killed by SIGKILL (signal 9)"
        );
        assert_eq!(state(None, Some(42)).to_string(), "killed by signal 42");
        assert_eq!(state(None, None).to_string(), "exited (unknown status)");
    }

    #[test]
    fn test_list_response_renders_lines() {
        let summary = ProcessSummary {
            id: "95bf5b81-74bc-47e7-8622-e2aace3e866f".to_string(),
            name: "sleep".to_string(),
            status: ProcessStatus::Active,
            started_at: Utc::now(),
        };
        let response = ListResponse::new(vec![summary]);
        assert_eq!(
            response.list,
            vec!["95bf5b81-74bc-47e7-8622-e2aace3e866f sleep ACTIVE".to_string()]
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["processes"][0]["status"], "ACTIVE");
    }

    #[test]
    fn test_status_response_null_when_running() {
        let value = serde_json::to_value(StatusResponse { status: None }).unwrap();
        assert_eq!(value, json!({ "status": null }));
    }

    #[test]
    fn test_log_response_omits_truncated_when_false() {
        let value = serde_json::to_value(LogResponse {
            log: "hello\n".to_string(),
            truncated: false,
        })
        .unwrap();
        assert_eq!(value, json!({ "log": "hello\n" }));
    }

    #[test]
    fn test_start_request_decodes() {
        let request: StartRequest = serde_json::from_str(r#"{"command":"ls -la"}"#).unwrap();
        assert_eq!(request.command, "ls -la");
    }
}
