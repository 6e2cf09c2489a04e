//! IPC protocol definitions (JSON messages)

use crate::collector::Pid;
use crate::detector::LeakAlertEvent;
use crate::events::{MonitorEvent, SnapshotEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Track { params: PidParams },
    Untrack { params: PidParams },
    ListTracked,
    SetThreshold { params: SetThresholdParams },
    GetSummary,
    ExportHistory {
        #[serde(default)]
        params: ExportParams,
    },
    GetSnapshot,
    GetSystemInfo,
    ProcessDetails { params: PidParams },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidParams {
    pub pid: Pid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetThresholdParams {
    pub mb_per_min: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportParams {
    /// Only the newest `limit` rows.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Snapshot { data: SnapshotEvent },
    Alert { data: LeakAlertEvent },
    ProcessLost { data: ProcessLostData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessLostData {
    pub pid: Pid,
    pub reason: String,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Response {
            id: None,
            data: serde_json::json!({ "error": message.to_string() }),
        }
    }
}

impl From<MonitorEvent> for Response {
    fn from(event: MonitorEvent) -> Self {
        match event {
            MonitorEvent::Snapshot(data) => Response::Snapshot { data },
            MonitorEvent::LeakAlert(data) => Response::Alert { data },
            MonitorEvent::ProcessLost { pid, reason } => Response::ProcessLost {
                data: ProcessLostData { pid, reason },
            },
        }
    }
}
