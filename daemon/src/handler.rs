//! Maps IPC requests onto the monitor's control surface

use crate::collector::Pid;
use crate::protocol::{Request, Response};
use crate::scheduler::Monitor;
use crate::socket::RequestHandler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
struct TrackedEntry {
    pid: Pid,
    tracked_since: DateTime<Utc>,
}

pub struct MonitorHandler {
    monitor: Monitor,
}

impl MonitorHandler {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

#[async_trait::async_trait]
impl RequestHandler for MonitorHandler {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Track { params } => match self.monitor.track(params.pid).await {
                Ok(outcome) => Response::ok(json!({
                    "success": true,
                    "pid": params.pid,
                    "outcome": outcome,
                })),
                Err(e) => Response::error(e),
            },

            Request::Untrack { params } => match self.monitor.untrack(params.pid).await {
                Ok(()) => Response::ok(json!({"success": true, "pid": params.pid})),
                Err(e) => Response::error(e),
            },

            Request::ListTracked => {
                let entries: Vec<TrackedEntry> = self
                    .monitor
                    .inspect(|state| {
                        state
                            .registry()
                            .iter()
                            .map(|process| TrackedEntry {
                                pid: process.pid(),
                                tracked_since: process.tracked_since(),
                            })
                            .collect()
                    })
                    .await;
                to_response(&entries)
            }

            Request::SetThreshold { params } => {
                match self.monitor.set_threshold(params.mb_per_min).await {
                    Ok(()) => Response::ok(json!({
                        "success": true,
                        "threshold_mb_per_min": params.mb_per_min,
                    })),
                    Err(e) => Response::error(e),
                }
            }

            Request::GetSummary => match self.monitor.get_summary().await {
                Some(summary) => to_response(&summary),
                None => Response::ok(json!({})),
            },

            Request::ExportHistory { params } => {
                let table = self.monitor.export_history().await;
                let table = match params.limit {
                    Some(limit) => table.tail(limit),
                    None => table,
                };
                let rows: Vec<Vec<String>> = table.rows.iter().map(|row| row.cells()).collect();
                Response::ok(json!({
                    "columns": table.columns,
                    "rows": rows,
                }))
            }

            Request::GetSnapshot => match self.monitor.latest_snapshot() {
                Some(snapshot) => Response::Snapshot { data: snapshot },
                None => Response::error("no snapshot recorded yet"),
            },

            Request::GetSystemInfo => to_response(self.monitor.system_info()),

            Request::ProcessDetails { params } => match self.monitor.process_details(params.pid) {
                Ok(details) => to_response(&details),
                Err(e) => Response::error(format!("Could not get process details: {}", e)),
            },
        }
    }
}

fn to_response<T: Serialize + ?Sized>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(data) => Response::ok(data),
        Err(e) => Response::error(e),
    }
}
