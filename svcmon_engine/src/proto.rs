//! Request dispatch for the engine wire protocol.

use thiserror::Error;
use tracing::debug;

use crate::metrics;
use crate::state::{EngineState, MIN_INTERVAL_MS};
use crate::types::{HistoryEntry, Request, Response, ServiceEntry, ServiceList};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("targetService is required")]
    MissingTarget,
    #[error("Interval must be >= 500ms")]
    IntervalTooShort,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Decode, dispatch and encode one request. Failures become an `error` reply.
pub async fn handle_request(state: &EngineState, raw: &[u8]) -> Vec<u8> {
    let resp = match dispatch(state, raw).await {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "request rejected");
            Response::error(e.to_string())
        }
    };
    serde_json::to_vec(&resp).unwrap_or_else(|_| br#"{"error":"encoding failed"}"#.to_vec())
}

async fn dispatch(state: &EngineState, raw: &[u8]) -> Result<Response, RequestError> {
    let req: Request = serde_json::from_slice(raw)?;
    match req.command.as_str() {
        "PING" => Ok(Response::status("PONG")),
        "GET_STATUS" => {
            let target = req
                .target_service
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(RequestError::MissingTarget)?;
            get_status(state, target).await
        }
        "GET_ALL_STATUS" => {
            let history = state.history.lock().await;
            let services = history
                .iter()
                .filter_map(|(name, dq)| {
                    dq.back().map(|r| ServiceEntry {
                        name: name.clone(),
                        cpu: r.cpu_percent,
                        memory_mb: r.memory_mb,
                    })
                })
                .collect();
            Ok(Response {
                services: Some(ServiceList::Latest(services)),
                ..Response::status("OK")
            })
        }
        "GET_HISTORY" => {
            let history = state.history.lock().await;
            let services = history
                .iter()
                .map(|(name, dq)| HistoryEntry {
                    name: name.clone(),
                    cpu: dq.iter().map(|r| r.cpu_percent).collect(),
                    memory_mb: dq.iter().map(|r| r.memory_mb).collect(),
                })
                .collect();
            Ok(Response {
                services: Some(ServiceList::History(services)),
                ..Response::status("OK")
            })
        }
        "SET_INTERVAL" => {
            let ms = req.interval_ms.unwrap_or(1000);
            let ms = u64::try_from(ms).map_err(|_| RequestError::IntervalTooShort)?;
            if ms < MIN_INTERVAL_MS {
                return Err(RequestError::IntervalTooShort);
            }
            state.set_interval(ms);
            Ok(Response::status("OK"))
        }
        other => Err(RequestError::UnknownCommand(other.to_string())),
    }
}

async fn get_status(state: &EngineState, target: &str) -> Result<Response, RequestError> {
    if state.track(target).await {
        debug!(service = target, "now tracking");
    }
    let sys = state.sys.lock().await;
    let reading = metrics::resolve(&sys, target).and_then(|pid| metrics::read_process(&sys, pid));
    Ok(match reading {
        Some(r) => Response {
            cpu: Some(r.cpu_percent),
            memory_mb: Some(r.memory_mb),
            uptime_seconds: Some(r.uptime_seconds),
            ..Response::status("Running")
        },
        None => Response {
            cpu: Some(0.0),
            memory_mb: Some(0.0),
            uptime_seconds: Some(0),
            ..Response::status("Unknown")
        },
    })
}
