//! Types that mirror the engine's JSON schema.

use serde::{Deserialize, Serialize};

/// Engine command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    GetStatus,
    GetAllStatus,
    SetInterval,
}

impl Command {
    pub fn as_wire(self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::GetStatus => "GET_STATUS",
            Command::GetAllStatus => "GET_ALL_STATUS",
            Command::SetInterval => "SET_INTERVAL",
        }
    }
}

/// One query to the engine. Built per call and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub target_entity: Option<String>,
    pub interval_ms: Option<u32>,
}

impl Request {
    pub fn ping() -> Self {
        Self {
            command: Command::Ping,
            target_entity: None,
            interval_ms: None,
        }
    }

    pub fn status(target: impl Into<String>) -> Self {
        Self {
            command: Command::GetStatus,
            target_entity: Some(target.into()),
            interval_ms: None,
        }
    }

    pub fn all_status() -> Self {
        Self {
            command: Command::GetAllStatus,
            target_entity: None,
            interval_ms: None,
        }
    }

    pub fn set_interval(interval_ms: u32) -> Self {
        Self {
            command: Command::SetInterval,
            target_entity: None,
            interval_ms: Some(interval_ms),
        }
    }
}

// Request as it goes over the wire; unused fields are omitted.
#[derive(Debug, Serialize)]
pub(crate) struct WireRequest<'a> {
    pub command: &'a str,
    #[serde(rename = "targetService", skip_serializing_if = "Option::is_none")]
    pub target_service: Option<&'a str>,
    #[serde(rename = "intervalMs", skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u32>,
}

// Response as it comes off the wire; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireResponse {
    pub status: String,
    pub cpu: f64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: i64,
    pub error: Option<String>,
    pub services: Option<Vec<WireServiceSample>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WireServiceSample {
    pub name: String,
    pub cpu: f64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Ok,
    Error,
}

/// Per-entity reading carried by a bulk response.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySample {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Result of one engine query. Discarded after being merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub status: SnapshotStatus,
    /// Raw `status` string as the engine sent it ("OK", "PONG", "Running", ...).
    pub status_text: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub uptime_seconds: i64,
    pub error_message: Option<String>,
    pub per_entity: Option<Vec<EntitySample>>,
}

impl Snapshot {
    pub fn is_ok(&self) -> bool {
        self.status == SnapshotStatus::Ok
    }

    /// True when the response carried at least one per-entity reading.
    pub fn has_bulk(&self) -> bool {
        self.per_entity.as_ref().is_some_and(|v| !v.is_empty())
    }
}
