//! Request encoding and snapshot decoding for the engine wire contract.
//!
//! Payloads are UTF-8 JSON objects. Decoding is lenient about content
//! (missing or unknown fields fall back to zero/empty) and strict about
//! structure (anything that is not a JSON object is a protocol error).

use thiserror::Error;

use crate::types::{
    Command, EntitySample, Request, Snapshot, SnapshotStatus, WireRequest, WireResponse,
};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0} requires a target service")]
    MissingTarget(&'static str),
    #[error("response is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode_request(req: &Request) -> Result<Vec<u8>, ProtocolError> {
    let target = req
        .target_entity
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if req.command == Command::GetStatus && target.is_none() {
        return Err(ProtocolError::MissingTarget(req.command.as_wire()));
    }
    let wire = WireRequest {
        command: req.command.as_wire(),
        target_service: target,
        interval_ms: req.interval_ms,
    };
    Ok(serde_json::to_vec(&wire)?)
}

pub fn decode_snapshot(payload: &[u8]) -> Result<Snapshot, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    let wire: WireResponse = serde_json::from_str(text)?;

    let error_message = wire.error.filter(|e| !e.is_empty());
    let status = if error_message.is_some() || wire.status.eq_ignore_ascii_case("ERROR") {
        SnapshotStatus::Error
    } else {
        SnapshotStatus::Ok
    };

    let per_entity = wire.services.map(|list| {
        list.into_iter()
            .map(|s| EntitySample {
                name: s.name,
                cpu_percent: s.cpu,
                memory_mb: s.memory_mb,
            })
            .collect()
    });

    Ok(Snapshot {
        status,
        status_text: wire.status,
        cpu_percent: wire.cpu,
        memory_mb: wire.memory_mb,
        uptime_seconds: wire.uptime_seconds,
        error_message,
        per_entity,
    })
}

/// Liveness check result for a PING response.
pub fn is_pong(snapshot: &Snapshot) -> bool {
    snapshot.status_text == "PONG"
}
