//! In-process fake engine used by the integration tests.
#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use svcmon::frame::FrameError;
use svcmon::ipc::{Connector, Transport};

/// Maps a decoded request to the raw reply; `None` makes the peer hang up.
pub type Handler = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct FakeEngine {
    pub up: Arc<AtomicBool>,
    pub connects: Arc<AtomicUsize>,
    pub log: Arc<Mutex<Vec<String>>>,
    pub delay: Duration,
    handler: Handler,
}

impl FakeEngine {
    pub fn new(handler: impl Fn(&Value) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(true)),
            connects: Arc::new(AtomicUsize::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::from_millis(0),
            handler: Arc::new(handler),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

/// Short label for a request: `COMMAND` or `COMMAND target`.
pub fn label(req: &Value) -> String {
    let cmd = req["command"].as_str().unwrap_or("?");
    match req["targetService"].as_str() {
        Some(t) => format!("{cmd} {t}"),
        None => cmd.to_string(),
    }
}

impl Connector for FakeEngine {
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn Transport>>> {
        let engine = self.clone();
        async move {
            if !engine.up.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "engine down"));
            }
            engine.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeTransport {
                engine,
                pending: None,
            }) as Box<dyn Transport>)
        }
        .boxed()
    }
}

struct FakeTransport {
    engine: FakeEngine,
    pending: Option<(String, Option<String>)>,
}

impl Transport for FakeTransport {
    fn send_message<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), FrameError>> {
        async move {
            let req: Value = serde_json::from_slice(payload)
                .map_err(|e| FrameError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            let tag = label(&req);
            self.engine.log.lock().unwrap().push(format!("open {tag}"));
            let reply = (self.engine.handler)(&req);
            self.pending = Some((tag, reply));
            Ok(())
        }
        .boxed()
    }

    fn recv_message(&mut self) -> BoxFuture<'_, Result<Vec<u8>, FrameError>> {
        async move {
            if !self.engine.delay.is_zero() {
                tokio::time::sleep(self.engine.delay).await;
            }
            let (tag, reply) = self.pending.take().ok_or(FrameError::PeerClosed)?;
            self.engine.log.lock().unwrap().push(format!("close {tag}"));
            reply.map(String::into_bytes).ok_or(FrameError::PeerClosed)
        }
        .boxed()
    }
}

/// A well-behaved engine over `services`. Without `bulk` it answers
/// GET_ALL_STATUS with an empty list.
pub fn standard_reply(req: &Value, services: &[(&str, f64, f64)], bulk: bool) -> Option<String> {
    let reply = match req["command"].as_str() {
        Some("PING") => serde_json::json!({"status": "PONG"}),
        Some("GET_STATUS") => {
            let target = req["targetService"].as_str().unwrap_or_default();
            match services.iter().find(|(n, _, _)| n.eq_ignore_ascii_case(target)) {
                Some((_, cpu, mem)) => serde_json::json!({
                    "status": "Running", "cpu": cpu, "memoryMB": mem, "uptimeSeconds": 42
                }),
                None => serde_json::json!({"error": format!("Service '{target}' not found")}),
            }
        }
        Some("GET_ALL_STATUS") => {
            let list: Vec<Value> = services
                .iter()
                .filter(|_| bulk)
                .map(|(n, c, m)| serde_json::json!({"name": n, "cpu": c, "memoryMB": m}))
                .collect();
            serde_json::json!({"status": "OK", "services": list})
        }
        _ => serde_json::json!({"error": "Unknown command"}),
    };
    Some(reply.to_string())
}
