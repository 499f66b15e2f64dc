//! Overview numbers: service counts and whether the engine is reachable.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::catalog::{ServiceEnumerator, ServiceRecord, ServiceStatus};
use crate::ipc::IpcChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Connected,
    RunningNoPipe,
    Stopped,
    NotInstalled,
}

impl EngineStatus {
    /// Ping answer first, then the engine's own OS service state.
    pub fn derive(pong: bool, installed: bool, running: bool) -> Self {
        if pong {
            EngineStatus::Connected
        } else if running {
            EngineStatus::RunningNoPipe
        } else if installed {
            EngineStatus::Stopped
        } else {
            EngineStatus::NotInstalled
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            EngineStatus::Connected => "Connected (Pipe OK)",
            EngineStatus::RunningNoPipe => "Service running, pipe not ready",
            EngineStatus::Stopped => "Installed, stopped",
            EngineStatus::NotInstalled => "Not installed",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub engine_installed: bool,
    pub engine_running: bool,
    pub engine: EngineStatus,
}

impl Dashboard {
    pub fn from_parts(records: &[ServiceRecord], engine_service: &str, pong: bool) -> Self {
        let own = records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(engine_service));
        let engine_installed = own.is_some();
        let engine_running = own.is_some_and(|r| r.status == ServiceStatus::Running);
        Self {
            total: records.len(),
            running: records.iter().filter(|r| r.status == ServiceStatus::Running).count(),
            stopped: records.iter().filter(|r| r.status == ServiceStatus::Stopped).count(),
            engine_installed,
            engine_running,
            engine: EngineStatus::derive(pong, engine_installed, engine_running),
        }
    }

    /// Enumeration failure counts as zero services and an absent engine.
    pub async fn collect(
        enumerator: &dyn ServiceEnumerator,
        channel: &IpcChannel,
        engine_service: &str,
        timeout: Duration,
    ) -> Self {
        let records = enumerator.enumerate().await.unwrap_or_else(|e| {
            warn!(error = %e, "service enumeration failed");
            Vec::new()
        });
        let pong = channel.ping(timeout).await;
        Self::from_parts(&records, engine_service, pong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord {
            name: name.into(),
            display_name: name.into(),
            status,
        }
    }

    #[test]
    fn ping_wins_over_service_state() {
        assert_eq!(EngineStatus::derive(true, false, false), EngineStatus::Connected);
        assert_eq!(EngineStatus::derive(false, true, true).text(), "Service running, pipe not ready");
        assert_eq!(EngineStatus::derive(false, true, false).text(), "Installed, stopped");
        assert_eq!(EngineStatus::derive(false, false, false).text(), "Not installed");
    }

    #[test]
    fn counts_and_engine_entry() {
        let records = vec![
            rec("a", ServiceStatus::Running),
            rec("servicemonitorcore", ServiceStatus::Stopped),
            rec("c", ServiceStatus::Paused),
        ];
        let d = Dashboard::from_parts(&records, "ServiceMonitorCore", false);
        assert_eq!((d.total, d.running, d.stopped), (3, 1, 1));
        assert!(d.engine_installed);
        assert!(!d.engine_running);
        assert_eq!(d.engine, EngineStatus::Stopped);
    }
}
