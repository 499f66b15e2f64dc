//! Administrative command execution and the engine's own OS registration.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::settings::SettingsError;

pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const ENGINE_SERVICE_NAME: &str = "ServiceMonitorCore";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    NotConfigured(#[from] SettingsError),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Operator-facing text: stderr when it has content, stdout otherwise.
    pub fn message(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// Runs an external command to completion with a bounded wait.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        argv: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, AdminError>>;
}

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        argv: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, AdminError>> {
        async move {
            let (program, args) = argv.split_first().ok_or(AdminError::EmptyCommand)?;
            let started = Instant::now();
            let child = tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| AdminError::Spawn {
                    program: program.clone(),
                    source,
                })?;

            let out = match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(out)) => out,
                Ok(Err(source)) => {
                    return Err(AdminError::Spawn {
                        program: program.clone(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(AdminError::TimedOut {
                        program: program.clone(),
                        timeout,
                    })
                }
            };

            Ok(CommandOutput {
                success: out.status.success(),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                elapsed: started.elapsed(),
            })
        }
        .boxed()
    }
}

/// Service manager flavour used to build command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Systemd,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Systemd
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    Install,
    Uninstall,
    Start,
    Stop,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Command line for one engine action. Install is a two-step sequence on
/// Windows (create, then restart-on-failure policy).
pub fn engine_commands(
    platform: Platform,
    action: EngineAction,
    service: &str,
    exe: Option<&Path>,
) -> Result<Vec<Vec<String>>, AdminError> {
    match (platform, action) {
        (Platform::Windows, EngineAction::Install) => {
            let exe = exe.ok_or(AdminError::NotConfigured(SettingsError::EnginePathUnset))?;
            let exe = exe.to_string_lossy().into_owned();
            Ok(vec![
                argv(&["sc.exe", "create", service, "binPath=", exe.as_str(), "start=", "demand"]),
                argv(&[
                    "sc.exe",
                    "failure",
                    service,
                    "reset=",
                    "86400",
                    "actions=",
                    "restart/5000/restart/5000/restart/5000",
                ]),
            ])
        }
        (Platform::Windows, EngineAction::Uninstall) => Ok(vec![argv(&["sc.exe", "delete", service])]),
        (Platform::Windows, EngineAction::Start) => Ok(vec![argv(&["sc.exe", "start", service])]),
        (Platform::Windows, EngineAction::Stop) => Ok(vec![argv(&["sc.exe", "stop", service])]),
        (Platform::Systemd, EngineAction::Start) => {
            let unit = format!("{service}.service");
            Ok(vec![argv(&["systemctl", "start", unit.as_str()])])
        }
        (Platform::Systemd, EngineAction::Stop) => {
            let unit = format!("{service}.service");
            Ok(vec![argv(&["systemctl", "stop", unit.as_str()])])
        }
        (Platform::Systemd, EngineAction::Install) => Err(AdminError::Unsupported("engine install")),
        (Platform::Systemd, EngineAction::Uninstall) => {
            Err(AdminError::Unsupported("engine uninstall"))
        }
    }
}

/// Registers, removes, starts and stops the engine's OS service.
pub struct EngineAdmin<'r> {
    runner: &'r dyn CommandRunner,
    platform: Platform,
    service: String,
    timeout: Duration,
}

impl<'r> EngineAdmin<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            platform: Platform::current(),
            service: ENGINE_SERVICE_NAME.to_string(),
            timeout: ADMIN_TIMEOUT,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Run `action`; `exe` is only consulted for install. Returns an operator message.
    pub async fn run(&self, action: EngineAction, exe: Option<&Path>) -> Result<String, AdminError> {
        let commands = engine_commands(self.platform, action, &self.service, exe)?;
        let mut commands = commands.into_iter();
        let Some(primary) = commands.next() else {
            return Err(AdminError::EmptyCommand);
        };

        let out = self.runner.run(&primary, self.timeout).await?;
        if !out.success {
            let msg = out.message();
            warn!(service = %self.service, ?action, output = %msg, "engine command failed");
            return Err(AdminError::Failed(msg));
        }
        info!(service = %self.service, ?action, elapsed_ms = out.elapsed.as_millis() as u64, "engine command ok");

        // Follow-up steps (restart policy) are best effort.
        for follow in commands {
            match self.runner.run(&follow, self.timeout).await {
                Ok(o) if o.success => {}
                Ok(o) => warn!(output = %o.message(), "engine follow-up command failed"),
                Err(e) => warn!(error = %e, "engine follow-up command failed"),
            }
        }

        Ok(match action {
            EngineAction::Install => "Service registered with auto-restart on crash.".to_string(),
            EngineAction::Uninstall => "Service removed successfully.".to_string(),
            EngineAction::Start => "Monitoring engine is now running.".to_string(),
            EngineAction::Stop => "Monitoring engine stopped.".to_string(),
        })
    }
}
