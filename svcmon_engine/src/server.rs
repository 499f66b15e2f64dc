//! Local IPC endpoint: a Unix domain socket, or a named pipe on Windows.
//! Every connection runs its own request/response loop.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::frame::{read_frame, write_frame};
use crate::proto::handle_request;
use crate::state::EngineState;

pub const DEFAULT_PIPE_NAME: &str = "ServiceMonitorPipe";

/// `\\.\pipe\<name>` on Windows; elsewhere `<tmp>/<name>.sock`, or the name
/// itself when it already looks like a path.
pub fn endpoint_for(pipe_name: &str) -> String {
    #[cfg(windows)]
    {
        if pipe_name.starts_with(r"\\") {
            pipe_name.to_string()
        } else {
            format!(r"\\.\pipe\{pipe_name}")
        }
    }
    #[cfg(not(windows))]
    {
        if pipe_name.contains('/') {
            pipe_name.to_string()
        } else {
            std::env::temp_dir()
                .join(format!("{pipe_name}.sock"))
                .to_string_lossy()
                .into_owned()
        }
    }
}

async fn handle_connection<S>(mut io: S, state: EngineState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("client connected");
    loop {
        match read_frame(&mut io).await {
            Ok(Some(req)) => {
                let resp = handle_request(&state, &req).await;
                if let Err(e) = write_frame(&mut io, &resp).await {
                    debug!(error = %e, "client went away mid-reply");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "dropping client");
                break;
            }
        }
    }
    debug!("client disconnected");
}

#[cfg(unix)]
pub struct Listener {
    inner: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl Listener {
    /// A stale socket file from a previous run is replaced.
    pub fn bind(endpoint: &str) -> io::Result<Self> {
        let path = std::path::PathBuf::from(endpoint);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let inner = tokio::net::UnixListener::bind(&path)?;
        info!(endpoint, "listening");
        Ok(Self { inner, path })
    }

    pub async fn serve(self, state: EngineState) -> io::Result<()> {
        loop {
            let (stream, _) = self.inner.accept().await?;
            tokio::spawn(handle_connection(stream, state.clone()));
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(windows)]
pub struct Listener {
    name: String,
    next: tokio::net::windows::named_pipe::NamedPipeServer,
}

#[cfg(windows)]
impl Listener {
    pub fn bind(endpoint: &str) -> io::Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;
        let next = ServerOptions::new().first_pipe_instance(true).create(endpoint)?;
        info!(endpoint, "listening");
        Ok(Self {
            name: endpoint.to_string(),
            next,
        })
    }

    pub async fn serve(mut self, state: EngineState) -> io::Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;
        loop {
            self.next.connect().await?;
            // The next instance must exist before this one is handed off.
            let connected = std::mem::replace(&mut self.next, ServerOptions::new().create(&self.name)?);
            tokio::spawn(handle_connection(connected, state.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_like_names_are_kept() {
        #[cfg(not(windows))]
        {
            assert_eq!(endpoint_for("/run/svcmon.sock"), "/run/svcmon.sock");
            assert!(endpoint_for("ServiceMonitorPipe").ends_with("ServiceMonitorPipe.sock"));
        }
        #[cfg(windows)]
        assert_eq!(endpoint_for("ServiceMonitorPipe"), r"\\.\pipe\ServiceMonitorPipe");
    }
}
