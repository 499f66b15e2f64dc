//! Request/response client for the engine's local IPC endpoint.
//!
//! One [`IpcChannel`] owns at most one live connection. Every request goes
//! through a FIFO gate (a `tokio::sync::Mutex`), so exactly one round trip is
//! in flight at a time and concurrent callers are served in arrival order.
//! Any failure during a round trip drops the connection; the next call starts
//! from a fresh connect attempt instead of reusing a half-broken stream.

use std::io;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::frame::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
use crate::proto::{decode_snapshot, encode_request, is_pong, ProtocolError};
use crate::types::{Request, Snapshot};

pub const DEFAULT_PIPE_NAME: &str = "ServiceMonitorPipe";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("engine is not connected")]
    NotConnected,
    #[error("cannot reach engine: {0}")]
    Connect(#[source] io::Error),
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("engine closed the channel")]
    PeerClosed,
    #[error("frame of {0} bytes exceeds the channel limit")]
    FrameTooLarge(usize),
    #[error("channel I/O failed: {0}")]
    Io(#[source] io::Error),
}

impl From<FrameError> for IpcError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::PeerClosed => IpcError::PeerClosed,
            FrameError::TooLarge(n) => IpcError::FrameTooLarge(n),
            FrameError::Io(e) => IpcError::Io(e),
        }
    }
}

/// A connected duplex stream that moves whole messages.
pub trait Transport: Send {
    fn send_message<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), FrameError>>;
    fn recv_message(&mut self) -> BoxFuture<'_, Result<Vec<u8>, FrameError>>;
}

/// Opens new transports to the engine.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn Transport>>>;
}

/// Length-prefixed framing over any byte stream.
pub struct FramedStream<S> {
    io: S,
    max_frame: usize,
}

impl<S> FramedStream<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            max_frame: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl<S> Transport for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send_message<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), FrameError>> {
        write_frame(&mut self.io, payload, self.max_frame).boxed()
    }

    fn recv_message(&mut self) -> BoxFuture<'_, Result<Vec<u8>, FrameError>> {
        read_frame(&mut self.io, self.max_frame).boxed()
    }
}

/// Resolve a pipe name to the platform endpoint.
///
/// Windows uses `\\.\pipe\<name>`. Elsewhere a Unix domain socket in the temp
/// dir stands in for the pipe; a name containing a path separator is used as
/// the socket path verbatim.
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

/// Connects to the engine's local endpoint on this machine.
pub struct LocalConnector {
    endpoint: String,
}

impl LocalConnector {
    pub fn new(pipe_name: &str) -> Self {
        Self {
            endpoint: endpoint_for(pipe_name),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Connector for LocalConnector {
    #[cfg(unix)]
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn Transport>>> {
        async move {
            let stream = tokio::net::UnixStream::connect(&self.endpoint).await?;
            Ok(Box::new(FramedStream::new(stream)) as Box<dyn Transport>)
        }
        .boxed()
    }

    #[cfg(windows)]
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn Transport>>> {
        use tokio::net::windows::named_pipe::ClientOptions;
        const ERROR_PIPE_BUSY: i32 = 231;

        async move {
            // All server instances busy: back off and retry; the caller bounds this with a timeout.
            let client = loop {
                match ClientOptions::new().open(&self.endpoint) {
                    Ok(client) => break client,
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            };
            Ok(Box::new(FramedStream::new(client)) as Box<dyn Transport>)
        }
        .boxed()
    }

    #[cfg(not(any(unix, windows)))]
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn Transport>>> {
        futures::future::ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no local IPC transport on this platform",
        )))
        .boxed()
    }
}

type Slot = Option<Box<dyn Transport>>;

pub struct IpcChannel {
    connector: Box<dyn Connector>,
    gate: Mutex<Slot>,
    state: watch::Sender<ChannelState>,
    connect_timeout: Duration,
}

impl IpcChannel {
    pub fn new(connector: impl Connector + 'static) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            connector: Box::new(connector),
            gate: Mutex::new(None),
            state,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn local(pipe_name: &str) -> Self {
        Self::new(LocalConnector::new(pipe_name))
    }

    /// Bound for the implicit connect attempt made by [`IpcChannel::send`].
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Watch connection state changes ("engine reachable" signal).
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// (Re)connect. An existing connection is torn down first.
    pub async fn connect(&self, timeout: Duration) -> Result<(), IpcError> {
        let mut slot = self.gate.lock().await;
        self.connect_locked(&mut slot, timeout).await
    }

    pub async fn disconnect(&self) {
        let mut slot = self.gate.lock().await;
        self.teardown(&mut slot);
    }

    /// One request/response round trip.
    ///
    /// When no connection exists, exactly one connect attempt is made (bounded
    /// by the connect timeout); if it fails the call returns `NotConnected`.
    pub async fn send(&self, req: &Request, timeout: Duration) -> Result<Snapshot, IpcError> {
        let payload = encode_request(req)?;

        let mut slot = self.gate.lock().await;
        if slot.is_none() {
            if let Err(e) = self.connect_locked(&mut slot, self.connect_timeout).await {
                debug!(error = %e, "engine unreachable");
                return Err(IpcError::NotConnected);
            }
        }
        let Some(transport) = slot.as_mut() else {
            return Err(IpcError::NotConnected);
        };

        let outcome = match tokio::time::timeout(timeout, round_trip(transport.as_mut(), &payload))
            .await
        {
            Ok(Ok(bytes)) => decode_snapshot(&bytes).map_err(IpcError::from),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(IpcError::Timeout("request", timeout)),
        };

        if let Err(e) = &outcome {
            warn!(command = req.command.as_wire(), error = %e, "engine request failed");
            self.teardown(&mut slot);
        }
        outcome
    }

    /// Liveness probe: true only for a `PONG` answer.
    pub async fn ping(&self, timeout: Duration) -> bool {
        match self.send(&Request::ping(), timeout).await {
            Ok(snap) => is_pong(&snap),
            Err(_) => false,
        }
    }

    async fn connect_locked(&self, slot: &mut Slot, timeout: Duration) -> Result<(), IpcError> {
        if slot.take().is_some() {
            debug!("dropping previous engine connection");
        }
        self.state.send_replace(ChannelState::Connecting);
        match tokio::time::timeout(timeout, self.connector.connect()).await {
            Ok(Ok(transport)) => {
                *slot = Some(transport);
                self.state.send_replace(ChannelState::Connected);
                debug!("connected to engine");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state.send_replace(ChannelState::Faulted);
                Err(IpcError::Connect(e))
            }
            Err(_) => {
                self.state.send_replace(ChannelState::Faulted);
                Err(IpcError::Timeout("connect", timeout))
            }
        }
    }

    fn teardown(&self, slot: &mut Slot) {
        slot.take();
        self.state.send_replace(ChannelState::Disconnected);
    }
}

async fn round_trip(transport: &mut dyn Transport, payload: &[u8]) -> Result<Vec<u8>, IpcError> {
    transport.send_message(payload).await?;
    Ok(transport.recv_message().await?)
}
