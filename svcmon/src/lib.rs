//! svcmon core: engine IPC client, live telemetry series and the service catalog.

pub mod admin;
pub mod catalog;
pub mod dashboard;
pub mod frame;
pub mod history;
pub mod ipc;
pub mod poller;
pub mod proto;
pub mod session;
pub mod settings;
pub mod types;
