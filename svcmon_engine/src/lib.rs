//! svcmon engine: samples per-service CPU and memory and answers local IPC queries.

pub mod frame;
pub mod metrics;
pub mod proto;
pub mod sampler;
pub mod server;
pub mod state;
pub mod types;
