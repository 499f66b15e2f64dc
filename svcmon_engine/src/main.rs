//! svcmon_engine: samples tracked services and serves the local IPC endpoint.

use std::env;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use svcmon_engine::sampler::spawn_sampler;
use svcmon_engine::server::{endpoint_for, Listener, DEFAULT_PIPE_NAME};
use svcmon_engine::state::{EngineState, DEFAULT_INTERVAL_MS, MIN_INTERVAL_MS};

const USAGE: &str = "Usage: svcmon_engine [--pipe NAME|-p NAME] [--interval-ms MS|-i MS] [--watch a,b,c|-w a,b,c]";

#[derive(Debug, PartialEq)]
struct EngineArgs {
    pipe: String,
    interval_ms: u64,
    watch: Vec<String>,
}

/// `Ok(None)` when help was asked for.
fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Option<EngineArgs>, String> {
    let mut it = args.into_iter();
    let _prog = it.next();
    let mut pipe = DEFAULT_PIPE_NAME.to_string();
    let mut interval_ms = DEFAULT_INTERVAL_MS;
    let mut watch = Vec::new();

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = || inline.clone().or_else(|| it.next()).ok_or_else(|| format!("{flag} needs a value\n{USAGE}"));
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "--pipe" | "-p" => pipe = value()?,
            "--interval-ms" | "-i" => {
                let raw = value()?;
                interval_ms = raw
                    .parse()
                    .map_err(|_| format!("invalid interval: {raw}"))?;
                if interval_ms < MIN_INTERVAL_MS {
                    return Err(format!("interval must be at least {MIN_INTERVAL_MS} ms"));
                }
            }
            "--watch" | "-w" => watch.extend(
                value()?
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            ),
            _ => return Err(format!("unexpected argument: {arg}\n{USAGE}")),
        }
    }
    Ok(Some(EngineArgs {
        pipe,
        interval_ms,
        watch,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args = match parse_args(env::args()) {
        Ok(Some(a)) => a,
        Ok(None) => {
            eprintln!("{USAGE}");
            return Ok(());
        }
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let state = EngineState::new(args.watch.iter().cloned(), args.interval_ms);
    let sampler = spawn_sampler(state.clone());
    let endpoint = endpoint_for(&args.pipe);
    let listener = Listener::bind(&endpoint).with_context(|| format!("cannot listen on {endpoint}"))?;
    info!(
        watch = args.watch.len(),
        interval_ms = args.interval_ms,
        "engine started"
    );

    tokio::select! {
        res = listener.serve(state) => {
            if let Err(e) = &res {
                error!(error = %e, "listener failed");
            }
            res.context("listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    sampler.abort();
    Ok(())
}
