//! Entry point for the svcmon operator CLI. Parses args and runs one command.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Local;
use tracing_subscriber::EnvFilter;

use svcmon::admin::{EngineAction, EngineAdmin, ProcessRunner, ENGINE_SERVICE_NAME};
use svcmon::catalog::{
    CommandEnumerator, Comparator, FilterSpec, ServiceCatalog, SortColumn, SortDirection, SortSpec,
    Threshold,
};
use svcmon::dashboard::Dashboard;
use svcmon::ipc::{IpcChannel, DEFAULT_REQUEST_TIMEOUT};
use svcmon::poller::DetailPoller;
use svcmon::session::Session;
use svcmon::settings::{load_settings, load_settings_from, Settings};
use svcmon::types::Request;

const USAGE: &str = "Usage: svcmon [--pipe NAME|-p NAME] [--config PATH|-c PATH] <COMMAND>

Commands:
  ping                          check that the engine answers
  status <SERVICE>              one reading for a service
  interval <MS>                 change the engine sampling interval
  services [--running] [--search TEXT] [--sort COLUMN] [--desc] [--min-cpu PCT]
                                list services with their last telemetry
  watch [--top N] [--count N]   live aggregate readings, one line per tick
  detail <SERVICE> [--count N]  live readings for one service
  dashboard                     service counts and engine state
  engine <install|uninstall|start|stop>
                                manage the engine's own OS service";

#[derive(Debug, PartialEq)]
enum Cmd {
    Ping,
    Status(String),
    Interval(u32),
    Services {
        running_only: bool,
        search: Option<String>,
        sort: Option<SortColumn>,
        descending: bool,
        min_cpu: Option<f64>,
    },
    Watch {
        top: usize,
        count: Option<u64>,
    },
    Detail {
        service: String,
        count: Option<u64>,
    },
    Dashboard,
    Engine(EngineAction),
}

#[derive(Debug)]
struct ParsedArgs {
    pipe: Option<String>,
    config: Option<PathBuf>,
    help: bool,
    cmd: Option<Cmd>,
}

fn value<I: Iterator<Item = String>>(it: &mut I, flag: &str) -> Result<String, String> {
    it.next().ok_or_else(|| format!("{flag} needs a value\n\n{USAGE}"))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid value for {flag}: {raw}"))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let _prog = it.next();
    let mut pipe = None;
    let mut config = None;
    let mut help = false;
    let mut words: Vec<String> = Vec::new();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => help = true,
            "--pipe" | "-p" => pipe = Some(value(&mut it, "--pipe")?),
            "--config" | "-c" => config = Some(PathBuf::from(value(&mut it, "--config")?)),
            _ if arg.starts_with("--pipe=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    pipe = Some(v.to_string());
                }
            }
            _ if arg.starts_with("--config=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    config = Some(PathBuf::from(v));
                }
            }
            _ => words.push(arg),
        }
    }

    if help {
        return Ok(ParsedArgs {
            pipe,
            config,
            help,
            cmd: None,
        });
    }

    let mut rest = words.into_iter();
    let cmd = match rest.next().as_deref() {
        None => return Err(USAGE.to_string()),
        Some("ping") => Cmd::Ping,
        Some("status") => Cmd::Status(value(&mut rest, "status")?),
        Some("interval") => Cmd::Interval(number(&value(&mut rest, "interval")?, "interval")?),
        Some("services") => {
            let mut running_only = false;
            let mut search = None;
            let mut sort = None;
            let mut descending = false;
            let mut min_cpu = None;
            while let Some(a) = rest.next() {
                match a.as_str() {
                    "--running" => running_only = true,
                    "--desc" => descending = true,
                    "--search" => search = Some(value(&mut rest, "--search")?),
                    "--sort" => sort = Some(value(&mut rest, "--sort")?.parse::<SortColumn>()?),
                    "--min-cpu" => min_cpu = Some(number(&value(&mut rest, "--min-cpu")?, "--min-cpu")?),
                    other => return Err(format!("unexpected argument: {other}\n\n{USAGE}")),
                }
            }
            Cmd::Services {
                running_only,
                search,
                sort,
                descending,
                min_cpu,
            }
        }
        Some("watch") => {
            let mut top = 10;
            let mut count = None;
            while let Some(a) = rest.next() {
                match a.as_str() {
                    "--top" => top = number(&value(&mut rest, "--top")?, "--top")?,
                    "--count" => count = Some(number(&value(&mut rest, "--count")?, "--count")?),
                    other => return Err(format!("unexpected argument: {other}\n\n{USAGE}")),
                }
            }
            Cmd::Watch { top, count }
        }
        Some("detail") => {
            let service = value(&mut rest, "detail")?;
            let mut count = None;
            while let Some(a) = rest.next() {
                match a.as_str() {
                    "--count" => count = Some(number(&value(&mut rest, "--count")?, "--count")?),
                    other => return Err(format!("unexpected argument: {other}\n\n{USAGE}")),
                }
            }
            Cmd::Detail { service, count }
        }
        Some("dashboard") => Cmd::Dashboard,
        Some("engine") => Cmd::Engine(match value(&mut rest, "engine")?.as_str() {
            "install" => EngineAction::Install,
            "uninstall" => EngineAction::Uninstall,
            "start" => EngineAction::Start,
            "stop" => EngineAction::Stop,
            other => return Err(format!("unknown engine action: {other}\n\n{USAGE}")),
        }),
        Some(other) => return Err(format!("unknown command: {other}\n\n{USAGE}")),
    };

    if let Some(extra) = rest.next() {
        return Err(format!("unexpected argument: {extra}\n\n{USAGE}"));
    }

    Ok(ParsedArgs {
        pipe,
        config,
        help,
        cmd: Some(cmd),
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };
    if parsed.help {
        println!("{USAGE}");
        return Ok(());
    }

    let mut settings = match &parsed.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if let Some(pipe) = parsed.pipe {
        settings.pipe_name = pipe;
    }

    let Some(cmd) = parsed.cmd else {
        return Ok(());
    };
    run(cmd, &settings).await
}

async fn run(cmd: Cmd, settings: &Settings) -> anyhow::Result<()> {
    let channel = Arc::new(IpcChannel::local(&settings.pipe_name));
    let timeout = DEFAULT_REQUEST_TIMEOUT;

    match cmd {
        Cmd::Ping => {
            if channel.ping(timeout).await {
                println!("PONG");
            } else {
                bail!("engine is not reachable on pipe '{}'", settings.pipe_name);
            }
        }
        Cmd::Status(service) => {
            let snap = channel
                .send(&Request::status(service.as_str()), timeout)
                .await
                .context("status request failed")?;
            if !snap.is_ok() {
                bail!(
                    "{}",
                    snap.error_message.unwrap_or_else(|| snap.status_text.clone())
                );
            }
            println!(
                "{service}: cpu {:.2} %  memory {:.1} MB  uptime {}s",
                snap.cpu_percent, snap.memory_mb, snap.uptime_seconds
            );
        }
        Cmd::Interval(ms) => {
            let snap = channel
                .send(&Request::set_interval(ms), timeout)
                .await
                .context("interval request failed")?;
            match snap.error_message {
                Some(e) => bail!("{e}"),
                None => println!("sampling interval set to {ms} ms"),
            }
        }
        Cmd::Services {
            running_only,
            search,
            sort,
            descending,
            min_cpu,
        } => {
            let enumerator = CommandEnumerator::new(ProcessRunner);
            let mut catalog = ServiceCatalog::default();
            if let Some(text) = search {
                catalog.set_search_text(text);
            }
            catalog.refresh(&enumerator, &channel, timeout).await;
            let filter = FilterSpec {
                stopped: !running_only,
                other: !running_only,
                cpu: min_cpu.map(|value| Threshold {
                    op: Comparator::AtLeast,
                    value,
                }),
                ..FilterSpec::default()
            };
            catalog.apply_filter(filter);
            if let Some(column) = sort {
                catalog.apply_sort(SortSpec {
                    column: Some(column),
                    direction: if descending {
                        SortDirection::Descending
                    } else {
                        SortDirection::Ascending
                    },
                });
            }
            print_catalog(&catalog);
        }
        Cmd::Watch { top, count } => {
            let enumerator = CommandEnumerator::new(ProcessRunner);
            let session = Session::new(channel.clone(), Box::new(enumerator), settings);
            session.refresh_catalog().await;
            let mut ticker = tokio::time::interval(Duration::from_millis(
                settings.monitoring_interval_ms.max(100),
            ));
            let mut n = 0u64;
            session.start();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        print_frame(&session, top);
                        n += 1;
                        if count.is_some_and(|c| n >= c) {
                            break;
                        }
                    }
                }
            }
            session.stop();
        }
        Cmd::Detail { service, count } => {
            let poller = DetailPoller::new(channel.clone());
            poller.set_target(service.as_str());
            let mut ticker = tokio::time::interval(Duration::from_millis(
                settings.monitoring_interval_ms.max(100),
            ));
            let mut n = 0u64;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => {
                        poller.tick().await;
                        let r = poller.reading();
                        println!(
                            "{}  {service}  cpu {}  memory {}",
                            Local::now().format("%H:%M:%S"),
                            r.cpu_label,
                            r.memory_label
                        );
                        n += 1;
                        if count.is_some_and(|c| n >= c) {
                            break;
                        }
                    }
                }
            }
        }
        Cmd::Dashboard => {
            let enumerator = CommandEnumerator::new(ProcessRunner);
            let d = Dashboard::collect(&enumerator, &channel, ENGINE_SERVICE_NAME, timeout).await;
            println!("Services: {} total, {} running, {} stopped", d.total, d.running, d.stopped);
            println!("Engine:   {}", d.engine);
        }
        Cmd::Engine(action) => {
            let exe = match action {
                EngineAction::Install => Some(settings.engine_exe()?),
                _ => None,
            };
            let runner = ProcessRunner;
            let msg = EngineAdmin::new(&runner).run(action, exe.as_deref()).await?;
            println!("{msg}");
        }
    }
    Ok(())
}

fn print_catalog(catalog: &ServiceCatalog) {
    let h = catalog.headers();
    println!("{:<6} {:<40} {:<28} {:<10} {:>10} {:>12}", h[0], h[1], h[2], h[3], h[4], h[5]);
    for e in catalog.visible() {
        println!(
            "{:<6} {:<40} {:<28} {:<10} {:>10.2} {:>12.1}",
            if e.show_in_chart { "*" } else { "" },
            truncate(&e.display_name, 40),
            truncate(&e.name, 28),
            e.status.text(),
            e.cpu_percent,
            e.memory_mb
        );
    }
    let summary = catalog.filter().summary();
    if !summary.is_empty() {
        println!("{summary}");
    }
}

fn print_frame(session: &Session, top: usize) {
    let frame = session.chart();
    let mut latest: Vec<(String, f64, f64)> = frame
        .series
        .iter()
        .filter_map(|s| Some((s.name.clone(), *s.cpu.last()?, *s.memory.last()?)))
        .collect();
    latest.sort_by(|a, b| b.1.total_cmp(&a.1));
    latest.truncate(top);
    let body: Vec<String> = latest
        .iter()
        .map(|(name, cpu, mem)| format!("{name} {cpu:.1}%/{mem:.0}MB"))
        .collect();
    println!(
        "{} tick {:>5}  {}",
        Local::now().format("%H:%M:%S"),
        frame.tick,
        if body.is_empty() {
            "(no data)".to_string()
        } else {
            body.join("  ")
        }
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
