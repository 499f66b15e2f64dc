//! Per-service measurements using sysinfo.
//!
//! A service is resolved to a process by name (case-insensitive, a trailing
//! `.exe` ignored). Several services may resolve to the same process; each
//! process is measured once per pass and the reading shared.

use std::collections::HashMap;
use std::ffi::OsStr;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::types::Reading;

/// Refresh process CPU and memory. CPU usage is relative to the previous refresh.
pub fn refresh(sys: &mut System) {
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cpu().with_memory(),
    );
}

/// Lookup key for a service or process name.
pub fn process_key(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

/// Per-process CPU divided by core count, clamped to 0..=100.
pub fn normalize_cpu(raw: f32, cores: usize) -> f64 {
    let v = f64::from(raw) / cores.max(1) as f64;
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Lowest matching PID, so repeated lookups are stable.
pub fn resolve(sys: &System, service: &str) -> Option<Pid> {
    let key = process_key(service);
    sys.processes()
        .values()
        .filter(|p| name_matches(p.name(), &key))
        .map(|p| p.pid())
        .min_by_key(|pid| pid.as_u32())
}

fn name_matches(name: &OsStr, key: &str) -> bool {
    process_key(&name.to_string_lossy()) == key
}

pub fn read_process(sys: &System, pid: Pid) -> Option<Reading> {
    let p = sys.process(pid)?;
    Some(Reading {
        cpu_percent: normalize_cpu(p.cpu_usage(), sys.cpus().len()),
        memory_mb: p.memory() as f64 / (1024.0 * 1024.0),
        uptime_seconds: i64::try_from(p.run_time()).unwrap_or(i64::MAX),
    })
}

/// Resolve every service, measuring each distinct process once.
pub fn share_by_process<K, R, M>(services: &[String], mut resolve: R, mut measure: M) -> Vec<(String, Option<Reading>)>
where
    K: std::hash::Hash + Eq + Copy,
    R: FnMut(&str) -> Option<K>,
    M: FnMut(K) -> Option<Reading>,
{
    let mut per_process: HashMap<K, Option<Reading>> = HashMap::new();
    services
        .iter()
        .map(|name| {
            let reading = resolve(name).and_then(|k| *per_process.entry(k).or_insert_with(|| measure(k)));
            (name.clone(), reading)
        })
        .collect()
}

pub fn collect(sys: &System, services: &[String]) -> Vec<(String, Option<Reading>)> {
    share_by_process(services, |s| resolve(sys, s), |pid| read_process(sys, pid))
}
