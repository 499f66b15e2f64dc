//! Shared engine state: the sysinfo handle, tracked services and their history.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::sync::{Mutex, Notify};

use crate::types::Reading;

pub const MAX_HISTORY: usize = 3600;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const MIN_INTERVAL_MS: u64 = 500;

pub type SharedSystem = Arc<Mutex<System>>;
pub type SharedHistory = Arc<Mutex<BTreeMap<String, VecDeque<Reading>>>>;

#[derive(Clone)]
pub struct EngineState {
    pub sys: SharedSystem,
    /// Latest readings per tracked service, oldest first.
    pub history: SharedHistory,
    /// Service names sampled by the background loop, keyed by process key.
    pub tracked: Arc<Mutex<BTreeMap<String, String>>>,
    pub interval_ms: Arc<AtomicU64>,
    /// Pinged when the interval changes so the sampler picks it up at once.
    pub wake_sampler: Arc<Notify>,
}

impl EngineState {
    pub fn new<I, S>(watch: I, interval_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        crate::metrics::refresh(&mut sys);

        let tracked = watch
            .into_iter()
            .map(|s| -> String { s.into() })
            .filter(|s| !s.trim().is_empty())
            .map(|s| (crate::metrics::process_key(&s), s))
            .collect();

        Self {
            sys: Arc::new(Mutex::new(sys)),
            history: Arc::new(Mutex::new(BTreeMap::new())),
            tracked: Arc::new(Mutex::new(tracked)),
            interval_ms: Arc::new(AtomicU64::new(interval_ms.max(MIN_INTERVAL_MS))),
            wake_sampler: Arc::new(Notify::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, ms: u64) {
        self.interval_ms.store(ms, Ordering::Relaxed);
        self.wake_sampler.notify_one();
    }

    /// Start sampling `service` on every pass. Returns false if it was already tracked.
    pub async fn track(&self, service: &str) -> bool {
        let key = crate::metrics::process_key(service);
        let mut tracked = self.tracked.lock().await;
        if tracked.contains_key(&key) {
            return false;
        }
        tracked.insert(key, service.trim().to_string());
        true
    }

    pub async fn tracked_names(&self) -> Vec<String> {
        self.tracked.lock().await.values().cloned().collect()
    }

    pub async fn record(&self, service: &str, reading: Reading) {
        let mut history = self.history.lock().await;
        let dq = history.entry(service.to_string()).or_default();
        dq.push_back(reading);
        while dq.len() > MAX_HISTORY {
            dq.pop_front();
        }
    }
}
