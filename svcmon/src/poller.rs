//! Timer-driven acquisition: the aggregate (all services) and detail (one
//! service) pollers, and the start/stop loop that drives them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::history::{push_capped, SeriesStore, DEFAULT_WINDOW};
use crate::ipc::{IpcChannel, DEFAULT_REQUEST_TIMEOUT};
use crate::types::Request;

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);
pub const DETAIL_CAPACITY: usize = 300;
pub const UNAVAILABLE: &str = "N/A";
pub const NO_READING: &str = "—";

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scrolling X axis: fixed width, slides once more ticks than `window` have elapsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    window: usize,
    tick: u64,
    min: f64,
    max: f64,
}

impl TimeAxis {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            tick: 0,
            min: 0.0,
            max: window as f64,
        }
    }

    pub fn advance(&mut self) {
        self.tick += 1;
        if self.tick > self.window as u64 {
            self.min += 1.0;
            self.max += 1.0;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

/// Result of one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still running.
    Skipped,
    /// No target configured.
    Idle,
    Bulk { sampled: usize },
    PerEntity { sampled: usize },
    Unavailable,
}

/// Something a [`PollLoop`] can drive.
pub trait Tick: Send + Sync + 'static {
    fn tick(&self) -> BoxFuture<'_, TickOutcome>;
}

// Held for the duration of a tick; a second tick that cannot take it is skipped.
pub(crate) struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Busy(flag))
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One rendered line on the aggregate chart.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesView {
    pub name: String,
    pub color: (u8, u8, u8),
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
}

/// Copy of the aggregate chart state at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFrame {
    pub tick: u64,
    pub x_bounds: (f64, f64),
    pub series: Vec<SeriesView>,
}

struct AggregateState {
    store: SeriesStore,
    axis: TimeAxis,
    running: Vec<String>,
}

/// Feeds every monitored service into a [`SeriesStore`].
pub struct AggregatePoller {
    channel: Arc<IpcChannel>,
    window: usize,
    timeout: Duration,
    state: Mutex<AggregateState>,
    busy: AtomicBool,
}

impl AggregatePoller {
    pub fn new(channel: Arc<IpcChannel>, window: usize) -> Self {
        let window = if window == 0 { DEFAULT_WINDOW } else { window };
        Self {
            channel,
            window,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(AggregateState {
                store: SeriesStore::new(),
                axis: TimeAxis::new(window),
                running: Vec::new(),
            }),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Services polled one by one when the engine has no bulk answer.
    pub fn set_running_entities(&self, names: Vec<String>) {
        lock(&self.state).running = names;
    }

    pub fn sync_visibility(&self, names: &[String]) {
        lock(&self.state).store.sync_visibility(names);
    }

    /// Apply the catalog's chart flags; see `SeriesStore::sync_chart_flags`.
    pub fn sync_chart_flags(&self, flags: &[(String, bool)]) {
        lock(&self.state).store.sync_chart_flags(flags.iter().map(|(n, f)| (n.as_str(), *f)));
    }

    /// Catalog flag change for one service, remembered for series not sampled yet.
    pub fn set_visible(&self, name: &str, visible: bool) {
        lock(&self.state).store.set_chart_flag(name, visible);
    }

    pub fn clear(&self) {
        let mut st = lock(&self.state);
        st.store.clear();
        st.axis.reset();
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&SeriesStore) -> R) -> R {
        f(&lock(&self.state).store)
    }

    pub fn frame(&self) -> ChartFrame {
        let st = lock(&self.state);
        ChartFrame {
            tick: st.axis.tick(),
            x_bounds: st.axis.bounds(),
            series: st
                .store
                .rendered()
                .map(|s| SeriesView {
                    name: s.name.clone(),
                    color: s.color(),
                    cpu: s.cpu.iter().copied().collect(),
                    memory: s.memory.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// One acquisition cycle. Never fails: unreachable services are just not sampled.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_busy) = Busy::try_acquire(&self.busy) else {
            trace!("aggregate tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let bulk = match self.channel.send(&Request::all_status(), self.timeout).await {
            Ok(snap) if snap.has_bulk() => snap.per_entity,
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "bulk status unavailable");
                None
            }
        };

        let outcome = match bulk {
            Some(samples) => {
                let mut st = lock(&self.state);
                for s in &samples {
                    st.store.record_sample(&s.name, s.cpu_percent, s.memory_mb, self.window);
                }
                TickOutcome::Bulk {
                    sampled: samples.len(),
                }
            }
            None => {
                let running = lock(&self.state).running.clone();
                let mut sampled = 0;
                for name in running {
                    match self.channel.send(&Request::status(name.as_str()), self.timeout).await {
                        Ok(snap) if snap.is_ok() => {
                            lock(&self.state).store.record_sample(
                                &name,
                                snap.cpu_percent,
                                snap.memory_mb,
                                self.window,
                            );
                            sampled += 1;
                        }
                        Ok(_) => trace!(service = %name, "no reading"),
                        Err(e) => trace!(service = %name, error = %e, "status request failed"),
                    }
                }
                TickOutcome::PerEntity { sampled }
            }
        };

        lock(&self.state).axis.advance();
        outcome
    }
}

impl Tick for AggregatePoller {
    fn tick(&self) -> BoxFuture<'_, TickOutcome> {
        AggregatePoller::tick(self).boxed()
    }
}

/// Latest detail view values.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailReading {
    pub target: String,
    pub cpu_label: String,
    pub memory_label: String,
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub x_bounds: (f64, f64),
}

struct DetailState {
    target: String,
    cpu: VecDeque<f64>,
    memory: VecDeque<f64>,
    cpu_label: String,
    memory_label: String,
    axis: TimeAxis,
}

/// Polls a single service for the detail chart.
pub struct DetailPoller {
    channel: Arc<IpcChannel>,
    timeout: Duration,
    state: Mutex<DetailState>,
    busy: AtomicBool,
}

impl DetailPoller {
    pub fn new(channel: Arc<IpcChannel>) -> Self {
        Self {
            channel,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(DetailState {
                target: String::new(),
                cpu: VecDeque::with_capacity(DETAIL_CAPACITY),
                memory: VecDeque::with_capacity(DETAIL_CAPACITY),
                cpu_label: NO_READING.to_string(),
                memory_label: NO_READING.to_string(),
                axis: TimeAxis::new(DETAIL_CAPACITY),
            }),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_target(&self, name: impl Into<String>) {
        lock(&self.state).target = name.into();
    }

    pub fn target(&self) -> String {
        lock(&self.state).target.clone()
    }

    pub fn clear(&self) {
        let mut st = lock(&self.state);
        st.cpu.clear();
        st.memory.clear();
        st.cpu_label = NO_READING.to_string();
        st.memory_label = NO_READING.to_string();
        st.axis.reset();
    }

    pub fn reading(&self) -> DetailReading {
        let st = lock(&self.state);
        DetailReading {
            target: st.target.clone(),
            cpu_label: st.cpu_label.clone(),
            memory_label: st.memory_label.clone(),
            cpu: st.cpu.iter().copied().collect(),
            memory: st.memory.iter().copied().collect(),
            x_bounds: st.axis.bounds(),
        }
    }

    /// A failed request records a zero point and labels the reading unavailable.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_busy) = Busy::try_acquire(&self.busy) else {
            return TickOutcome::Skipped;
        };
        let target = self.target();
        if target.trim().is_empty() {
            return TickOutcome::Idle;
        }

        let reading = match self.channel.send(&Request::status(target.as_str()), self.timeout).await {
            Ok(snap) if snap.is_ok() => Some((snap.cpu_percent, snap.memory_mb)),
            Ok(snap) => {
                debug!(service = %target, error = ?snap.error_message, "engine returned an error");
                None
            }
            Err(e) => {
                debug!(service = %target, error = %e, "detail reading unavailable");
                None
            }
        };

        let mut st = lock(&self.state);
        let (cpu, mem, outcome) = match reading {
            Some((cpu, mem)) => {
                st.cpu_label = format!("{cpu:.2} %");
                st.memory_label = format!("{mem:.1} MB");
                (cpu, mem, TickOutcome::PerEntity { sampled: 1 })
            }
            None => {
                st.cpu_label = UNAVAILABLE.to_string();
                st.memory_label = UNAVAILABLE.to_string();
                (0.0, 0.0, TickOutcome::Unavailable)
            }
        };
        push_capped(&mut st.cpu, cpu, DETAIL_CAPACITY);
        push_capped(&mut st.memory, mem, DETAIL_CAPACITY);
        st.axis.advance();
        outcome
    }
}

impl Tick for DetailPoller {
    fn tick(&self) -> BoxFuture<'_, TickOutcome> {
        DetailPoller::tick(self).boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Fixed-period driver for a [`Tick`]. `start` and `stop` are idempotent.
///
/// Stopping ends the timer at once; a tick already in progress runs to
/// completion, bounded by its own request timeouts.
pub struct PollLoop {
    name: &'static str,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl PollLoop {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LoopState {
        match lock(&self.running).as_ref() {
            Some(r) if !r.handle.is_finished() => LoopState::Running,
            _ => LoopState::Idle,
        }
    }

    /// Returns false if the loop was already running. Must be called inside a Tokio runtime.
    pub fn start(&self, target: Arc<dyn Tick>) -> bool {
        let mut slot = lock(&self.running);
        if slot.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let (stop, mut stopped) = watch::channel(false);
        let period = self.period;
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        let outcome = target.tick().await;
                        trace!(poller = name, ?outcome, "tick");
                    }
                }
            }
            debug!(poller = name, "poll loop stopped");
        });
        *slot = Some(Running { stop, handle });
        debug!(poller = name, period_ms = period.as_millis() as u64, "poll loop started");
        true
    }

    /// Stop the timer. Returns the task handle so callers may wait for an
    /// in-flight tick; `None` if the loop was idle.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let running = lock(&self.running).take()?;
        let _ = running.stop.send(true);
        Some(running.handle)
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        if let Some(r) = lock(&self.running).take() {
            let _ = r.stop.send(true);
        }
    }
}
