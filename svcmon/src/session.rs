//! The monitoring session: one engine channel shared by the catalog refresh
//! loop and the telemetry poll loop.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use crate::catalog::{fetch, FilterSpec, ServiceCatalog, ServiceEnumerator, SortColumn, TOP_N_DEFAULT};
use crate::ipc::{IpcChannel, DEFAULT_REQUEST_TIMEOUT};
use crate::poller::{lock, AggregatePoller, Busy, ChartFrame, PollLoop, Tick, TickOutcome};
use crate::settings::Settings;

pub const CATALOG_PERIOD: Duration = Duration::from_secs(3);

struct CatalogRefresher {
    enumerator: Box<dyn ServiceEnumerator>,
    channel: Arc<IpcChannel>,
    timeout: Duration,
    catalog: Mutex<ServiceCatalog>,
    aggregate: Arc<AggregatePoller>,
    busy: AtomicBool,
}

impl CatalogRefresher {
    async fn refresh(&self) -> TickOutcome {
        let Some(_busy) = Busy::try_acquire(&self.busy) else {
            return TickOutcome::Skipped;
        };
        let search = lock(&self.catalog).search_text().to_string();
        let fetched = fetch(self.enumerator.as_ref(), &self.channel, self.timeout, &search).await;

        let (running, chart) = {
            let mut catalog = lock(&self.catalog);
            catalog.apply_fetch(fetched);
            (catalog.running_names(), catalog.chart_flags())
        };
        let sampled = running.len();
        self.aggregate.set_running_entities(running);
        self.aggregate.sync_chart_flags(&chart);
        TickOutcome::PerEntity { sampled }
    }
}

impl Tick for CatalogRefresher {
    fn tick(&self) -> BoxFuture<'_, TickOutcome> {
        self.refresh().boxed()
    }
}

pub struct Session {
    channel: Arc<IpcChannel>,
    refresher: Arc<CatalogRefresher>,
    aggregate: Arc<AggregatePoller>,
    catalog_loop: PollLoop,
    poll_loop: PollLoop,
}

impl Session {
    pub fn new(
        channel: Arc<IpcChannel>,
        enumerator: Box<dyn ServiceEnumerator>,
        settings: &Settings,
    ) -> Self {
        let aggregate = Arc::new(AggregatePoller::new(channel.clone(), settings.window()));
        let refresher = Arc::new(CatalogRefresher {
            enumerator,
            channel: channel.clone(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            catalog: Mutex::new(ServiceCatalog::new(TOP_N_DEFAULT)),
            aggregate: aggregate.clone(),
            busy: AtomicBool::new(false),
        });
        let poll_period = Duration::from_millis(settings.monitoring_interval_ms.max(100));
        Self {
            channel,
            refresher,
            aggregate,
            catalog_loop: PollLoop::new("catalog", CATALOG_PERIOD),
            poll_loop: PollLoop::new("telemetry", poll_period),
        }
    }

    /// Start both loops. Idempotent.
    pub fn start(&self) {
        let started = self.catalog_loop.start(self.refresher.clone())
            | self.poll_loop.start(self.aggregate.clone());
        if started {
            info!("monitoring session started");
        }
    }

    /// Stop both timers; in-flight requests finish on their own.
    pub fn stop(&self) {
        let stopped = self.catalog_loop.stop().is_some() | self.poll_loop.stop().is_some();
        if stopped {
            info!("monitoring session stopped");
        }
    }

    /// Run one catalog refresh now, outside the timer.
    pub async fn refresh_catalog(&self) -> TickOutcome {
        self.refresher.refresh().await
    }

    pub async fn poll_once(&self) -> TickOutcome {
        self.aggregate.tick().await
    }

    pub fn channel(&self) -> &Arc<IpcChannel> {
        &self.channel
    }

    pub fn aggregate(&self) -> &Arc<AggregatePoller> {
        &self.aggregate
    }

    pub fn chart(&self) -> ChartFrame {
        self.aggregate.frame()
    }

    pub fn with_catalog<R>(&self, f: impl FnOnce(&ServiceCatalog) -> R) -> R {
        f(&lock(&self.refresher.catalog))
    }

    pub fn apply_filter(&self, filter: FilterSpec) {
        lock(&self.refresher.catalog).apply_filter(filter);
    }

    pub fn toggle_sort(&self, column: SortColumn) {
        lock(&self.refresher.catalog).toggle_sort(column);
    }

    pub fn set_search_text(&self, text: &str) {
        lock(&self.refresher.catalog).set_search_text(text);
    }

    /// Flag a service for charting; the chart follows immediately.
    pub fn set_show_in_chart(&self, name: &str, show: bool) -> bool {
        let known = lock(&self.refresher.catalog).set_show_in_chart(name, show);
        if known {
            self.aggregate.set_visible(name, show);
        }
        known
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
