//! Service catalog: the OS service list merged with last-known telemetry,
//! plus the filter/sort projection the list view renders.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::admin::{AdminError, CommandRunner, Platform, ADMIN_TIMEOUT};
use crate::ipc::IpcChannel;
use crate::types::Request;

pub const TOP_N_DEFAULT: usize = 10;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("service enumeration failed: {0}")]
    Enumeration(String),
    #[error(transparent)]
    Command(#[from] AdminError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Paused,
    Starting,
    Stopping,
    Resuming,
    Pausing,
    Unknown,
}

impl ServiceStatus {
    pub fn text(self) -> &'static str {
        match self {
            ServiceStatus::Running => "Running",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::Paused => "Paused",
            ServiceStatus::Starting => "Starting",
            ServiceStatus::Stopping => "Stopping",
            ServiceStatus::Resuming => "Resuming",
            ServiceStatus::Pausing => "Pausing",
            ServiceStatus::Unknown => "Unknown",
        }
    }

    pub fn is_running(self) -> bool {
        self == ServiceStatus::Running
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// One service as reported by the OS service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub display_name: String,
    pub status: ServiceStatus,
}

/// Lists OS services.
pub trait ServiceEnumerator: Send + Sync {
    fn enumerate(&self) -> BoxFuture<'_, Result<Vec<ServiceRecord>, CatalogError>>;
}

/// Parse `sc.exe query type= service state= all` output.
pub fn parse_sc_query(text: &str) -> Vec<ServiceRecord> {
    let mut out = Vec::new();
    let mut current: Option<ServiceRecord> = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("SERVICE_NAME:") {
            out.extend(current.take());
            let name = name.trim().to_string();
            current = Some(ServiceRecord {
                display_name: name.clone(),
                name,
                status: ServiceStatus::Unknown,
            });
        } else if let Some(display) = line.strip_prefix("DISPLAY_NAME:") {
            if let Some(rec) = current.as_mut() {
                rec.display_name = display.trim().to_string();
            }
        } else if line.starts_with("STATE") {
            let code = line
                .split_once(':')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .and_then(|c| c.parse::<u32>().ok());
            if let (Some(rec), Some(code)) = (current.as_mut(), code) {
                rec.status = match code {
                    1 => ServiceStatus::Stopped,
                    2 => ServiceStatus::Starting,
                    3 => ServiceStatus::Stopping,
                    4 => ServiceStatus::Running,
                    5 => ServiceStatus::Resuming,
                    6 => ServiceStatus::Pausing,
                    7 => ServiceStatus::Paused,
                    _ => ServiceStatus::Unknown,
                };
            }
        }
    }
    out.extend(current);
    out
}

/// Parse `systemctl list-units --type=service --all --no-legend --plain` output.
pub fn parse_systemctl_units(text: &str) -> Vec<ServiceRecord> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start_matches(|c: char| c == '●' || c == '*' || c.is_whitespace());
            let mut fields = line.split_whitespace();
            let unit = fields.next()?;
            let name = unit.strip_suffix(".service")?;
            let _load = fields.next()?;
            let active = fields.next()?;
            let sub = fields.next()?;
            let description = fields.collect::<Vec<_>>().join(" ");
            let status = match (active, sub) {
                ("active", "reload") | ("reloading", _) => ServiceStatus::Resuming,
                ("active", _) => ServiceStatus::Running,
                ("inactive", _) | ("failed", _) => ServiceStatus::Stopped,
                ("activating", _) => ServiceStatus::Starting,
                ("deactivating", _) => ServiceStatus::Stopping,
                _ => ServiceStatus::Unknown,
            };
            Some(ServiceRecord {
                name: name.to_string(),
                display_name: if description.is_empty() {
                    name.to_string()
                } else {
                    description
                },
                status,
            })
        })
        .collect()
}

/// Enumerates services by running the platform's service manager CLI.
pub struct CommandEnumerator<R> {
    runner: R,
    platform: Platform,
}

impl<R: CommandRunner> CommandEnumerator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            platform: Platform::current(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    fn argv(&self) -> Vec<String> {
        let parts: &[&str] = match self.platform {
            Platform::Windows => &[
                "sc.exe", "query", "type=", "service", "state=", "all", "bufsize=", "262144",
            ],
            Platform::Systemd => &[
                "systemctl",
                "list-units",
                "--type=service",
                "--all",
                "--no-legend",
                "--no-pager",
                "--plain",
            ],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }
}

impl<R: CommandRunner> ServiceEnumerator for CommandEnumerator<R> {
    fn enumerate(&self) -> BoxFuture<'_, Result<Vec<ServiceRecord>, CatalogError>> {
        async move {
            let argv = self.argv();
            let out = self.runner.run(&argv, ADMIN_TIMEOUT).await?;
            if !out.success {
                return Err(CatalogError::Enumeration(out.message()));
            }
            Ok(match self.platform {
                Platform::Windows => parse_sc_query(&out.stdout),
                Platform::Systemd => parse_systemctl_units(&out.stdout),
            })
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub display_name: String,
    pub status: ServiceStatus,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub uptime_seconds: i64,
    pub show_in_chart: bool,
}

impl CatalogEntry {
    fn load(&self) -> f64 {
        self.cpu_percent + self.memory_mb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    AtLeast,
    AtMost,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::AtLeast => ">=",
            Comparator::AtMost => "<=",
        }
    }

    fn admits(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::AtLeast => value >= threshold,
            Comparator::AtMost => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub op: Comparator,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub running: bool,
    pub stopped: bool,
    pub other: bool,
    pub cpu: Option<Threshold>,
    pub memory: Option<Threshold>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            running: true,
            stopped: true,
            other: true,
            cpu: None,
            memory: None,
        }
    }
}

impl FilterSpec {
    pub fn matches(&self, e: &CatalogEntry) -> bool {
        let status_ok = match e.status {
            ServiceStatus::Running => self.running,
            ServiceStatus::Stopped => self.stopped,
            _ => self.other,
        };
        status_ok
            && self.cpu.map_or(true, |t| t.op.admits(e.cpu_percent, t.value))
            && self.memory.map_or(true, |t| t.op.admits(e.memory_mb, t.value))
    }

    /// e.g. `Active filters: Status: Running  |  CPU >= 5.0%`; empty when nothing is filtered.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !(self.running && self.stopped && self.other) {
            let shown: Vec<&str> = [
                (self.running, "Running"),
                (self.stopped, "Stopped"),
                (self.other, "Other"),
            ]
            .into_iter()
            .filter_map(|(on, label)| on.then_some(label))
            .collect();
            let shown = if shown.is_empty() {
                "None".to_string()
            } else {
                shown.join(", ")
            };
            parts.push(format!("Status: {shown}"));
        }
        if let Some(t) = self.cpu {
            parts.push(format!("CPU {} {:.1}%", t.op.symbol(), t.value));
        }
        if let Some(t) = self.memory {
            parts.push(format!("Memory {} {:.1} MB", t.op.symbol(), t.value));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("Active filters: {}", parts.join("  |  "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortColumn {
    ShowInChart,
    DisplayName,
    ServiceName,
    Status,
    CpuUsage,
    MemoryMb,
}

impl SortColumn {
    pub const ALL: [SortColumn; 6] = [
        SortColumn::ShowInChart,
        SortColumn::DisplayName,
        SortColumn::ServiceName,
        SortColumn::Status,
        SortColumn::CpuUsage,
        SortColumn::MemoryMb,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SortColumn::ShowInChart => "Chart",
            SortColumn::DisplayName => "Display Name",
            SortColumn::ServiceName => "Service Name",
            SortColumn::Status => "Status",
            SortColumn::CpuUsage => "CPU (%)",
            SortColumn::MemoryMb => "Memory (MB)",
        }
    }

    fn compare(self, a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
        match self {
            SortColumn::ShowInChart => a.show_in_chart.cmp(&b.show_in_chart),
            SortColumn::DisplayName => cmp_ci(&a.display_name, &b.display_name),
            SortColumn::ServiceName => cmp_ci(&a.name, &b.name),
            SortColumn::Status => cmp_ci(a.status.text(), b.status.text()),
            SortColumn::CpuUsage => a.cpu_percent.total_cmp(&b.cpu_percent),
            SortColumn::MemoryMb => a.memory_mb.total_cmp(&b.memory_mb),
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ShowInChart" => Ok(SortColumn::ShowInChart),
            "DisplayName" => Ok(SortColumn::DisplayName),
            "ServiceName" => Ok(SortColumn::ServiceName),
            "Status" => Ok(SortColumn::Status),
            "CpuUsage" => Ok(SortColumn::CpuUsage),
            "MemoryMB" | "MemoryMb" => Ok(SortColumn::MemoryMb),
            other => Err(format!("unknown sort column: {other}")),
        }
    }
}

fn cmp_ci(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    None,
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub column: Option<SortColumn>,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Same column cycles None → Ascending → Descending → None; a new column starts Ascending.
    pub fn toggled(self, column: SortColumn) -> SortSpec {
        if self.column == Some(column) {
            let direction = match self.direction {
                SortDirection::None => SortDirection::Ascending,
                SortDirection::Ascending => SortDirection::Descending,
                SortDirection::Descending => SortDirection::None,
            };
            SortSpec {
                column: Some(column),
                direction,
            }
        } else {
            SortSpec {
                column: Some(column),
                direction: SortDirection::Ascending,
            }
        }
    }

    /// Column header text with the sort indicator, if this column is sorted.
    pub fn header(&self, column: SortColumn) -> String {
        let arrow = match (self.column == Some(column), self.direction) {
            (true, SortDirection::Ascending) => " ▲",
            (true, SortDirection::Descending) => " ▼",
            _ => "",
        };
        format!("{}{arrow}", column.label())
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

fn matches_search(needle: &str, r: &ServiceRecord) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return true;
    }
    let needle = needle.to_lowercase();
    r.name.to_lowercase().contains(&needle) || r.display_name.to_lowercase().contains(&needle)
}

/// Raw inputs for one catalog generation.
#[derive(Debug, Default)]
pub struct Fetched {
    pub records: Vec<ServiceRecord>,
    /// Keyed by lowercase service name.
    pub telemetry: HashMap<String, Telemetry>,
}

/// Enumerate services and ask the engine about each running one that matches `search`.
pub async fn fetch(
    enumerator: &dyn ServiceEnumerator,
    channel: &IpcChannel,
    timeout: Duration,
    search: &str,
) -> Result<Fetched, CatalogError> {
    let records = enumerator.enumerate().await?;
    let mut telemetry = HashMap::new();
    for rec in records
        .iter()
        .filter(|r| r.status.is_running() && matches_search(search, r))
    {
        match channel.send(&Request::status(rec.name.as_str()), timeout).await {
            Ok(snap) if snap.is_ok() => {
                telemetry.insert(
                    key(&rec.name),
                    Telemetry {
                        cpu_percent: snap.cpu_percent,
                        memory_mb: snap.memory_mb,
                        uptime_seconds: snap.uptime_seconds,
                    },
                );
            }
            Ok(snap) => debug!(service = %rec.name, error = ?snap.error_message, "engine has no reading"),
            Err(e) => debug!(service = %rec.name, error = %e, "telemetry unavailable"),
        }
    }
    Ok(Fetched { records, telemetry })
}

/// The service list with its current filter/sort projection.
#[derive(Debug)]
pub struct ServiceCatalog {
    entries: Vec<CatalogEntry>,
    view: Vec<usize>,
    filter: FilterSpec,
    sort: SortSpec,
    search_text: String,
    top_n: usize,
    auto_selected: bool,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new(TOP_N_DEFAULT)
    }
}

impl ServiceCatalog {
    pub fn new(top_n: usize) -> Self {
        Self {
            entries: Vec::new(),
            view: Vec::new(),
            filter: FilterSpec::default(),
            sort: SortSpec::default(),
            search_text: String::new(),
            top_n,
            auto_selected: false,
        }
    }

    /// Enumerate services, query telemetry for running ones and rebuild.
    /// Enumeration failure leaves an empty catalog.
    pub async fn refresh(
        &mut self,
        enumerator: &dyn ServiceEnumerator,
        channel: &IpcChannel,
        timeout: Duration,
    ) {
        let fetched = fetch(enumerator, channel, timeout, &self.search_text).await;
        self.apply_fetch(fetched);
    }

    /// Second half of [`ServiceCatalog::refresh`], for callers that do the I/O themselves.
    pub fn apply_fetch(&mut self, fetched: Result<Fetched, CatalogError>) {
        match fetched {
            Ok(f) => self.rebuild_from(f.records, &f.telemetry),
            Err(e) => {
                warn!(error = %e, "service enumeration failed, clearing catalog");
                self.entries.clear();
                self.view.clear();
            }
        }
    }

    /// Replace the entry list from freshly enumerated records.
    ///
    /// `telemetry` is keyed by lowercase service name. Running services without a
    /// fresh reading keep their previous one. The first rebuild marks the top-N
    /// running services by `cpu + memory` for charting; later rebuilds carry the
    /// previous chart flags forward by name.
    pub fn rebuild_from(&mut self, mut records: Vec<ServiceRecord>, telemetry: &HashMap<String, Telemetry>) {
        records.retain(|r| matches_search(&self.search_text, r));
        records.sort_by_cached_key(|r| r.display_name.to_lowercase());

        let previous: HashMap<String, &CatalogEntry> =
            self.entries.iter().map(|e| (key(&e.name), e)).collect();

        let mut next: Vec<CatalogEntry> = records
            .into_iter()
            .map(|r| {
                let k = key(&r.name);
                let prev = previous.get(&k);
                let t = if r.status.is_running() {
                    telemetry.get(&k).copied().or_else(|| {
                        prev.map(|p| Telemetry {
                            cpu_percent: p.cpu_percent,
                            memory_mb: p.memory_mb,
                            uptime_seconds: p.uptime_seconds,
                        })
                    })
                } else {
                    None
                }
                .unwrap_or_default();
                CatalogEntry {
                    name: r.name,
                    display_name: r.display_name,
                    status: r.status,
                    cpu_percent: t.cpu_percent,
                    memory_mb: t.memory_mb,
                    uptime_seconds: t.uptime_seconds,
                    show_in_chart: prev.is_some_and(|p| p.show_in_chart),
                }
            })
            .collect();

        if !self.auto_selected {
            self.auto_selected = true;
            let mut ranked: Vec<usize> = (0..next.len())
                .filter(|&i| next[i].status.is_running())
                .collect();
            // Stable sort: ties keep list order.
            ranked.sort_by(|&a, &b| next[b].load().total_cmp(&next[a].load()));
            for (rank, &i) in ranked.iter().enumerate() {
                next[i].show_in_chart = rank < self.top_n;
            }
            for e in next.iter_mut().filter(|e| !e.status.is_running()) {
                e.show_in_chart = false;
            }
        }

        self.entries = next;
        self.rebuild_view();
    }

    /// Takes effect on the next refresh.
    pub fn set_search_text(&mut self, text: impl Into<String>) {
        self.search_text = text.into();
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn apply_filter(&mut self, filter: FilterSpec) {
        self.filter = filter;
        self.rebuild_view();
    }

    pub fn apply_sort(&mut self, sort: SortSpec) {
        self.sort = sort;
        self.rebuild_view();
    }

    pub fn toggle_sort(&mut self, column: SortColumn) {
        self.apply_sort(self.sort.toggled(column));
    }

    fn rebuild_view(&mut self) {
        let entries = &self.entries;
        let mut view: Vec<usize> = (0..entries.len())
            .filter(|&i| self.filter.matches(&entries[i]))
            .collect();
        if let (Some(col), dir) = (self.sort.column, self.sort.direction) {
            match dir {
                SortDirection::Ascending => {
                    view.sort_by(|&a, &b| col.compare(&entries[a], &entries[b]))
                }
                SortDirection::Descending => {
                    view.sort_by(|&a, &b| col.compare(&entries[b], &entries[a]))
                }
                SortDirection::None => {}
            }
        }
        self.view = view;
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Rows passing the filter, in display order.
    pub fn visible(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.view.iter().map(|&i| &self.entries[i])
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn headers(&self) -> Vec<String> {
        SortColumn::ALL.iter().map(|&c| self.sort.header(c)).collect()
    }

    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        let k = key(name);
        self.entries.iter().find(|e| key(&e.name) == k)
    }

    /// Returns false when no entry has that name.
    pub fn set_show_in_chart(&mut self, name: &str, show: bool) -> bool {
        let k = key(name);
        let Some(e) = self.entries.iter_mut().find(|e| key(&e.name) == k) else {
            return false;
        };
        e.show_in_chart = show;
        // The chart flag is a sort key.
        self.rebuild_view();
        true
    }

    pub fn chart_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.show_in_chart)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Every entry's chart flag, keyed by engine name.
    pub fn chart_flags(&self) -> Vec<(String, bool)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.show_in_chart))
            .collect()
    }

    pub fn running_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.status.is_running())
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn has_auto_selected(&self) -> bool {
        self.auto_selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, display: &str, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord {
            name: name.into(),
            display_name: display.into(),
            status,
        }
    }

    fn tel(pairs: &[(&str, f64, f64)]) -> HashMap<String, Telemetry> {
        pairs
            .iter()
            .map(|&(n, c, m)| {
                (
                    n.to_lowercase(),
                    Telemetry {
                        cpu_percent: c,
                        memory_mb: m,
                        uptime_seconds: 1,
                    },
                )
            })
            .collect()
    }

    fn names<'a>(it: impl Iterator<Item = &'a CatalogEntry>) -> Vec<&'a str> {
        it.map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn entries_are_ordered_by_display_name() {
        let mut cat = ServiceCatalog::default();
        cat.rebuild_from(
            vec![
                rec("z", "beta", ServiceStatus::Stopped),
                rec("y", "Alpha", ServiceStatus::Stopped),
                rec("x", "gamma", ServiceStatus::Stopped),
            ],
            &HashMap::new(),
        );
        assert_eq!(names(cat.visible()), vec!["y", "z", "x"]);
    }

    #[test]
    fn status_filter_keeps_running_in_order() {
        let mut cat = ServiceCatalog::default();
        cat.rebuild_from(
            vec![
                rec("a", "A", ServiceStatus::Running),
                rec("b", "B", ServiceStatus::Stopped),
                rec("c", "C", ServiceStatus::Running),
            ],
            &HashMap::new(),
        );
        cat.apply_filter(FilterSpec {
            running: true,
            stopped: false,
            other: false,
            ..FilterSpec::default()
        });
        assert_eq!(names(cat.visible()), vec!["a", "c"]);
    }

    #[test]
    fn threshold_filters_and_summary() {
        let mut cat = ServiceCatalog::default();
        cat.rebuild_from(
            vec![
                rec("a", "A", ServiceStatus::Running),
                rec("b", "B", ServiceStatus::Running),
                rec("p", "P", ServiceStatus::Paused),
            ],
            &tel(&[("a", 1.0, 100.0), ("b", 9.0, 10.0)]),
        );
        let f = FilterSpec {
            cpu: Some(Threshold {
                op: Comparator::AtLeast,
                value: 5.0,
            }),
            ..FilterSpec::default()
        };
        cat.apply_filter(f);
        assert_eq!(names(cat.visible()), vec!["b"]);

        let f = FilterSpec {
            other: false,
            memory: Some(Threshold {
                op: Comparator::AtMost,
                value: 50.0,
            }),
            ..FilterSpec::default()
        };
        cat.apply_filter(f);
        assert_eq!(names(cat.visible()), vec!["b"]);
        assert_eq!(
            f.summary(),
            "Active filters: Status: Running, Stopped  |  Memory <= 50.0 MB"
        );
        assert_eq!(FilterSpec::default().summary(), "");
    }

    #[test]
    fn toggle_sort_cycles_and_decorates_headers() {
        let mut cat = ServiceCatalog::default();
        cat.rebuild_from(
            vec![
                rec("a", "A", ServiceStatus::Running),
                rec("b", "B", ServiceStatus::Running),
                rec("c", "C", ServiceStatus::Running),
            ],
            &tel(&[("a", 5.0, 0.0), ("b", 1.0, 0.0), ("c", 3.0, 0.0)]),
        );
        let cpu: SortColumn = "CpuUsage".parse().unwrap();

        cat.toggle_sort(cpu);
        assert_eq!(names(cat.visible()), vec!["b", "c", "a"]);
        assert_eq!(cat.sort().header(cpu), "CPU (%) ▲");

        cat.toggle_sort(cpu);
        assert_eq!(names(cat.visible()), vec!["a", "c", "b"]);
        assert_eq!(cat.sort().header(cpu), "CPU (%) ▼");

        cat.toggle_sort(cpu);
        assert_eq!(cat.sort().direction, SortDirection::None);
        assert_eq!(names(cat.visible()), vec!["a", "b", "c"]);
        assert_eq!(cat.sort().header(cpu), "CPU (%)");

        cat.toggle_sort(cpu);
        cat.toggle_sort(SortColumn::ServiceName);
        assert_eq!(cat.sort().direction, SortDirection::Ascending);
        assert_eq!(cat.sort().column, Some(SortColumn::ServiceName));
        assert_eq!(cat.headers()[4], "CPU (%)");
    }

    #[test]
    fn equal_keys_keep_insertion_order_both_directions() {
        let mut cat = ServiceCatalog::default();
        cat.rebuild_from(
            vec![
                rec("a", "A", ServiceStatus::Running),
                rec("b", "B", ServiceStatus::Running),
                rec("c", "C", ServiceStatus::Running),
            ],
            &tel(&[("a", 2.0, 0.0), ("b", 2.0, 0.0), ("c", 1.0, 0.0)]),
        );
        cat.apply_sort(SortSpec {
            column: Some(SortColumn::CpuUsage),
            direction: SortDirection::Descending,
        });
        assert_eq!(names(cat.visible()), vec!["a", "b", "c"]);
    }

    #[test]
    fn first_rebuild_selects_top_n_by_load() {
        let mut cat = ServiceCatalog::new(2);
        cat.rebuild_from(
            vec![
                rec("a", "A", ServiceStatus::Running),
                rec("b", "B", ServiceStatus::Running),
                rec("c", "C", ServiceStatus::Running),
                rec("d", "D", ServiceStatus::Stopped),
            ],
            &tel(&[("a", 1.0, 10.0), ("b", 5.0, 50.0), ("c", 0.0, 12.0)]),
        );
        assert!(cat.has_auto_selected());
        let mut chart = cat.chart_names();
        chart.sort();
        assert_eq!(chart, vec!["b", "c"]);
    }

    #[test]
    fn auto_select_ties_keep_list_order() {
        let mut cat = ServiceCatalog::new(1);
        cat.rebuild_from(
            vec![
                rec("first", "A", ServiceStatus::Running),
                rec("second", "B", ServiceStatus::Running),
            ],
            &tel(&[("first", 1.0, 1.0), ("second", 1.0, 1.0)]),
        );
        assert_eq!(cat.chart_names(), vec!["first"]);
    }

    #[test]
    fn auto_select_runs_once_and_flags_carry_forward() {
        let mut cat = ServiceCatalog::new(1);
        let records = || {
            vec![
                rec("Spooler", "Print Spooler", ServiceStatus::Running),
                rec("w32time", "Windows Time", ServiceStatus::Running),
            ]
        };
        cat.rebuild_from(records(), &tel(&[("spooler", 9.0, 90.0), ("w32time", 1.0, 1.0)]));
        assert_eq!(cat.chart_names(), vec!["Spooler"]);

        // Ranking flips, engine reports a different case: flags still carry forward.
        cat.rebuild_from(
            vec![
                rec("SPOOLER", "Print Spooler", ServiceStatus::Running),
                rec("w32time", "Windows Time", ServiceStatus::Running),
            ],
            &tel(&[("spooler", 0.0, 0.0), ("w32time", 50.0, 500.0)]),
        );
        assert_eq!(cat.chart_names(), vec!["SPOOLER"]);

        assert!(cat.set_show_in_chart("w32time", true));
        cat.rebuild_from(records(), &HashMap::new());
        let mut chart = cat.chart_names();
        chart.sort();
        assert_eq!(chart, vec!["Spooler", "w32time"]);
        // No fresh reading: previous telemetry is kept.
        assert_eq!(cat.find("w32time").unwrap().cpu_percent, 50.0);
    }

    #[test]
    fn search_text_restricts_by_name_or_display_name() {
        let mut cat = ServiceCatalog::default();
        cat.set_search_text("PRINT");
        cat.rebuild_from(
            vec![
                rec("Spooler", "Print Spooler", ServiceStatus::Running),
                rec("printnotify", "Notifier", ServiceStatus::Stopped),
                rec("w32time", "Windows Time", ServiceStatus::Running),
            ],
            &HashMap::new(),
        );
        assert_eq!(names(cat.visible()), vec!["printnotify", "Spooler"]);
    }

    #[test]
    fn parses_sc_query_blocks() {
        let text = "\r\nSERVICE_NAME: Spooler\r\nDISPLAY_NAME: Print Spooler\r\n        TYPE               : 110  WIN32_OWN_PROCESS  (interactive)\r\n        STATE              : 4  RUNNING\r\n                                (STOPPABLE, NOT_PAUSABLE, IGNORES_SHUTDOWN)\r\n        WIN32_EXIT_CODE    : 0  (0x0)\r\n\r\nSERVICE_NAME: wuauserv\r\nDISPLAY_NAME: Windows Update\r\n        TYPE               : 20  WIN32_SHARE_PROCESS\r\n        STATE              : 1  STOPPED\r\n";
        let recs = parse_sc_query(text);
        assert_eq!(
            recs,
            vec![
                rec("Spooler", "Print Spooler", ServiceStatus::Running),
                rec("wuauserv", "Windows Update", ServiceStatus::Stopped),
            ]
        );
    }

    #[test]
    fn parses_systemctl_units() {
        let text = "cron.service loaded active running Regular background program processing daemon\n\
                    ● nginx.service loaded failed failed A high performance web server\n\
                    systemd-fsck@dev.service loaded activating start File System Check\n\
                    dev-sda.device loaded active plugged Some disk\n";
        let recs = parse_systemctl_units(text);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].name, "cron");
        assert_eq!(recs[0].display_name, "Regular background program processing daemon");
        assert_eq!(recs[0].status, ServiceStatus::Running);
        assert_eq!(recs[1].status, ServiceStatus::Stopped);
        assert_eq!(recs[2].status, ServiceStatus::Starting);
    }
}
