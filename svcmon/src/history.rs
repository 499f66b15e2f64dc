//! Bounded per-service history buffers for the live charts.

use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_WINDOW: usize = 7200;

/// Push `v`, then evict from the front until at most `cap` values remain.
pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    dq.push_back(v);
    while dq.len() > cap {
        dq.pop_front();
    }
}

/// Line colours, assigned to services in order of first appearance.
pub const PALETTE: [(u8, u8, u8); 20] = [
    (30, 144, 255),  // dodger blue
    (255, 69, 0),    // orange red
    (60, 179, 113),  // medium sea green
    (147, 112, 219), // medium purple
    (218, 165, 32),  // goldenrod
    (255, 20, 147),  // deep pink
    (0, 128, 128),   // teal
    (255, 127, 80),  // coral
    (106, 90, 205),  // slate blue
    (220, 20, 60),   // crimson
    (0, 139, 139),   // dark cyan
    (205, 92, 92),   // indian red
    (128, 128, 0),   // olive
    (70, 130, 180),  // steel blue
    (218, 112, 214), // orchid
    (160, 82, 45),   // sienna
    (95, 158, 160),  // cadet blue
    (255, 99, 71),   // tomato
    (65, 105, 225),  // royal blue
    (219, 112, 147), // pale violet red
];

pub fn palette_color(index: usize) -> (u8, u8, u8) {
    PALETTE[index % PALETTE.len()]
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Clone)]
pub struct EntitySeries {
    /// Engine-provided name as first seen.
    pub name: String,
    pub cpu: VecDeque<f64>,
    pub memory: VecDeque<f64>,
    pub color_index: usize,
    pub visible: bool,
}

impl EntitySeries {
    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }

    pub fn color(&self) -> (u8, u8, u8) {
        palette_color(self.color_index)
    }
}

/// Per-service CPU/memory series keyed case-insensitively by name.
///
/// `rendered` is the ordered set of series currently drawn; membership and
/// `EntitySeries::visible` always agree.
#[derive(Debug, Default)]
pub struct SeriesStore {
    series: HashMap<String, EntitySeries>,
    rendered: Vec<String>,
    next_color: usize,
    samples: u64,
    // Names the catalog knows with their chart flag off. A new series starts
    // hidden only when listed here; names the catalog never saw are drawn.
    hidden: HashSet<String>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&mut self, name: &str, cpu: f64, memory: f64, cap: usize) {
        let k = key(name);
        if !self.series.contains_key(&k) {
            let visible = !self.hidden.contains(&k);
            let color_index = self.next_color % PALETTE.len();
            self.next_color += 1;
            self.series.insert(
                k.clone(),
                EntitySeries {
                    name: name.to_string(),
                    cpu: VecDeque::with_capacity(cap.min(DEFAULT_WINDOW)),
                    memory: VecDeque::with_capacity(cap.min(DEFAULT_WINDOW)),
                    color_index,
                    visible: false,
                },
            );
            self.set_visible(name, visible);
        }
        if let Some(s) = self.series.get_mut(&k) {
            push_capped(&mut s.cpu, cpu, cap);
            push_capped(&mut s.memory, memory, cap);
        }
        self.samples += 1;
    }

    /// Add to or remove from the rendered set. Unknown names are ignored.
    pub fn set_visible(&mut self, name: &str, visible: bool) {
        let k = key(name);
        let Some(s) = self.series.get_mut(&k) else {
            return;
        };
        s.visible = visible;
        let present = self.rendered.iter().any(|r| *r == k);
        if visible && !present {
            self.rendered.push(k);
        } else if !visible && present {
            self.rendered.retain(|r| *r != k);
        }
    }

    /// Record the catalog's chart flag for `name` and apply it to the series,
    /// whether or not that series exists yet.
    pub fn set_chart_flag(&mut self, name: &str, show: bool) {
        let k = key(name);
        if show {
            self.hidden.remove(&k);
        } else {
            self.hidden.insert(k);
        }
        self.set_visible(name, show);
    }

    /// Replace all chart flags with the catalog's `(name, show)` pairs.
    /// Existing series the catalog does not list keep their visibility.
    pub fn sync_chart_flags<I, S>(&mut self, flags: I)
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        self.hidden.clear();
        for (name, show) in flags {
            self.set_chart_flag(name.as_ref(), show);
        }
    }

    /// Make the rendered set exactly `visible` (names compared case-insensitively).
    /// Only series that already exist are affected.
    pub fn sync_visibility<I, S>(&mut self, visible: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: HashSet<String> = visible.into_iter().map(|s| key(s.as_ref())).collect();
        let names: Vec<String> = self.series.values().map(|s| s.name.clone()).collect();
        for name in names {
            let show = wanted.contains(&key(&name));
            self.set_visible(&name, show);
        }
    }

    /// Drop every series and restart colours and the sample count. Chart
    /// flags belong to the catalog and survive, so re-created series keep
    /// the user's choice.
    pub fn clear(&mut self) {
        self.series.clear();
        self.rendered.clear();
        self.next_color = 0;
        self.samples = 0;
    }

    pub fn get(&self, name: &str) -> Option<&EntitySeries> {
        self.series.get(&key(name))
    }

    /// Series currently drawn, in the order they joined the chart.
    pub fn rendered(&self) -> impl Iterator<Item = &EntitySeries> {
        self.rendered.iter().filter_map(|k| self.series.get(k))
    }

    pub fn is_rendered(&self, name: &str) -> bool {
        let k = key(name);
        self.rendered.iter().any(|r| *r == k)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples
    }
}
