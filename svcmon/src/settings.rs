//! Chart and engine settings: a small JSON file read once at startup.
//! Stored under XDG config dir: $XDG_CONFIG_HOME/svcmon/settings.json (fallback ~/.config/svcmon/settings.json)

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::history::DEFAULT_WINDOW;
use crate::ipc::DEFAULT_PIPE_NAME;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("engine executable path is not set")]
    EnginePathUnset,
    #[error("engine executable not found: {0}")]
    EnginePathMissing(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub chart_window_seconds: i64,
    pub chart_cpu_y_max: i64,
    /// 0 = auto scale
    pub chart_memory_y_max: i64,
    pub chart_y_margin_percent: i64,
    pub engine_exe_path: String,
    pub pipe_name: String,
    pub monitoring_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chart_window_seconds: DEFAULT_WINDOW as i64,
            chart_cpu_y_max: 100,
            chart_memory_y_max: 0,
            chart_y_margin_percent: 10,
            engine_exe_path: String::new(),
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            monitoring_interval_ms: 1000,
        }
    }
}

impl Settings {
    /// Samples retained per series; non-positive values fall back to the default.
    pub fn window(&self) -> usize {
        if self.chart_window_seconds > 0 {
            self.chart_window_seconds as usize
        } else {
            DEFAULT_WINDOW
        }
    }

    pub fn margin_percent(&self) -> f64 {
        self.chart_y_margin_percent.clamp(0, 50) as f64
    }

    /// (min, max) of the CPU axis, margin included.
    pub fn cpu_axis(&self) -> (f64, f64) {
        let cap = if self.chart_cpu_y_max > 0 {
            self.chart_cpu_y_max as f64
        } else {
            100.0
        };
        (0.0, cap + cap * self.margin_percent() / 100.0)
    }

    /// (min, max) of the memory axis; `None` max means auto scale.
    pub fn memory_axis(&self) -> (f64, Option<f64>) {
        if self.chart_memory_y_max > 0 {
            let cap = self.chart_memory_y_max as f64;
            (0.0, Some(cap + cap * self.margin_percent() / 100.0))
        } else {
            (0.0, None)
        }
    }

    /// The configured engine executable, if it is set and exists.
    pub fn engine_exe(&self) -> Result<PathBuf, SettingsError> {
        let raw = self.engine_exe_path.trim();
        if raw.is_empty() {
            return Err(SettingsError::EnginePathUnset);
        }
        let path = PathBuf::from(raw);
        if path.is_file() {
            Ok(path)
        } else {
            Err(SettingsError::EnginePathMissing(path))
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("svcmon")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svcmon")
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Load from `path`; a missing or malformed file yields defaults.
pub fn load_settings_from(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "malformed settings, using defaults");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}
