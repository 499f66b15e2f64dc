//! Settings file loading.
use std::fs;
use std::sync::Mutex;

use svcmon::settings::{load_settings, load_settings_from, settings_path};

// XDG_CONFIG_HOME is process-wide.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let s = load_settings_from(&dir.path().join("nope.json"));
    assert_eq!(s.window(), 7200);
    assert_eq!(s.pipe_name, "ServiceMonitorPipe");
}

#[test]
fn malformed_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();
    assert_eq!(load_settings_from(&path).chart_cpu_y_max, 100);
}

#[test]
fn xdg_config_home_is_honoured() {
    let _g = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    let path = settings_path();
    assert_eq!(path, dir.path().join("svcmon").join("settings.json"));

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        r#"{"chartWindowSeconds":120,"chartMemoryYMax":1000,"chartYMarginPercent":20,"pipeName":"Alt"}"#,
    )
    .unwrap();
    let s = load_settings();
    std::env::remove_var("XDG_CONFIG_HOME");

    assert_eq!(s.window(), 120);
    assert_eq!(s.memory_axis(), (0.0, Some(1200.0)));
    assert_eq!(s.cpu_axis(), (0.0, 120.0));
    assert_eq!(s.pipe_name, "Alt");
}
