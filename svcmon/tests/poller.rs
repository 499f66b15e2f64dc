//! Aggregate and detail polling against a fake engine.
mod support;

use std::sync::Arc;
use std::time::Duration;

use svcmon::ipc::IpcChannel;
use svcmon::poller::{AggregatePoller, DetailPoller, TickOutcome, NO_READING, UNAVAILABLE};
use support::{standard_reply, FakeEngine};

const SERVICES: &[(&str, f64, f64)] = &[("Spooler", 2.0, 30.0), ("W32Time", 0.5, 8.0)];

fn poller(engine: &FakeEngine, window: usize) -> AggregatePoller {
    let channel = Arc::new(IpcChannel::new(engine.clone()));
    AggregatePoller::new(channel, window).with_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn empty_bulk_falls_back_to_per_service_queries() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, false));
    let p = poller(&engine, 10);
    p.set_running_entities(vec!["Spooler".into(), "W32Time".into()]);

    assert_eq!(p.tick().await, TickOutcome::PerEntity { sampled: 2 });

    let opened: Vec<String> = engine
        .log()
        .into_iter()
        .filter_map(|l| l.strip_prefix("open ").map(String::from))
        .collect();
    assert_eq!(opened, vec!["GET_ALL_STATUS", "GET_STATUS Spooler", "GET_STATUS W32Time"]);
    p.with_store(|s| {
        assert_eq!(s.get("spooler").unwrap().cpu.back().copied(), Some(2.0));
        assert_eq!(s.get("w32time").unwrap().memory.back().copied(), Some(8.0));
    });
}

#[tokio::test]
async fn failed_service_is_skipped_for_the_tick() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, false));
    let p = poller(&engine, 10);
    p.set_running_entities(vec!["Ghost".into(), "Spooler".into()]);

    assert_eq!(p.tick().await, TickOutcome::PerEntity { sampled: 1 });
    p.with_store(|s| {
        assert!(s.get("ghost").is_none());
        assert_eq!(s.get("spooler").unwrap().len(), 1);
    });
}

#[tokio::test]
async fn bulk_answer_is_used_as_is() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, true));
    let p = poller(&engine, 10);
    // Not in the bulk answer: simply not sampled.
    p.set_running_entities(vec!["Spooler".into(), "Absent".into()]);

    assert_eq!(p.tick().await, TickOutcome::Bulk { sampled: 2 });
    assert_eq!(engine.log().len(), 2);
    p.with_store(|s| {
        assert_eq!(s.len(), 2);
        assert!(s.get("absent").is_none());
    });
}

#[tokio::test]
async fn unreachable_engine_records_nothing_but_time_moves() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, true));
    engine.set_up(false);
    let channel = Arc::new(IpcChannel::new(engine.clone()).with_connect_timeout(Duration::from_millis(100)));
    let p = AggregatePoller::new(channel, 2);
    p.set_running_entities(vec!["Spooler".into()]);

    for _ in 0..3 {
        assert_eq!(p.tick().await, TickOutcome::PerEntity { sampled: 0 });
    }
    let frame = p.frame();
    assert!(frame.series.is_empty());
    assert_eq!(frame.tick, 3);
    assert_eq!(frame.x_bounds, (1.0, 3.0));
}

#[tokio::test]
async fn chart_frame_follows_visibility() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, true));
    let p = poller(&engine, 3);
    for _ in 0..5 {
        p.tick().await;
    }
    assert_eq!(p.frame().series.len(), 2);
    assert!(p.frame().series.iter().all(|s| s.cpu.len() == 3));

    p.sync_visibility(&["w32time".to_string()]);
    let frame = p.frame();
    assert_eq!(frame.series.len(), 1);
    assert_eq!(frame.series[0].name, "W32Time");

    p.clear();
    let frame = p.frame();
    assert!(frame.series.is_empty());
    assert_eq!(frame.tick, 0);
}

#[tokio::test]
async fn overlapping_ticks_are_skipped() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, true))
        .with_delay(Duration::from_millis(50));
    let p = poller(&engine, 10);

    let (a, b) = tokio::join!(p.tick(), p.tick());
    let outcomes = [a, b];
    assert!(outcomes.contains(&TickOutcome::Skipped));
    assert!(outcomes.contains(&TickOutcome::Bulk { sampled: 2 }));
    assert_eq!(p.frame().tick, 1);
}

#[tokio::test]
async fn detail_reading_labels() {
    let engine = FakeEngine::new(|req| standard_reply(req, SERVICES, true));
    let channel = Arc::new(IpcChannel::new(engine.clone()));
    let d = DetailPoller::new(channel);

    assert_eq!(d.tick().await, TickOutcome::Idle);
    assert!(engine.log().is_empty());

    d.set_target("Spooler");
    assert_eq!(d.tick().await, TickOutcome::PerEntity { sampled: 1 });
    let r = d.reading();
    assert_eq!(r.cpu_label, "2.00 %");
    assert_eq!(r.memory_label, "30.0 MB");

    d.set_target("Ghost");
    assert_eq!(d.tick().await, TickOutcome::Unavailable);
    let r = d.reading();
    assert_eq!(r.cpu_label, UNAVAILABLE);
    assert_eq!(r.memory_label, UNAVAILABLE);
    assert_eq!(r.cpu, vec![2.0, 0.0]);

    d.clear();
    let r = d.reading();
    assert_eq!(r.cpu_label, NO_READING);
    assert!(r.cpu.is_empty());
}
