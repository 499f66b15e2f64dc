//! Background sampler: measures every tracked service once per interval and
//! appends the readings to history, so bulk replies just read what is cached.

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::metrics;
use crate::state::EngineState;

/// One sampling pass. Returns how many services were measured.
pub async fn sample_once(state: &EngineState) -> usize {
    let names = state.tracked_names().await;
    let readings = {
        let mut sys = state.sys.lock().await;
        metrics::refresh(&mut sys);
        metrics::collect(&sys, &names)
    };

    let mut measured = 0;
    for (name, reading) in readings {
        // Not running: nothing recorded this pass.
        if let Some(r) = reading {
            state.record(&name, r).await;
            measured += 1;
        }
    }
    trace!(tracked = names.len(), measured, "sample pass");
    measured
}

pub fn spawn_sampler(state: EngineState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sample_once(&state).await;
            let interval = state.interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = state.wake_sampler.notified() => {
                    debug!(interval_ms = state.interval().as_millis() as u64, "sampling interval changed");
                }
            }
        }
    })
}
