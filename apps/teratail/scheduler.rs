use crate::poller::Poller;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, instrument};

/// Runs a poll cycle immediately and then once per `period` until `shutdown` flips to
/// `true` or its sender goes away. A cycle always finishes before the next one can
/// start; ticks missed while a cycle was running are delayed, not replayed.
///
/// Returns the number of cycles run.
#[instrument(skip_all, fields(period = ?period))]
pub async fn run_periodic(
    poller: Arc<Poller>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tags = ?poller.settings().tags, "Starting periodic poller");

    let mut cycles = 0;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    info!("Shutdown sender dropped, stopping poller");
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        poller.run_cycle().await;
        cycles += 1;
    }

    info!(cycles, "Periodic poller stopped");
    cycles
}
