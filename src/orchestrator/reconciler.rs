//! Scheduled fleet reconciliation driver.
//!
//! Runs [`MonitorAllSessionsUseCase`] on a fixed interval until the
//! cancellation token fires. Passes run one after another inside the
//! loop, so this driver never overlaps itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::orchestrator::monitor_all::MonitorAllSessionsUseCase;

/// Spawn the reconciliation loop.
///
/// The first pass runs immediately. Cancelling mid-pass drops the pass;
/// every session keeps whatever state it last persisted.
#[must_use]
pub fn spawn_reconciler(
    monitor_all: Arc<MonitorAllSessionsUseCase>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    info!("reconciler cancelled during a pass");
                    break;
                }
                result = monitor_all.execute() => {
                    if let Err(err) = result {
                        error!(%err, "reconciliation pass failed");
                    }
                }
            }
        }
    })
}
