//! Poll Timer Task
//!
//! Drives `PollingCoordinator::tick` on the adaptive interval. The task only
//! holds a weak reference, so it ends on its own once the coordinator is
//! dropped.

use std::sync::{Arc, Weak};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::sync::PollingCoordinator;

/// Spawns the poll loop.
///
/// Each iteration sleeps for the coordinator's current interval, or until
/// `wake` fires (visibility regained, user active again), then ticks. The
/// interval is recomputed every iteration.
///
/// # Returns
/// A JoinHandle the coordinator aborts when it goes idle.
pub fn spawn_poll_task(coordinator: Weak<PollingCoordinator>, wake: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting poll loop");

        loop {
            let interval = match coordinator.upgrade() {
                Some(coordinator) => coordinator.next_interval(),
                None => break,
            };
            trace!(interval_ms = interval.as_millis() as u64, "next poll scheduled");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake.notified() => {
                    debug!("poll loop woken early");
                }
            }

            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            coordinator.tick().await;
        }

        debug!("poll loop finished, coordinator dropped");
    })
}
