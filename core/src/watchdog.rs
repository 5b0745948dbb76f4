//! Safety net for a processing flag nobody lowers.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use callgate_types::ProcessingTimeout;

use crate::CallStateCoordinator;

const MIN_POLL: Duration = Duration::from_millis(5);

/// Spawn a task that resets `is_processing` once it has been raised for
/// `timeout`. The task holds only a weak handle and ends once every
/// [`CallStateCoordinator`] clone is gone.
///
/// Must be called from within a tokio runtime.
pub fn spawn_processing_watchdog(
    coordinator: &CallStateCoordinator,
    timeout: ProcessingTimeout,
) -> JoinHandle<()> {
    let weak = coordinator.downgrade();
    let max_age = timeout.as_duration();
    let period = (max_age / 4).max(MIN_POLL);

    tokio::spawn(async move {
        let mut ticks = time::interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            let Some(coordinator) = weak.upgrade() else {
                tracing::debug!("Coordinator dropped, stopping processing watchdog");
                break;
            };
            coordinator.expire_stale_processing(max_age);
        }
    })
}

impl CallStateCoordinator {
    /// Start the watchdog if the settings configure a processing timeout.
    pub fn start_watchdog(&self) -> Option<JoinHandle<()>> {
        let timeout = self.settings().processing_timeout()?;
        tracing::info!(
            timeout_ms = timeout.as_duration().as_millis(),
            "Processing watchdog started"
        );
        Some(spawn_processing_watchdog(self, timeout))
    }
}
