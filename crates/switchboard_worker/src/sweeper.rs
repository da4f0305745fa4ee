//! Periodic ghost-connection sweep.

use crate::registry::RegistryCommand;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Default time between two sweeps.
pub const GHOST_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Starts a task that asks the registry for a ghost sweep every `period`.
///
/// The first sweep happens one full period after start. The task ends by
/// itself once the registry stops accepting commands; the runtime also aborts
/// it on shutdown.
pub fn spawn_ghost_sweeper(
    period: Duration,
    commands: mpsc::UnboundedSender<RegistryCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!("Running ghost connection sweep");
            if commands.send(RegistryCommand::SweepGhosts).is_err() {
                break;
            }
        }
    })
}
