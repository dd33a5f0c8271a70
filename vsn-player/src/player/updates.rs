//! Periodic player state broadcast

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

use super::Player;

/// Handle to a running broadcast task
///
/// The first tick fires immediately. Ticks are skipped while the session is
/// paused; the task ends when cancelled or when its player is dropped.
pub struct UpdateSchedule {
    task: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl UpdateSchedule {
    pub fn start(handle: &Handle, period: Duration, player: Weak<Player>) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let Some(player) = player.upgrade() else {
                    break;
                };
                if player.session().is_paused() {
                    trace!(guild_id = %player.guild_id(), "Session paused, update skipped");
                    continue;
                }
                trace!(guild_id = %player.guild_id(), "Sending player update");
                player.send_update();
            }
        });

        Self { task, cancelled }
    }

    /// Stop the task; later calls are no-ops
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.task.is_finished()
    }
}

impl Drop for UpdateSchedule {
    fn drop(&mut self) {
        self.cancel();
    }
}
