use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::stats::Stats;
use crate::tracker::CycleRunner;

/// Delay until the next multiple of `interval` since the Unix epoch, so a
/// 10 minute interval fires at :00, :10, :20 and so on. Exactly on a
/// boundary this is a full interval.
pub fn initial_delay(now: SystemTime, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis();
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let wait = interval_ms - since_epoch % interval_ms;
    Duration::from_millis(wait as u64)
}

/// Idle time after a cycle that took `elapsed`. An overrunning cycle is
/// followed immediately by the next one.
pub fn next_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

pub struct Scheduler {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
    stats: Arc<Stats>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration, stats: Arc<Stats>) -> Self {
        Self {
            runner,
            interval,
            stats,
        }
    }

    /// Runs cycles on aligned boundaries until `cancel` fires. A failing
    /// cycle is logged and the loop goes on.
    pub async fn run(&self, cancel: CancellationToken) {
        let first = initial_delay(SystemTime::now(), self.interval);
        info!(interval = ?self.interval, first_in = ?first, "scheduler started");
        if !pause(first, &cancel).await {
            return;
        }

        loop {
            let started = Instant::now();
            match self.runner.run_cycle(&cancel).await {
                Ok(report) => self.stats.record_cycle(&report),
                Err(e) => {
                    error!("cycle failed: {e:#}");
                    self.stats.record_cycle_failure();
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            if !pause(next_sleep(self.interval, started.elapsed()), &cancel).await {
                break;
            }
        }
        info!("scheduler stopped");
    }
}

/// Sleeps for `d`; false when cancelled first.
async fn pause(d: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(d) => true,
    }
}
