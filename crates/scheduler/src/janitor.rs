//! Periodic cleanup of finished jobs.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span};

use crate::scheduler::SchedulerCore;

/// Handle to a running janitor task.
#[derive(Debug)]
pub struct JanitorHandle {
    join: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the janitor.
    pub fn shutdown(self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl SchedulerCore {
    /// Every `every`, drop completed and failed jobs older than `retention`.
    pub fn spawn_janitor(&self, every: Duration, retention: Duration) -> JanitorHandle {
        let scheduler = self.clone();
        let every = every.max(Duration::from_millis(1));

        let join = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;

                loop {
                    ticker.tick().await;
                    let pruned = scheduler.clean(retention);
                    if pruned > 0 {
                        info!(pruned, "janitor pass");
                    } else {
                        debug!("janitor pass: nothing to clean");
                    }
                }
            }
            .instrument(info_span!("janitor", every_ms = every.as_millis() as u64)),
        );

        JanitorHandle { join }
    }
}
