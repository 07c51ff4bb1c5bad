//! Periodic driver for screening passes.
//!
//! Passes run one after another on a single task, so two passes never overlap.
//! A failed pass is logged and the next tick starts fresh from persisted state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::screener::pipeline::ScreeningPipeline;

pub struct ScreeningScheduler {
    pipeline: Arc<ScreeningPipeline>,
    interval: Duration,
}

impl ScreeningScheduler {
    pub fn new(pipeline: Arc<ScreeningPipeline>, interval_seconds: u64) -> Self {
        Self {
            pipeline,
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Main execution loop. The first pass starts immediately; the loop exits
    /// once `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            "ScreeningScheduler is running. Pass every {} seconds.",
            self.interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.interval);
        // A pass that overruns the interval must not trigger a burst of catch-up passes
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.pipeline.screen().await {
                        Ok(report) => {
                            info!(
                                "Pass {} finished: {} wallets, {} users",
                                passes + 1, report.wallets_persisted, report.users_updated
                            );
                        }
                        Err(e) => {
                            error!("Screening pass aborted: {}", e);
                        }
                    }
                    passes += 1;
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ScreeningScheduler shutting down after {} passes.", passes);
                        break;
                    }
                }
            }
        }

        passes
    }
}
