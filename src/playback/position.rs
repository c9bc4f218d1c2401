//! Periodic playback-position sampling.

use std::time::Duration;

use {
    tokio::{
        spawn,
        task::JoinHandle,
        time::{Instant, MissedTickBehavior, interval_at},
    },
    tracing::debug,
};

/// Background task firing once per interval for the lifetime of a session.
///
/// The callback decides what a sample means; returning `false` stops the
/// loop (the session it reports to is gone). Dropping the sampler cancels
/// the task.
#[derive(Debug)]
pub struct PositionSampler {
    /// Sampling task.
    handle: JoinHandle<()>,
}

impl PositionSampler {
    /// Starts sampling.
    ///
    /// # Arguments
    ///
    /// * `interval` - Time between samples.
    /// * `on_sample` - Called on every tick; returns whether to continue.
    #[must_use]
    pub fn start<F>(interval: Duration, on_sample: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let handle = spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !on_sample() {
                    debug!("PositionSampler: Receiver gone, stopping");
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Whether the sampling task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PositionSampler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
