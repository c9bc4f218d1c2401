//! Sleep timer countdown.
//!
//! A running [`SleepTimer`] ticks once per interval and reports the
//! remaining whole minutes, rounding any partial minute up so the display
//! never reads 0 before the timer has expired. Dropping the timer cancels it.

use std::time::Duration;

use {
    tokio::{
        spawn,
        task::JoinHandle,
        time::{Instant, MissedTickBehavior, interval_at},
    },
    tracing::debug,
};

const MINUTE_MS: u128 = 60_000;

/// Notifications from a running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerEvent {
    /// Remaining time after a tick, in whole minutes rounded up.
    Tick {
        /// Generation of the timer that ticked.
        generation: u64,
        /// Remaining minutes.
        remaining_minutes: u32,
    },
    /// The countdown reached zero.
    Expired {
        /// Generation of the timer that expired.
        generation: u64,
    },
}

/// Whole minutes left in `remaining`, rounding any partial minute up.
#[must_use]
pub fn remaining_minutes(remaining: Duration) -> u32 {
    let minutes = remaining.as_millis().div_ceil(MINUTE_MS);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// A running countdown task.
///
/// Every event carries the generation the timer was started with, so that
/// events still queued from a superseded timer can be told apart from the
/// active one.
#[derive(Debug)]
pub struct SleepTimer {
    /// Countdown task.
    handle: JoinHandle<()>,
}

impl SleepTimer {
    /// Starts a countdown of `minutes`.
    ///
    /// # Arguments
    ///
    /// * `minutes` - Countdown length; must be non-zero.
    /// * `tick_interval` - Time between ticks.
    /// * `generation` - Identifier echoed in every event.
    /// * `on_event` - Receives ticks and the final expiry.
    #[must_use]
    pub fn start<F>(minutes: u32, tick_interval: Duration, generation: u64, on_event: F) -> Self
    where
        F: Fn(SleepTimerEvent) + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(u64::from(minutes) * 60);
        debug!("SleepTimer: Starting {} minute countdown (generation {})", minutes, generation);

        let handle = spawn(async move {
            let mut ticker = interval_at(started + tick_interval, tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                if now >= deadline {
                    on_event(SleepTimerEvent::Expired { generation });
                    break;
                }
                on_event(SleepTimerEvent::Tick {
                    generation,
                    remaining_minutes: remaining_minutes(deadline - now),
                });
            }
        });

        Self { handle }
    }

    /// Whether the countdown task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use {parking_lot::Mutex, tokio::time::sleep};

    use crate::playback::sleep_timer::{SleepTimer, SleepTimerEvent, remaining_minutes};

    fn recorder() -> (Arc<Mutex<Vec<SleepTimerEvent>>>, impl Fn(SleepTimerEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |event| sink.lock().push(event))
    }

    #[test]
    fn test_remaining_minutes_rounds_up() {
        assert_eq!(remaining_minutes(Duration::from_secs(270)), 5);
        assert_eq!(remaining_minutes(Duration::from_secs(240)), 4);
        assert_eq!(remaining_minutes(Duration::from_millis(1)), 1);
        assert_eq!(remaining_minutes(Duration::ZERO), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_then_expires() {
        let (events, on_event) = recorder();
        let timer = SleepTimer::start(1, Duration::from_secs(1), 3, on_event);

        sleep(Duration::from_millis(30_500)).await;
        assert_eq!(
            events.lock().last(),
            Some(&SleepTimerEvent::Tick {
                generation: 3,
                remaining_minutes: 1
            })
        );

        sleep(Duration::from_secs(31)).await;
        assert_eq!(
            events.lock().last(),
            Some(&SleepTimerEvent::Expired { generation: 3 })
        );
        assert_eq!(events.lock().len(), 60);
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_countdown() {
        let (events, on_event) = recorder();
        let timer = SleepTimer::start(1, Duration::from_secs(1), 1, on_event);

        sleep(Duration::from_millis(2_500)).await;
        drop(timer);
        sleep(Duration::from_secs(120)).await;

        assert_eq!(events.lock().len(), 2);
        assert!(
            events
                .lock()
                .iter()
                .all(|event| matches!(event, SleepTimerEvent::Tick { .. }))
        );
    }
}
