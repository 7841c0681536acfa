//! # timer
//!
//! why: give each node one-shot and periodic callbacks it can cancel, on the async runtime's clock
//! relations: used by server.rs for election timeouts and heartbeats
//! what: TimerService, TimerHandle, randomized election timeout

use std::time::Duration;

use rand::Rng;
use raft_core::RaftConfig;
use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Draw an election timeout uniformly from the configured range
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, config: &RaftConfig) -> Duration {
    let timeout_ms = rng.gen_range(config.election_timeout_min..=config.election_timeout_max);
    Duration::from_millis(timeout_ms)
}

/// Cancels the timer it was returned for. Dropping the handle does not.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Schedules callbacks for a single owner. Shutting the service down cancels
/// every timer it ever handed out and makes new ones inert.
#[derive(Debug, Default)]
pub struct TimerService {
    root: CancellationToken,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`, unless cancelled first
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.root.child_token();
        let handle = TimerHandle {
            token: token.clone(),
        };
        let Some(runtime) = self.runtime(&token) else {
            return handle;
        };

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => callback(),
            }
        });
        handle
    }

    /// Run `callback` every `period`, first after one full period
    pub fn schedule_repeating<F>(&self, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let token = self.root.child_token();
        let handle = TimerHandle {
            token: token.clone(),
        };
        let Some(runtime) = self.runtime(&token) else {
            return handle;
        };

        runtime.spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => callback(),
                }
            }
        });
        handle
    }

    /// Cancel all outstanding timers; later schedules never fire
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    fn runtime(&self, token: &CancellationToken) -> Option<Handle> {
        if token.is_cancelled() {
            return None;
        }
        match Handle::try_current() {
            Ok(runtime) => Some(runtime),
            Err(_) => {
                tracing::warn!("no async runtime available, timer will never fire");
                token.cancel();
                None
            }
        }
    }
}
