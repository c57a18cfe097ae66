//! Wall-clock access for the run loop.
//!
//! The loop needs the current time for log headers and reset calculations, and
//! blocks the whole run while backing off. Both go through [`Clock`] so tests
//! can substitute a fake that records sleeps instead of performing them.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::debug;

pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);

    fn now_epoch_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Real time, real sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        debug!(secs = duration.as_secs(), "sleeping");
        thread::sleep(duration);
    }
}
