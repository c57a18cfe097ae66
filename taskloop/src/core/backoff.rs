//! Wait computation for rate-limited invocations.

use std::time::Duration;

/// How long to pause after the agent reports a usage limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Added to a parsed reset time so the retry lands after the reset.
    pub padding_secs: u64,
    /// Flat wait when the output carries no reset hint. Not padded.
    pub default_wait_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            padding_secs: 30,
            default_wait_secs: 60 * 60,
        }
    }
}

impl RateLimitPolicy {
    pub fn wait_for(&self, reset_in_secs: Option<u64>) -> Duration {
        let secs = match reset_in_secs {
            Some(reset) => reset.saturating_add(self.padding_secs),
            None => self.default_wait_secs,
        };
        Duration::from_secs(secs)
    }
}
