//! Deterministic classification of agent output.
//!
//! The agent's output format is not structured, so classification relies on
//! literal substring matches. Rules are evaluated in priority order and the
//! first match wins:
//!
//! 1. Any rate-limit indicator → [`Outcome::RateLimited`] (even with a nonzero
//!    exit code or alongside the completion marker).
//! 2. The no-work marker, when configured → [`Outcome::NoWorkRemaining`].
//! 3. Nonzero exit code → [`Outcome::RetryableFailure`].
//! 4. The completion marker → [`Outcome::Success`].
//! 5. Anything else → [`Outcome::RetryableFailure`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::types::{AgentResult, Outcome};

/// Substrings that signal the agent ran out of its usage budget.
pub const RATE_LIMIT_INDICATORS: [&str; 3] = [
    "usage_limit_reached",
    "Too Many Requests",
    "You've hit your usage limit",
];

static RESETS_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"resets_in_seconds"\s*:\s*(\d+)"#).expect("resets_in_seconds regex is valid")
});
static RESETS_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"resets_at"\s*:\s*(\d+)"#).expect("resets_at regex is valid")
});

/// Maps an invocation result to an [`Outcome`].
pub trait OutcomeClassifier {
    /// `now_epoch_secs` anchors `resets_at` timestamps.
    fn classify(&self, result: &AgentResult, now_epoch_secs: i64) -> Outcome;
}

/// Classifier driven by literal marker phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerClassifier {
    pub magic_phrase: String,
    /// Only token-mode runs configure a no-work marker.
    pub no_work_phrase: Option<String>,
}

impl MarkerClassifier {
    pub fn new(magic_phrase: impl Into<String>, no_work_phrase: Option<String>) -> Self {
        Self {
            magic_phrase: magic_phrase.into(),
            no_work_phrase,
        }
    }
}

impl OutcomeClassifier for MarkerClassifier {
    fn classify(&self, result: &AgentResult, now_epoch_secs: i64) -> Outcome {
        let output = result.output.as_str();
        if is_rate_limited(output) {
            return Outcome::RateLimited {
                reset_in_secs: parse_reset_seconds(output, now_epoch_secs),
            };
        }
        if let Some(phrase) = self.no_work_phrase.as_deref()
            && output.contains(phrase)
        {
            return Outcome::NoWorkRemaining;
        }
        if !result.success() {
            return Outcome::RetryableFailure;
        }
        if output.contains(self.magic_phrase.as_str()) {
            return Outcome::Success;
        }
        Outcome::RetryableFailure
    }
}

/// True if any rate-limit indicator appears in `output` (case-sensitive).
pub fn is_rate_limited(output: &str) -> bool {
    RATE_LIMIT_INDICATORS
        .iter()
        .any(|needle| output.contains(needle))
}

/// Extract the number of seconds until the usage limit resets.
///
/// Looks for a `resets_in_seconds` field anywhere in the text, then a
/// `resets_at` epoch field, then falls back to parsing each line that is a
/// complete JSON object. Returns `None` if no reset hint is present.
pub fn parse_reset_seconds(text: &str, now_epoch_secs: i64) -> Option<u64> {
    if let Some(secs) = capture_u64(&RESETS_IN_RE, text) {
        return Some(secs);
    }
    if let Some(epoch) = capture_u64(&RESETS_AT_RE, text) {
        return Some(seconds_until(epoch, now_epoch_secs));
    }
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|payload| reset_from_json(&payload, now_epoch_secs))
}

fn capture_u64(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn reset_from_json(payload: &Value, now_epoch_secs: i64) -> Option<u64> {
    let object = payload.as_object()?;
    if let Some(secs) = object.get("resets_in_seconds").and_then(Value::as_u64) {
        return Some(secs);
    }
    object
        .get("resets_at")
        .and_then(Value::as_u64)
        .map(|epoch| seconds_until(epoch, now_epoch_secs))
}

fn seconds_until(epoch: u64, now_epoch_secs: i64) -> u64 {
    let now = u64::try_from(now_epoch_secs).unwrap_or(0);
    epoch.saturating_sub(now)
}
