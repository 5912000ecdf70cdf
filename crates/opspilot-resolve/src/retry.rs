//! Bounded retry policy for careful-mode resolution.
//!
//! The policy is fixed configuration; each attempt produces a new
//! `RetryState` carrying the accumulated error context forward.

use std::time::Duration;

/// Attempt budget and linear backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// One initial careful attempt plus `max_retries` retries.
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_retries + 1,
            backoff,
        }
    }

    /// Whether another attempt is allowed after `state`.
    pub fn allows(&self, state: &RetryState) -> bool {
        state.attempts < self.max_attempts
    }

    /// Wait before the attempt following `state`. Zero before the first.
    pub fn delay_before(&self, state: &RetryState) -> Duration {
        self.backoff * state.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(250))
    }
}

/// Errors and last raw output seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    errors: Vec<String>,
    last_response: Option<String>,
}

impl RetryState {
    /// State seeded with a failure that happened before the retry loop.
    pub fn seeded(error: impl Into<String>, response: Option<String>) -> Self {
        Self {
            attempts: 0,
            errors: vec![error.into()],
            last_response: response,
        }
    }

    /// The state after one more failed attempt.
    pub fn record(self, error: impl Into<String>, response: Option<String>) -> Self {
        let mut errors = self.errors;
        errors.push(error.into());
        Self {
            attempts: self.attempts + 1,
            errors,
            last_response: response.or(self.last_response),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Correction note appended to the next prompt.
    pub fn feedback(&self) -> Option<String> {
        self.last_error().map(|err| {
            format!(
                "[SYSTEM: Your previous response was invalid. Error: {}. Please output ONLY a valid JSON list.]",
                err.trim_end_matches('.')
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let state = RetryState::default();
        assert!(policy.allows(&state));
        assert_eq!(policy.delay_before(&state), Duration::ZERO);

        let state = state.record("bad", None).record("worse", Some("raw".into()));
        assert!(policy.allows(&state));
        assert_eq!(policy.delay_before(&state), Duration::from_millis(200));

        let state = state.record("worst", None);
        assert!(!policy.allows(&state));
        assert_eq!(state.errors(), ["bad", "worse", "worst"]);
        assert_eq!(state.last_response(), Some("raw"));
    }

    #[test]
    fn test_feedback_names_last_error() {
        assert!(RetryState::default().feedback().is_none());
        let state = RetryState::seeded("Capability 'x' does not exist.", None);
        assert_eq!(state.attempts(), 0);
        assert_eq!(
            state.feedback().unwrap(),
            "[SYSTEM: Your previous response was invalid. Error: Capability 'x' does not exist. Please output ONLY a valid JSON list.]"
        );
    }
}
