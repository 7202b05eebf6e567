//! Retryable tool errors.
//!
//! Transient provider, registry and network failures are retried with a
//! doubling delay capped at [`MAX_RETRY_DELAY`]. Patterns are matched against
//! the combined stdout and stderr of a failed invocation.

use super::ToolOutput;
use regex::Regex;
use std::fmt;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Upper bound for the doubling delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default retryable errors (pattern, description).
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (
        r"(?i)read: connection reset by peer",
        "Connection reset by peer",
    ),
    (r"(?i)TLS handshake timeout", "TLS handshake timeout"),
    (
        r"(?i)registry service is unreachable",
        "Provider registry unreachable",
    ),
    (
        r"(?i)Failed to query available provider packages",
        "Failed to query provider registry",
    ),
    (r"(?i)Error installing provider", "Provider installation failed"),
    (
        r"(?i)could not query provider registry for",
        "Provider registry query failed",
    ),
    (
        r"(?i)timeout while waiting for plugin to start",
        "Plugin start timeout",
    ),
    (
        r"(?i)timed out waiting for server handshake",
        "Plugin handshake timeout",
    ),
    (
        r"(?i)unable to verify (signature|checksum)",
        "Transient provider verification failure",
    ),
    (r"(?i)unexpected EOF", "Unexpected EOF from remote"),
    (r"(?i)i/o timeout", "Network I/O timeout"),
];

/// Which failed invocations to retry, how often and how long to wait.
#[derive(Clone)]
pub struct RetryPolicy {
    patterns: Vec<(Regex, String)>,
    max_retries: u32,
    delay: Duration,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("patterns", &self.patterns.len())
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let patterns = DEFAULT_RETRYABLE_ERRORS
            .iter()
            .filter_map(|(pattern, description)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (re, (*description).to_string()))
            })
            .collect();

        Self {
            patterns,
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a retryable pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error if `pattern` does not compile.
    pub fn with_pattern(
        mut self,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        self.patterns.push((Regex::new(pattern)?, description.into()));
        Ok(self)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Description of the first pattern matching a failed invocation.
    pub fn retryable_reason(&self, output: &ToolOutput) -> Option<&str> {
        if output.success() {
            return None;
        }
        let text = output.combined_output();
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, description)| description.as_str())
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}
