//! Probe commands and output interpretation strategies.
//!
//! A watcher runs a shell command and hands the captured output to an
//! [`OutputInterpreter`]. The interpreter either defers to the exit code
//! ([`ExitStatus`]) or turns the output into a [`Reading`] that the classifier
//! scores against the watcher's thresholds ([`PageTiming`]).

use std::fmt::Debug;

use crate::error::CheckError;

/// `curl` write-out format: connect, first byte and total time, then status.
pub const PAGE_TIMING_FORMAT: &str =
    "%{time_connect} %{time_starttransfer} %{time_total} (%{http_code})";

/// Status token the page probe must report for the check to succeed.
pub const PAGE_SUCCESS_TOKEN: &str = "(200)";

const PAGE_TIMING_TOKENS: usize = 4;

/// A measurement extracted from probe output.
#[derive(Debug)]
pub struct Reading {
    /// The measured value (seconds for timing probes).
    pub value: f64,
    /// Set when the output carried an explicit failure signal.
    pub failure: Option<CheckError>,
}

impl Reading {
    /// A successful reading.
    pub fn ok(value: f64) -> Self {
        Self {
            value,
            failure: None,
        }
    }

    /// A reading whose output signalled failure.
    pub fn failed(value: f64, failure: CheckError) -> Self {
        Self {
            value,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Strategy for turning probe output into a reading.
pub trait OutputInterpreter: Send + Sync + Debug {
    /// Interpret the complete output of one check.
    ///
    /// - `Ok(None)`: no opinion, the exit code decides the status.
    /// - `Ok(Some(reading))`: classify the reading.
    /// - `Err(_)`: the output is unusable and the check is critical.
    fn interpret(&self, output: &str) -> Result<Option<Reading>, CheckError>;
}

/// Ignores output; status comes from the exit code alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitStatus;

impl OutputInterpreter for ExitStatus {
    fn interpret(&self, _output: &str) -> Result<Option<Reading>, CheckError> {
        Ok(None)
    }
}

/// Parses `connect first_byte total (code)` as printed by [`page_get_command`].
///
/// The reading's value is the total time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageTiming;

impl OutputInterpreter for PageTiming {
    fn interpret(&self, output: &str) -> Result<Option<Reading>, CheckError> {
        let tokens: Vec<&str> = output.split_whitespace().collect();
        if tokens.len() != PAGE_TIMING_TOKENS {
            return Err(CheckError::MalformedOutput {
                expected: PAGE_TIMING_TOKENS,
                found: tokens.len(),
            });
        }

        let total = tokens[2];
        let value: f64 = total.parse().map_err(|_| CheckError::InvalidValue {
            token: total.to_string(),
        })?;

        let signal = tokens[3];
        if signal != PAGE_SUCCESS_TOKEN {
            return Ok(Some(Reading::failed(
                value,
                CheckError::NonSuccessSignal {
                    signal: signal.to_string(),
                },
            )));
        }

        Ok(Some(Reading::ok(value)))
    }
}

/// Build the timing probe for a single HTTP GET of `url`.
///
/// ```rust
/// use pharos::probe::page_get_command;
///
/// let cmd = page_get_command("http://example.com/");
/// assert!(cmd.starts_with("curl -w "));
/// assert!(cmd.contains("-s -o /dev/null"));
/// assert!(cmd.contains("http://example.com/"));
/// ```
pub fn page_get_command(url: &str) -> String {
    format!(
        "curl -w {} -s -o /dev/null {}",
        shell_words::quote(PAGE_TIMING_FORMAT),
        shell_words::quote(url)
    )
}

/// Wrap `command` so it runs on `host` over ssh.
///
/// The inner command is quoted as a single argument, so the remote shell sees
/// it exactly as it would run locally.
pub fn ssh_wrap(host: &str, command: &str) -> String {
    format!(
        "ssh {} {}",
        shell_words::quote(host),
        shell_words::quote(command)
    )
}
