//! Error types.
//!
//! [`CheckError`] is never fatal to the process: every variant is scoped to
//! one watcher and one check, and most of them end up as a `Critical` status
//! rather than a propagated failure. [`ConfigError`] is raised while turning a
//! configuration file into watchers, before anything runs.

use std::io;

use thiserror::Error;

/// Errors that can occur while running or interpreting a probe.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The probe command could not be started.
    #[error("failed to spawn probe `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The probe printed an unexpected number of tokens.
    #[error("malformed probe output: expected {expected} tokens, found {found}")]
    MalformedOutput { expected: usize, found: usize },

    /// A token that should hold a measurement did not parse as a number.
    #[error("malformed probe output: `{token}` is not a number")]
    InvalidValue { token: String },

    /// The probe output carried an explicit failure signal (e.g. a non-200 code).
    #[error("probe reported failure signal {signal}")]
    NonSuccessSignal { signal: String },

    /// A scheduler tick arrived while the previous check was still running.
    #[error("check still running (pid {})", .pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()))]
    Overlap { pid: Option<u32> },

    /// A readiness event arrived for a stream that was already deregistered.
    #[error("readiness event for a closed probe stream")]
    StreamAfterClose,
}

impl CheckError {
    /// Whether this error should turn the watcher `Critical`.
    ///
    /// Scheduling errors (`Overlap`, `StreamAfterClose`) leave the watcher
    /// untouched.
    pub fn is_probe_failure(&self) -> bool {
        !matches!(self, CheckError::Overlap { .. } | CheckError::StreamAfterClose)
    }
}

/// Errors raised while loading watcher configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A watcher entry named neither or both of `command` and `url`.
    #[error("watcher `{name}` must set exactly one of `command` or `url`")]
    ProbeKind { name: String },

    /// A watcher entry asked for a zero check interval.
    #[error("watcher `{name}` has a zero interval")]
    ZeroInterval { name: String },
}
