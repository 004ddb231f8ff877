//! The watcher entity: one periodically checked probe and its observed state.
//!
//! A [`Watcher`] is a cheap, cloneable handle. The supervisor driving its
//! checks and any number of readers (status server, long-poll consumers) share
//! the same underlying state.
//!
//! ```rust
//! use std::time::Duration;
//! use pharos::{Status, Watcher};
//!
//! let watcher = Watcher::page_get("Is Google Up", "http://www.google.com/")
//!     .thresholds((0.001, 1.0, 5.0))
//!     .interval(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(watcher.id(), "is_google_up");
//! watcher.record_check(b"0.010 0.210 0.430 (200)", 0);
//! assert_eq!(watcher.status(), Status::Ok);
//! assert_eq!(watcher.view().value, "0.4300");
//! ```

mod notify;
mod set;

pub use notify::{UpdateCallback, UpdateCallbacks};
pub use set::{Dashboard, WatcherSet};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use pharos_types::{format_elapsed, format_value, Status, WatcherView};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::classify::{classify, Thresholds};
use crate::error::CheckError;
use crate::probe::{page_get_command, ssh_wrap, ExitStatus, OutputInterpreter, PageTiming};

/// Interval between checks when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

/// Derive the addressing id from a watcher name.
///
/// Lowercased, whitespace runs collapsed to `_`, then everything except ASCII
/// alphanumerics and `_` dropped. Two watchers with the same name get the same
/// id; keeping names unique is up to the configuration.
pub fn derive_id(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Immutable configuration of a watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub name: String,
    /// Shell command run for each check.
    pub command: String,
    pub interval: Duration,
    /// `None` disables threshold classification.
    pub thresholds: Option<Thresholds>,
    /// Kill a check that is still running after this long.
    pub timeout: Option<Duration>,
}

/// Mutable observed state, guarded by the watcher's lock.
#[derive(Debug, Default)]
struct WatcherState {
    status: Status,
    status_since: Option<Instant>,
    last_updated: Option<SystemTime>,
    value: Option<f64>,
    detail: Option<String>,
    /// Status derived from the current check's output, consumed on exit.
    output_verdict: Option<Status>,
    callbacks: UpdateCallbacks,
}

impl WatcherState {
    /// Change status, returning the previous one if it actually changed.
    fn set_status(&mut self, status: Status, now: Instant) -> Option<Status> {
        if self.status == status {
            return None;
        }
        let previous = self.status;
        self.status = status;
        self.status_since = Some(now);
        Some(previous)
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.status_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO)
    }
}

struct Shared {
    id: String,
    config: WatcherConfig,
    interpreter: Arc<dyn OutputInterpreter>,
    state: Mutex<WatcherState>,
}

/// Handle to a single monitored metric.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<Shared>,
}

impl Watcher {
    /// Start building a watcher whose status comes from `command`'s exit code.
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> WatcherBuilder {
        WatcherBuilder::new(name.into(), command.into(), Arc::new(ExitStatus))
    }

    /// Start building a watcher that times an HTTP GET of `url`.
    pub fn page_get(name: impl Into<String>, url: &str) -> WatcherBuilder {
        WatcherBuilder::new(name.into(), page_get_command(url), Arc::new(PageTiming))
    }

    /// Addressing key, derived from the name.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn command(&self) -> &str {
        &self.inner.config.command
    }

    pub fn interval(&self) -> Duration {
        self.inner.config.interval
    }

    pub fn thresholds(&self) -> Option<&Thresholds> {
        self.inner.config.thresholds.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.config.timeout
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    /// When the status last changed, `None` if it never has.
    pub fn status_since(&self) -> Option<Instant> {
        self.inner.state.lock().status_since
    }

    pub fn last_updated(&self) -> Option<SystemTime> {
        self.inner.state.lock().last_updated
    }

    /// Last parsed measurement.
    pub fn value(&self) -> Option<f64> {
        self.inner.state.lock().value
    }

    /// Last raw output captured.
    pub fn detail(&self) -> Option<String> {
        self.inner.state.lock().detail.clone()
    }

    /// Time spent in the current status; zero if the status never changed.
    pub fn duration(&self) -> Duration {
        self.duration_at(Instant::now())
    }

    /// [`duration`](Self::duration) measured against a given instant.
    pub fn duration_at(&self, now: Instant) -> Duration {
        self.inner.state.lock().elapsed(now)
    }

    /// Render the consumer-facing view of this watcher.
    pub fn view(&self) -> WatcherView {
        let state = self.inner.state.lock();
        self.render(&state, Instant::now())
    }

    /// Number of callbacks waiting for the next update.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.state.lock().callbacks.len()
    }

    /// Register a one-shot callback for the next update.
    ///
    /// The callback fires exactly once, after the next state update following
    /// registration. Callbacks registered together fire in no particular
    /// order; a panicking callback is logged and does not affect the others.
    pub fn add_update_callback<F>(&self, callback: F)
    where
        F: FnOnce(&WatcherView) + Send + 'static,
    {
        self.inner.state.lock().callbacks.push(Box::new(callback));
    }

    /// Receive the view produced by the next update.
    ///
    /// Dropping the receiver abandons the wait; the registration is released
    /// on the next update or the next registration, whichever comes first.
    pub fn next_update(&self) -> oneshot::Receiver<WatcherView> {
        let (tx, rx) = oneshot::channel();
        self.inner.state.lock().callbacks.push_waiter(tx);
        rx
    }

    /// Wait for the next update and return the resulting view.
    ///
    /// Returns `None` only if the watcher is dropped before it updates again.
    pub async fn wait_for_update(&self) -> Option<WatcherView> {
        self.next_update().await.ok()
    }

    /// Apply the complete output of a check.
    ///
    /// Unparsable output is a `Critical` result, never an error. The status
    /// derived from the output is held until the check's [`record_exit`]
    /// and consumed there, so every `record_output` must be paired with the
    /// `record_exit` of the same check; prefer [`record_check`], which
    /// applies both at once.
    ///
    /// [`record_exit`]: Self::record_exit
    /// [`record_check`]: Self::record_check
    pub fn record_output(&self, raw: &[u8]) {
        self.update(|watcher, state, now| watcher.apply_output(state, raw, now));
    }

    /// Apply a check's exit code.
    ///
    /// The exit code only decides the status when the output did not already
    /// produce one for this check.
    pub fn record_exit(&self, exit_code: i32) {
        self.update(|watcher, state, now| watcher.apply_exit(state, exit_code, now));
    }

    /// Apply output and exit code of one check as a single update.
    pub fn record_check(&self, raw: &[u8], exit_code: i32) {
        self.update(|watcher, state, now| {
            watcher.apply_output(state, raw, now);
            watcher.apply_exit(state, exit_code, now);
        });
    }

    /// Mark the check as failed because the probe could not be started.
    pub fn record_spawn_failure(&self, error: &CheckError) {
        self.update(|watcher, state, now| {
            state.last_updated = Some(SystemTime::now());
            state.detail = Some(error.to_string());
            state.output_verdict = None;
            watcher.transition(state, Status::Critical, now);
        });
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&Self, &mut WatcherState, Instant),
    {
        let now = Instant::now();
        let (callbacks, view) = {
            let mut state = self.inner.state.lock();
            apply(self, &mut *state, now);
            if state.callbacks.is_empty() {
                return;
            }
            (state.callbacks.drain(), self.render(&state, now))
        };
        // Outside the lock so callbacks may read the watcher.
        notify::fire(self.id(), callbacks, &view);
    }

    fn apply_output(&self, state: &mut WatcherState, raw: &[u8], now: Instant) {
        let output = String::from_utf8_lossy(raw).into_owned();
        state.last_updated = Some(SystemTime::now());

        let verdict = match self.inner.interpreter.interpret(&output) {
            Ok(None) => None,
            Ok(Some(reading)) => {
                state.value = Some(reading.value);
                if let Some(failure) = &reading.failure {
                    debug!(watcher = %self.id(), error = %failure, "probe signalled failure");
                }
                Some(classify(
                    reading.is_success(),
                    Some(reading.value),
                    self.thresholds(),
                ))
            }
            Err(err) => {
                warn!(watcher = %self.id(), error = %err, "unusable probe output");
                Some(Status::Critical)
            }
        };

        state.detail = Some(output);
        state.output_verdict = verdict;
        if let Some(status) = verdict {
            self.transition(state, status, now);
        }
    }

    fn apply_exit(&self, state: &mut WatcherState, exit_code: i32, now: Instant) {
        state.last_updated = Some(SystemTime::now());
        if state.output_verdict.take().is_none() {
            let status = classify(exit_code == 0, None, None);
            self.transition(state, status, now);
        }
        debug!(watcher = %self.id(), exit_code, status = %state.status, "check finished");
    }

    fn transition(&self, state: &mut WatcherState, status: Status, now: Instant) {
        if let Some(previous) = state.set_status(status, now) {
            info!(
                watcher = %self.id(),
                from = %previous,
                to = %status,
                "status changed"
            );
        }
    }

    fn render(&self, state: &WatcherState, now: Instant) -> WatcherView {
        WatcherView {
            id: self.id().to_string(),
            name: self.name().to_string(),
            status: state.status,
            value: format_value(state.value),
            detail: state.detail.clone().unwrap_or_default(),
            duration: format_elapsed(state.elapsed(now)),
            last_updated_ms: state
                .last_updated
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id())
            .field("command", &self.command())
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`Watcher`].
#[derive(Debug)]
pub struct WatcherBuilder {
    name: String,
    command: String,
    interpreter: Arc<dyn OutputInterpreter>,
    interval: Option<Duration>,
    thresholds: Option<Thresholds>,
    timeout: Option<Duration>,
}

impl WatcherBuilder {
    fn new(name: String, command: String, interpreter: Arc<dyn OutputInterpreter>) -> Self {
        Self {
            name,
            command,
            interpreter,
            interval: None,
            thresholds: None,
            timeout: None,
        }
    }

    /// Set the check interval. Defaults to [`DEFAULT_INTERVAL`].
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Enable threshold classification.
    pub fn thresholds(mut self, thresholds: impl Into<Thresholds>) -> Self {
        self.thresholds = Some(thresholds.into());
        self
    }

    /// Kill checks that outlive `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run the command on `host` over ssh.
    pub fn ssh_host(mut self, host: &str) -> Self {
        self.command = ssh_wrap(host, &self.command);
        self
    }

    /// Replace the output interpretation strategy.
    pub fn interpreter(mut self, interpreter: impl OutputInterpreter + 'static) -> Self {
        self.interpreter = Arc::new(interpreter);
        self
    }

    pub fn build(self) -> Watcher {
        let id = derive_id(&self.name);
        Watcher {
            inner: Arc::new(Shared {
                id,
                config: WatcherConfig {
                    name: self.name,
                    command: self.command,
                    interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
                    thresholds: self.thresholds,
                    timeout: self.timeout,
                },
                interpreter: self.interpreter,
                state: Mutex::new(WatcherState::default()),
            }),
        }
    }
}
