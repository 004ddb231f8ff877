//! Per-watcher process supervision.
//!
//! A [`ProcessSupervisor`] owns at most one in-flight probe for its watcher
//! and walks it through `Idle -> Running -> Idle`:
//!
//! ```text
//!            on_tick (spawn)
//!   Idle ───────────────────────▶ Running { stream, output, child }
//!    ▲                              │  Readable(n > 0)  → buffer, stay
//!    │                              │  Readable(0)      → poll child
//!    │                              │  StreamFailed     → drop stream, poll child
//!    │        exit observed         │  Exited           → finish
//!    └──────────────────────────────┘
//! ```
//!
//! Events are produced by [`ProcessSupervisor::next_event`] and applied by
//! [`ProcessSupervisor::handle_event`]; nothing here ever blocks on process
//! exit. Output is buffered for the whole check and handed to the watcher
//! together with the exit code, so the watcher sees exactly one update per
//! check.

mod spawn;

pub use spawn::{
    ProbeChild, ProbeSpawner, ProbeStream, ShellSpawner, SpawnedProbe, DEFAULT_SHELL,
};

use std::fmt;
use std::future;
use std::io;
use std::mem;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CheckError;
use crate::watcher::Watcher;

/// Bytes requested per read of the probe's stdout.
const READ_CHUNK: usize = 4096;

/// Exit code recorded when the child's exit status could not be collected.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// A readiness event for the in-flight check.
#[derive(Debug)]
pub enum ProbeEvent {
    /// Bytes read from stdout; empty when the read returned zero.
    Readable(Vec<u8>),
    /// Reading stdout failed.
    StreamFailed(io::Error),
    /// The child exited (observed after the stream was closed).
    Exited(io::Result<i32>),
}

/// Supervision record for one in-flight check.
struct ProcessHandle {
    pid: Option<u32>,
    child: Box<dyn ProbeChild>,
    /// `None` once the stream has been deregistered.
    stream: Option<ProbeStream>,
    output: Vec<u8>,
    started: Instant,
    kill_sent: bool,
}

enum CheckPhase {
    Idle,
    Running(ProcessHandle),
}

/// Drives the checks of a single watcher.
pub struct ProcessSupervisor {
    watcher: Watcher,
    spawner: Arc<dyn ProbeSpawner>,
    phase: CheckPhase,
}

impl ProcessSupervisor {
    pub fn new(watcher: Watcher, spawner: Arc<dyn ProbeSpawner>) -> Self {
        Self {
            watcher,
            spawner,
            phase: CheckPhase::Idle,
        }
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, CheckPhase::Idle)
    }

    /// Pid of the in-flight probe, if any.
    pub fn in_flight_pid(&self) -> Option<u32> {
        match &self.phase {
            CheckPhase::Running(handle) => handle.pid,
            CheckPhase::Idle => None,
        }
    }

    /// Whether the in-flight probe's stdout is still registered for reads.
    pub fn stream_open(&self) -> bool {
        matches!(&self.phase, CheckPhase::Running(handle) if handle.stream.is_some())
    }

    /// Start a check if none is in flight.
    ///
    /// A lingering child that has already exited, and whose stream is already
    /// closed, is reaped first so the new check starts in the same tick. If
    /// the previous check is still running, or has exited with output not yet
    /// read, nothing is spawned, the watcher is left untouched and
    /// [`CheckError::Overlap`] is returned. A spawn failure is recorded on the
    /// watcher and returned; the supervisor stays idle so the next tick
    /// retries.
    pub fn on_tick(&mut self) -> Result<(), CheckError> {
        if let Some(code) = self.poll_in_flight()? {
            debug!(watcher = %self.watcher.id(), exit_code = code, "reaped lingering probe");
            self.finish(code);
        }
        self.spawn()
    }

    /// Wait for the next readiness event of the in-flight check.
    ///
    /// Pending forever while idle. Safe to cancel: no output is lost if the
    /// future is dropped before it completes.
    pub async fn next_event(&mut self) -> ProbeEvent {
        let handle = match &mut self.phase {
            CheckPhase::Running(handle) => handle,
            CheckPhase::Idle => return future::pending().await,
        };

        match handle.stream.as_mut() {
            Some(stream) => {
                let mut buf = [0u8; READ_CHUNK];
                match stream.read(&mut buf).await {
                    Ok(n) => ProbeEvent::Readable(buf[..n].to_vec()),
                    Err(err) => ProbeEvent::StreamFailed(err),
                }
            }
            None => ProbeEvent::Exited(handle.child.wait().await),
        }
    }

    /// Apply a readiness event.
    ///
    /// Returns [`CheckError::StreamAfterClose`] for a stream event that
    /// arrives after the stream was deregistered; such events are ignored.
    pub fn handle_event(&mut self, event: ProbeEvent) -> Result<(), CheckError> {
        match event {
            ProbeEvent::Readable(bytes) => self.on_readable(bytes),
            ProbeEvent::StreamFailed(err) => self.on_stream_failed(err),
            ProbeEvent::Exited(result) => {
                self.on_exited(result);
                Ok(())
            }
        }
    }

    fn on_readable(&mut self, bytes: Vec<u8>) -> Result<(), CheckError> {
        let id = self.watcher.id();
        let handle = match &mut self.phase {
            CheckPhase::Running(handle) if handle.stream.is_some() => handle,
            _ => {
                warn!(watcher = %id, "readable event for a closed probe stream");
                return Err(CheckError::StreamAfterClose);
            }
        };

        if !bytes.is_empty() {
            debug!(watcher = %id, pid = ?handle.pid, bytes = bytes.len(), "probe output");
            handle.output.extend_from_slice(&bytes);
            return Ok(());
        }

        // A zero read is end of stream; the exit may not be visible yet.
        handle.stream = None;
        match handle.child.try_wait() {
            Ok(Some(code)) => self.finish(code),
            Ok(None) => {
                debug!(watcher = %id, pid = ?handle.pid, "probe stream closed before exit");
            }
            Err(err) => {
                warn!(watcher = %id, pid = ?handle.pid, error = %err, "failed to poll probe");
            }
        }
        Ok(())
    }

    fn on_stream_failed(&mut self, err: io::Error) -> Result<(), CheckError> {
        let id = self.watcher.id();
        let handle = match &mut self.phase {
            CheckPhase::Running(handle) if handle.stream.is_some() => handle,
            _ => {
                warn!(watcher = %id, error = %err, "stream error for a closed probe stream");
                return Err(CheckError::StreamAfterClose);
            }
        };

        handle.stream = None;
        match handle.child.try_wait() {
            Ok(Some(code)) => self.finish(code),
            Ok(None) => {
                warn!(
                    watcher = %id,
                    pid = ?handle.pid,
                    error = %err,
                    "probe stream failed while the process is still running"
                );
            }
            Err(poll_err) => {
                warn!(watcher = %id, pid = ?handle.pid, error = %poll_err, "failed to poll probe");
            }
        }
        Ok(())
    }

    fn on_exited(&mut self, result: io::Result<i32>) {
        if self.is_idle() {
            return;
        }
        let code = result.unwrap_or_else(|err| {
            warn!(watcher = %self.watcher.id(), error = %err, "failed to collect probe exit status");
            UNKNOWN_EXIT_CODE
        });
        self.finish(code);
    }

    /// Check on the in-flight probe before a tick.
    ///
    /// `Ok(Some(code))` if it has exited and its stream is already closed,
    /// `Ok(None)` if there is nothing in flight, `Err(Overlap)` if it is
    /// still running or its output has not been read to the end yet.
    fn poll_in_flight(&mut self) -> Result<Option<i32>, CheckError> {
        let timeout = self.watcher.timeout();
        let id = self.watcher.id();
        let handle = match &mut self.phase {
            CheckPhase::Running(handle) => handle,
            CheckPhase::Idle => return Ok(None),
        };

        match handle.child.try_wait() {
            Ok(Some(code)) if handle.stream.is_none() => return Ok(Some(code)),
            Ok(Some(code)) => {
                // Unread output may remain; the end-of-stream read finishes the check.
                debug!(
                    watcher = %id,
                    pid = ?handle.pid,
                    exit_code = code,
                    "probe exited with output pending, skipping tick"
                );
                return Err(CheckError::Overlap { pid: handle.pid });
            }
            Ok(None) => {}
            Err(err) => {
                warn!(watcher = %id, pid = ?handle.pid, error = %err, "failed to poll probe");
            }
        }

        let running_for = handle.started.elapsed();
        if let Some(limit) = timeout {
            if running_for >= limit && !handle.kill_sent {
                warn!(
                    watcher = %id,
                    pid = ?handle.pid,
                    running_ms = running_for.as_millis() as u64,
                    "probe exceeded its timeout, killing"
                );
                if let Err(err) = handle.child.start_kill() {
                    warn!(watcher = %id, pid = ?handle.pid, error = %err, "failed to kill probe");
                }
                handle.kill_sent = true;
            }
        }

        warn!(
            watcher = %id,
            pid = ?handle.pid,
            running_ms = running_for.as_millis() as u64,
            "check still running, skipping tick"
        );
        Err(CheckError::Overlap { pid: handle.pid })
    }

    fn spawn(&mut self) -> Result<(), CheckError> {
        let command = self.watcher.command();
        match self.spawner.spawn(command) {
            Ok(SpawnedProbe { child, stdout }) => {
                let pid = child.pid();
                debug!(watcher = %self.watcher.id(), pid = ?pid, "check started");
                self.phase = CheckPhase::Running(ProcessHandle {
                    pid,
                    child,
                    stream: Some(stdout),
                    output: Vec::new(),
                    started: Instant::now(),
                    kill_sent: false,
                });
                Ok(())
            }
            Err(err) => {
                warn!(watcher = %self.watcher.id(), error = %err, "failed to start check");
                self.watcher.record_spawn_failure(&err);
                Err(err)
            }
        }
    }

    fn finish(&mut self, exit_code: i32) {
        let CheckPhase::Running(handle) = mem::replace(&mut self.phase, CheckPhase::Idle) else {
            return;
        };
        debug!(
            watcher = %self.watcher.id(),
            pid = ?handle.pid,
            exit_code,
            elapsed_ms = handle.started.elapsed().as_millis() as u64,
            "check exited"
        );
        self.watcher.record_check(&handle.output, exit_code);
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("watcher", &self.watcher.id())
            .field("in_flight_pid", &self.in_flight_pid())
            .field("idle", &self.is_idle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pharos_types::Status;
    use tokio::io::{AsyncRead, ReadBuf};

    #[derive(Default)]
    struct ChildState {
        exit: Option<i32>,
        killed: bool,
    }

    struct FakeChild {
        pid: u32,
        state: Arc<Mutex<ChildState>>,
    }

    #[async_trait]
    impl ProbeChild for FakeChild {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            Ok(self.state.lock().exit)
        }

        async fn wait(&mut self) -> io::Result<i32> {
            let exit = self.state.lock().exit;
            match exit {
                Some(code) => Ok(code),
                None => future::pending().await,
            }
        }

        fn start_kill(&mut self) -> io::Result<()> {
            let mut state = self.state.lock();
            state.killed = true;
            state.exit = Some(-1);
            Ok(())
        }
    }

    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "pipe broke")))
        }
    }

    /// Hands out scripted children and remembers each one's state.
    #[derive(Default)]
    struct FakeSpawner {
        output: Vec<u8>,
        broken_stream: bool,
        fail_next: AtomicBool,
        spawned: AtomicUsize,
        children: Mutex<Vec<Arc<Mutex<ChildState>>>>,
    }

    impl FakeSpawner {
        fn with_output(output: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                output: output.to_vec(),
                ..Default::default()
            })
        }

        fn spawned(&self) -> usize {
            self.spawned.load(Ordering::SeqCst)
        }

        fn child(&self, index: usize) -> Arc<Mutex<ChildState>> {
            self.children.lock()[index].clone()
        }

        fn exit(&self, index: usize, code: i32) {
            self.child(index).lock().exit = Some(code);
        }
    }

    impl ProbeSpawner for FakeSpawner {
        fn spawn(&self, command: &str) -> Result<SpawnedProbe, CheckError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CheckError::Spawn {
                    command: command.to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
                });
            }
            let index = self.spawned.fetch_add(1, Ordering::SeqCst);
            let state = Arc::new(Mutex::new(ChildState::default()));
            self.children.lock().push(state.clone());

            let stdout: ProbeStream = if self.broken_stream {
                Box::new(BrokenStream)
            } else {
                Box::new(Cursor::new(self.output.clone()))
            };
            Ok(SpawnedProbe {
                child: Box::new(FakeChild {
                    pid: 1000 + index as u32,
                    state,
                }),
                stdout,
            })
        }
    }

    fn page_supervisor(spawner: &Arc<FakeSpawner>) -> ProcessSupervisor {
        let watcher = Watcher::page_get("Is Google Up", "http://www.google.com/")
            .thresholds((0.001, 1.0, 5.0))
            .build();
        ProcessSupervisor::new(watcher, spawner.clone())
    }

    async fn drive_until_idle(supervisor: &mut ProcessSupervisor) {
        while !supervisor.is_idle() {
            let event = supervisor.next_event().await;
            supervisor.handle_event(event).unwrap();
        }
    }

    #[test]
    fn second_tick_does_not_spawn() {
        let spawner = FakeSpawner::with_output(b"");
        let mut supervisor = page_supervisor(&spawner);

        supervisor.on_tick().unwrap();
        assert_eq!(supervisor.in_flight_pid(), Some(1000));

        let err = supervisor.on_tick().unwrap_err();
        assert!(matches!(err, CheckError::Overlap { pid: Some(1000) }));
        assert_eq!(spawner.spawned(), 1);

        let watcher = supervisor.watcher();
        assert_eq!(watcher.status(), Status::Ok);
        assert!(watcher.value().is_none());
        assert!(watcher.last_updated().is_none());
    }

    #[test]
    fn partial_reads_are_delivered_once_at_exit() {
        let spawner = FakeSpawner::with_output(b"");
        let mut supervisor = page_supervisor(&spawner);
        supervisor.on_tick().unwrap();

        supervisor
            .handle_event(ProbeEvent::Readable(b"0.010 0.2".to_vec()))
            .unwrap();
        supervisor
            .handle_event(ProbeEvent::Readable(b"10 0.430 (200)".to_vec()))
            .unwrap();
        assert!(supervisor.watcher().last_updated().is_none());

        spawner.exit(0, 0);
        supervisor.handle_event(ProbeEvent::Readable(Vec::new())).unwrap();

        assert!(supervisor.is_idle());
        let view = supervisor.watcher().view();
        assert_eq!(view.status, Status::Ok);
        assert_eq!(view.value, "0.4300");
        assert_eq!(view.detail, "0.010 0.210 0.430 (200)");
    }

    #[test]
    fn zero_read_before_exit_keeps_running() {
        let spawner = FakeSpawner::with_output(b"");
        let mut supervisor = page_supervisor(&spawner);
        supervisor.on_tick().unwrap();

        supervisor.handle_event(ProbeEvent::Readable(Vec::new())).unwrap();
        assert!(!supervisor.is_idle());
        assert!(!supervisor.stream_open());
        assert!(supervisor.watcher().last_updated().is_none());
    }

    #[test]
    fn stream_events_after_close_are_ignored() {
        let spawner = FakeSpawner::with_output(b"");
        let mut supervisor = page_supervisor(&spawner);

        let err = supervisor
            .handle_event(ProbeEvent::Readable(b"late".to_vec()))
            .unwrap_err();
        assert!(matches!(err, CheckError::StreamAfterClose));

        supervisor.on_tick().unwrap();
        let broke = io::Error::new(io::ErrorKind::Other, "pipe broke");
        supervisor.handle_event(ProbeEvent::StreamFailed(broke)).unwrap();
        assert!(!supervisor.is_idle());

        let err = supervisor
            .handle_event(ProbeEvent::Readable(b"late".to_vec()))
            .unwrap_err();
        assert!(matches!(err, CheckError::StreamAfterClose));
        assert!(supervisor.watcher().last_updated().is_none());
    }

    #[test]
    fn tick_reaps_lingering_child_then_spawns() {
        let spawner = FakeSpawner::with_output(b"");
        let watcher = Watcher::builder("Is False?", "false").build();
        let mut supervisor = ProcessSupervisor::new(watcher, spawner.clone());
        supervisor.on_tick().unwrap();

        let broke = io::Error::new(io::ErrorKind::Other, "pipe broke");
        supervisor.handle_event(ProbeEvent::StreamFailed(broke)).unwrap();
        spawner.exit(0, 1);

        supervisor.on_tick().unwrap();
        assert_eq!(supervisor.watcher().status(), Status::Critical);
        assert_eq!(spawner.spawned(), 2);
        assert_eq!(supervisor.in_flight_pid(), Some(1001));
    }

    #[test]
    fn spawn_failure_is_critical_and_retried() {
        let spawner = FakeSpawner::with_output(b"");
        spawner.fail_next.store(true, Ordering::SeqCst);
        let watcher = Watcher::builder("Is True?", "true").build();
        let mut supervisor = ProcessSupervisor::new(watcher, spawner.clone());

        let err = supervisor.on_tick().unwrap_err();
        assert!(matches!(err, CheckError::Spawn { .. }));
        assert!(supervisor.is_idle());
        assert_eq!(supervisor.watcher().status(), Status::Critical);

        supervisor.on_tick().unwrap();
        assert_eq!(spawner.spawned(), 1);
    }

    #[tokio::test]
    async fn reads_stream_then_waits_for_exit() {
        let spawner = FakeSpawner::with_output(b"0.010 0.210 6.000 (200)\n");
        let mut supervisor = page_supervisor(&spawner);
        supervisor.on_tick().unwrap();

        let event = supervisor.next_event().await;
        assert!(matches!(&event, ProbeEvent::Readable(bytes) if !bytes.is_empty()));
        supervisor.handle_event(event).unwrap();

        // End of stream with the child still running.
        let event = supervisor.next_event().await;
        supervisor.handle_event(event).unwrap();
        assert!(!supervisor.stream_open());

        spawner.exit(0, 0);
        drive_until_idle(&mut supervisor).await;

        assert_eq!(supervisor.watcher().status(), Status::Critical);
        assert_eq!(supervisor.watcher().view().value, "6.0000");
    }

    #[tokio::test]
    async fn broken_stream_falls_back_to_exit() {
        let spawner = Arc::new(FakeSpawner {
            broken_stream: true,
            ..Default::default()
        });
        let watcher = Watcher::builder("Is True?", "true").build();
        let mut supervisor = ProcessSupervisor::new(watcher, spawner.clone());
        supervisor.on_tick().unwrap();

        let event = supervisor.next_event().await;
        assert!(matches!(event, ProbeEvent::StreamFailed(_)));
        supervisor.handle_event(event).unwrap();

        spawner.exit(0, 0);
        drive_until_idle(&mut supervisor).await;
        assert_eq!(supervisor.watcher().status(), Status::Ok);
        assert!(supervisor.watcher().last_updated().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_supervisor_has_no_events() {
        let spawner = FakeSpawner::with_output(b"");
        let mut supervisor = page_supervisor(&spawner);

        let waited = tokio::time::timeout(Duration::from_secs(1), supervisor.next_event()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_kills_stuck_probe() {
        let spawner = FakeSpawner::with_output(b"");
        let watcher = Watcher::builder("Slow", "sleep 60")
            .timeout(Duration::from_secs(5))
            .build();
        let mut supervisor = ProcessSupervisor::new(watcher, spawner.clone());
        supervisor.on_tick().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(supervisor.on_tick().is_err());
        assert!(!spawner.child(0).lock().killed);

        tokio::time::advance(Duration::from_secs(4)).await;
        let err = supervisor.on_tick().unwrap_err();
        assert!(matches!(err, CheckError::Overlap { .. }));
        assert!(spawner.child(0).lock().killed);
        assert_eq!(spawner.spawned(), 1);

        // The killed probe finishes through its stream, then ticks spawn again.
        drive_until_idle(&mut supervisor).await;
        assert_eq!(supervisor.watcher().status(), Status::Critical);
        supervisor.on_tick().unwrap();
        assert_eq!(spawner.spawned(), 2);
    }

    #[tokio::test]
    async fn tick_after_exit_waits_for_unread_output() {
        let spawner = FakeSpawner::with_output(b"0.010 0.210 0.430 (200)");
        let mut supervisor = page_supervisor(&spawner);
        supervisor.on_tick().unwrap();

        // Exited with its whole output still in the pipe.
        spawner.exit(0, 0);
        let err = supervisor.on_tick().unwrap_err();
        assert!(matches!(err, CheckError::Overlap { pid: Some(1000) }));
        assert_eq!(spawner.spawned(), 1);
        assert!(supervisor.watcher().last_updated().is_none());

        drive_until_idle(&mut supervisor).await;
        let view = supervisor.watcher().view();
        assert_eq!(view.status, Status::Ok);
        assert_eq!(view.value, "0.4300");
        assert_eq!(view.detail, "0.010 0.210 0.430 (200)");

        supervisor.on_tick().unwrap();
        assert_eq!(spawner.spawned(), 2);
    }
}
