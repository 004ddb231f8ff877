//! Periodic check scheduling.
//!
//! Every watcher gets its own task holding a [`ProcessSupervisor`]. The task
//! multiplexes the watcher's interval timer with the in-flight probe's
//! readiness events, so all state for one watcher is touched from one place.
//! Ticks that fire while a check is still running are dropped, never queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::supervisor::{ProbeSpawner, ProcessSupervisor, ShellSpawner};
use crate::watcher::{Dashboard, Watcher};

/// Starts and stops the check loops for a dashboard's watchers.
///
/// # Example
///
/// ```rust,no_run
/// use pharos::{Dashboard, Scheduler, Watcher, WatcherSet};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let set = WatcherSet::new("Local", vec![Watcher::builder("Is True?", "true").build()]);
///     let dashboard = Dashboard::new("Pharos", vec![set]);
///
///     let handle = Scheduler::default().start(&dashboard);
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
///     handle.shutdown().await;
/// }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    spawner: Arc<dyn ProbeSpawner>,
}

impl Scheduler {
    pub fn new(spawner: Arc<dyn ProbeSpawner>) -> Self {
        Self { spawner }
    }

    /// Spawn one check loop per watcher on the current runtime.
    pub fn start(&self, dashboard: &Dashboard) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = dashboard
            .watchers()
            .map(|watcher| {
                let supervisor = ProcessSupervisor::new(watcher.clone(), self.spawner.clone());
                tokio::spawn(run_watcher(supervisor, stop_rx.clone()))
            })
            .collect::<Vec<_>>();

        info!(watchers = tasks.len(), "scheduler started");
        SchedulerHandle { stop_tx, tasks }
    }

    /// Spawn the check loop for a single watcher.
    pub fn start_watcher(&self, watcher: &Watcher) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let supervisor = ProcessSupervisor::new(watcher.clone(), self.spawner.clone());
        let tasks = vec![tokio::spawn(run_watcher(supervisor, stop_rx))];
        SchedulerHandle { stop_tx, tasks }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(ShellSpawner::default()))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// Handle for stopping running check loops.
///
/// Dropping the handle also stops the loops; an in-flight probe is killed
/// when its loop exits.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of running check loops.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every loop to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop every loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "check loop ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_watcher(mut supervisor: ProcessSupervisor, mut stop_rx: watch::Receiver<bool>) {
    let watcher = supervisor.watcher().clone();
    // `interval` panics on a zero period.
    let period = watcher.interval().max(Duration::from_millis(1));
    let mut ticks = time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(
        watcher = %watcher.id(),
        interval_ms = period.as_millis() as u64,
        "check loop started"
    );

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(err) = supervisor.on_tick() {
                    debug!(watcher = %watcher.id(), error = %err, "tick produced no check");
                }
            }
            event = supervisor.next_event() => {
                // Late stream events are already logged and carry no state.
                let _ = supervisor.handle_event(event);
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!(watcher = %watcher.id(), pid = ?supervisor.in_flight_pid(), "check loop stopped");
}
