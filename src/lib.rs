//! # pharos
//!
//! Periodic probe supervision with threshold-based health classification.
//!
//! Each [`Watcher`] runs a shell command on a fixed interval, captures its
//! output, classifies the result as OK, WARNING or CRITICAL and exposes the
//! latest status, value and time-in-status to readers, including readers that
//! want to wait for the *next* update instead of polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Scheduler (one task per watcher)                                │
//! │   interval tick ──▶ ProcessSupervisor ──spawn──▶ sh -c <probe>   │
//! │                        │  ▲                         │ stdout     │
//! │                        │  └──── readable / exit ────┘            │
//! │                        ▼                                         │
//! │                     Watcher ──classify──▶ status, value, detail  │
//! │                        │                                         │
//! │                        └──▶ update callbacks (long-poll)         │
//! └──────────────────────────────────────────────────────────────────┘
//!                 ▲
//!   StatusServer ─┘ reads Dashboard ▶ WatcherSet ▶ Watcher views
//! ```
//!
//! - **[`classify`]**: pure threshold classification
//! - **[`probe`]**: probe command templates and output interpreters
//! - **[`watcher`]**: the watcher entity, update callbacks, sets and dashboard
//! - **[`supervisor`]**: the per-watcher process state machine
//! - **[`scheduler`]**: interval timers driving the supervisors
//! - **[`config`]**: TOML configuration for watcher sets
//! - **[`http`]**: JSON status server with long-poll support
//!
//! ## Example
//!
//! ```
//! use pharos::{Status, Watcher};
//!
//! # tokio_test::block_on(async {
//! let watcher = Watcher::builder("Is True?", "true").build();
//! let next = watcher.next_update();
//!
//! watcher.record_check(b"", 1);
//!
//! let view = next.await.unwrap();
//! assert_eq!(view.id, "is_true");
//! assert_eq!(view.status, Status::Critical);
//! # });
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod http;
pub mod probe;
pub mod scheduler;
pub mod supervisor;
pub mod watcher;

pub use classify::{classify, Thresholds};
pub use self::config::PharosConfig;
pub use error::{CheckError, ConfigError};
pub use http::StatusServer;
pub use probe::{ExitStatus, OutputInterpreter, PageTiming, Reading};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use supervisor::{ProbeSpawner, ProcessSupervisor, ShellSpawner};
pub use watcher::{Dashboard, Watcher, WatcherBuilder, WatcherSet, DEFAULT_INTERVAL};

pub use pharos_types::{format_elapsed, format_value, DashboardView, SetView, Status, WatcherView};
