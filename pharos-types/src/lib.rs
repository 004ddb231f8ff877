//! # pharos-types
//!
//! The read-side contract of a pharos deployment. These are the values an
//! external renderer (HTML dashboard, JSON API, terminal view) sees when it
//! looks at a watcher: its health [`Status`], the formatted measurement, the
//! last raw probe output and a human phrase for how long the watcher has been
//! in its current status.
//!
//! ## Features
//!
//! - `serde`: derive `Serialize`/`Deserialize` for every view type
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use pharos_types::{format_elapsed, format_value, Status};
//!
//! assert_eq!(Status::Warning.as_str(), "warning");
//! assert_eq!(format_value(Some(0.43)), "0.4300");
//! assert_eq!(format_value(None), "unknown");
//! assert_eq!(format_elapsed(Duration::from_secs(330)), "5 minutes");
//! ```

mod duration;
mod status;
mod view;

pub use duration::*;
pub use status::*;
pub use view::*;
