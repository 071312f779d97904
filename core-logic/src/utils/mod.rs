//! # Utilities Module
//!
//! Internal utility modules for the core-logic crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

// Internal modules - not part of public API
pub(crate) mod crash;
pub(crate) mod lines;
pub(crate) mod logger;
pub(crate) mod pacing;
pub(crate) mod proxy_manager;
pub(crate) mod retry;
pub(crate) mod runner;

// Selective exports - only public utilities
pub use crash::{install_crash_handler, record_crash};
pub use lines::{read_lines, read_lines_optional};
pub use logger::setup_logger;
pub use pacing::{random_duration, sleep_or_cancel};
pub use proxy_manager::{ProxyManager, ProxyPool};
pub use runner::{listen_for_shutdown, WorkerRunner};
