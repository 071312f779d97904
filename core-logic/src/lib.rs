//! # Core Logic - Shared Utilities for the Campaign Automation Workspace
//!
//! This crate provides the chain-agnostic plumbing used by every campaign
//! crate under `chains/`: typed errors, proxy handling, list loading,
//! logging, retries, cancellable pacing and worker supervision.
//!
//! ## Modules
//!
//! - [`config`] - Proxy configuration structures
//! - [`error`] - Typed error handling with thiserror
//! - [`metrics`] - Aggregate activity counters
//! - [`traits`] - Core trait definitions
//! - [`utils`] - Utility modules (logger, proxies, pacing, retry, runner)

// Module declarations - internal modules marked pub(crate)
pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub(crate) mod utils;

// Selective exports - only public API types
pub use config::ProxyConfig;
pub use error::{ConfigError, NetworkError, StoreError};
pub use metrics::{ActivityMetrics, ActivitySnapshot};
pub use traits::Worker;

// Utils are pub(crate) - only export specific public utilities
pub use utils::{
    install_crash_handler, listen_for_shutdown, random_duration, read_lines, read_lines_optional,
    record_crash, setup_logger, sleep_or_cancel, ProxyManager, ProxyPool, WorkerRunner,
};

// Export retry utilities for testing
pub use utils::retry::{with_retry, RetryConfig};
