//! Process-wide fault barrier.
//!
//! Per-worker failures are contained by their own loops. Anything that
//! escapes (a panic anywhere, or a fatal error returned from `main`) is
//! appended to the crash log and ends the process.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Appends `<timestamp> - CRASH: <message>` to `path`.
pub fn record_crash(path: impl AsRef<Path>, message: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{} - CRASH: {}", Utc::now().to_rfc3339(), message);
    }
}

/// Installs a panic hook that records the panic and exits with status 1.
pub fn install_crash_handler(path: impl Into<PathBuf>) {
    let path = path.into();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        record_crash(&path, &format!("{}\n{}", info, backtrace));
        eprintln!("Fatal error, see {}: {}", path.display(), info);
        std::process::exit(1);
    }));
}
