use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Return PIDs of processes listening on `port`.
    fn find_pids_on_port(port: u16) -> Vec<String>;

    /// Root data directory holding the database, config and satellite output.
    /// Unix: `~/.ingest-control`, Windows: `%APPDATA%\ingest-control`.
    fn data_dir() -> PathBuf;
}

/// Environment override for the data directory, mostly used by tests and containers.
pub const DATA_DIR_ENV: &str = "INGEST_CONTROL_DATA_DIR";

fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
