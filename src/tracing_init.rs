//! Tracing setup. Logs go to a file so the interactive console stays clean.

use std::path::Path;
use std::sync::Mutex;

/// Initialize tracing to `log_path` (append mode).
///
/// Level comes from `RUST_LOG`, defaulting to `info`. If the file cannot be
/// opened, events go to the null device instead of the console.
pub fn init_file_tracing(log_path: &Path) {
    use tracing_subscriber::EnvFilter;

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .or_else(|_| {
            let null = if cfg!(windows) { "NUL" } else { "/dev/null" };
            std::fs::OpenOptions::new().write(true).open(null)
        });

    let log_file = match log_file {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Logging disabled: cannot open {}: {}", log_path.display(), e);
            return;
        }
    };

    let result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(log_file))
        .with_target(true)
        .with_ansi(false)
        .try_init();

    if result.is_err() {
        eprintln!("Logging already initialized");
    }
}
