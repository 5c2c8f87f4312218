use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[doc(hidden)]
pub use chrono;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
#[doc(hidden)]
pub static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

const LATEST_LOG: &str = "waveshare-bridge.log";

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `waveshare-bridge.log` symlink (Unix only).
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-waveshare-bridge.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(LATEST_LOG);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {} symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LATEST_LOG,
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // Use eprintln directly here since tlog! would try to lock LOG_FILE (which we just set)
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.is_some() {
            *guard = None;
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
#[macro_export]
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", $crate::logging::chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}
