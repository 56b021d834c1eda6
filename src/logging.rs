//! Logger setup.
//!
//! `env_logger` backend for the `log` facade, with timestamped lines and an optional
//! dated log file (one per day, oldest files pruned).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::LoggingConfig;
use crate::error::DualCamResult;

/// Maximum number of log files to keep
const MAX_LOG_FILES: usize = 5;

/// Writes every line to stderr and to the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

/// Initialize the global logger.
///
/// Returns the log file path when a log directory is configured. Calling this again
/// after a logger is installed leaves the existing logger in place.
pub fn init_logging(config: &LoggingConfig) -> DualCamResult<Option<PathBuf>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.level_filter()).parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    let log_path = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = current_log_path(dir);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
            cleanup_old_logs(dir);
            Some(path)
        },
        None => None,
    };

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
        return Ok(None);
    }

    if let Some(path) = &log_path {
        log::info!("Logging to {}", path.display());
    }
    Ok(log_path)
}

/// Get the path for the current log file (one per day)
fn current_log_path(log_dir: &Path) -> PathBuf {
    let date = Local::now().format("%Y-%m-%d");
    log_dir.join(format!("dualcam_{}.log", date))
}

/// Clean up old log files, keeping only the most recent MAX_LOG_FILES
fn cleanup_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .collect();

    // Newest first
    log_files.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });

    for file in log_files.into_iter().skip(MAX_LOG_FILES) {
        let _ = fs::remove_file(file.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_is_dated() {
        let path = current_log_path(Path::new("/logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("dualcam_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "dualcam_2024-01-01.log".len());
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(MAX_LOG_FILES + 3) {
            fs::write(dir.path().join(format!("old_{}.log", i)), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        cleanup_old_logs(dir.path());

        let logs = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
            .count();
        assert_eq!(logs, MAX_LOG_FILES);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).unwrap().is_none());
    }
}
