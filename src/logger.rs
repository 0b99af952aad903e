use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;

use crate::config::ProjectPaths;

/// Log file size that triggers rotation (10 MB)
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize the logging system
///
/// **Console logging** is controlled via the `RUST_LOG` environment variable
/// (default `info`):
///
/// ```bash
/// RUST_LOG=debug lrm-sync pull
/// RUST_LOG=off lrm-sync push
/// ```
///
/// **File logging** goes to `.lrm/lrm-sync.log` inside the project when one
/// is known. Outside a project only the console logger is set up.
pub fn init_logger(paths: Option<&ProjectPaths>) -> Result<()> {
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok(); // Ignore error if logger is already initialized

    if let Some(paths) = paths {
        if paths.state_dir().exists() {
            rotate_log_if_needed(paths)?;
            log_to_file(paths, &format!("Logger initialized with level: {default_level:?}"))?;
        }
    }

    Ok(())
}

/// Append a line to the project log file
pub fn log_to_file(paths: &ProjectPaths, message: &str) -> Result<()> {
    paths.ensure_state_dir()?;
    let log_path = paths.log_file();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )?;

    Ok(())
}

/// Rotate the log file to `.log.old` once it exceeds the size limit
pub fn rotate_log_if_needed(paths: &ProjectPaths) -> Result<bool> {
    let log_path = paths.log_file();

    let metadata = match std::fs::metadata(&log_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).context("Failed to inspect log file"),
    };
    if metadata.len() <= MAX_LOG_SIZE {
        return Ok(false);
    }

    let old_log_path = log_path.with_extension("log.old");
    if old_log_path.exists() {
        std::fs::remove_file(&old_log_path)?;
    }
    std::fs::rename(&log_path, &old_log_path)?;

    log::info!("Log file rotated to {}", old_log_path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_init_logger_without_project() {
        assert!(init_logger(None).is_ok());
    }

    #[test]
    fn test_log_to_file() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ProjectPaths::new(temp.path());
        log_to_file(&paths, "Test log message")?;

        let contents = std::fs::read_to_string(paths.log_file())?;
        assert!(contents.contains("Test log message"));
        Ok(())
    }

    #[test]
    fn test_small_log_is_not_rotated() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ProjectPaths::new(temp.path());
        log_to_file(&paths, "short")?;

        assert!(!rotate_log_if_needed(&paths)?);
        assert!(paths.log_file().exists());
        Ok(())
    }

    #[test]
    fn test_rotate_log_creates_backup() -> Result<()> {
        let temp = TempDir::new()?;
        let paths = ProjectPaths::new(temp.path());
        paths.ensure_state_dir()?;

        let mut file = File::create(paths.log_file())?;
        file.write_all(&vec![b'a'; 11 * 1024 * 1024])?;
        drop(file);

        assert!(rotate_log_if_needed(&paths)?);
        assert!(paths.log_file().with_extension("log.old").exists());
        assert!(!paths.log_file().exists());
        Ok(())
    }
}
