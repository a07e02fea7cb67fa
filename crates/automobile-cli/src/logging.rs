//! File logging with size-based rotation (§6/§17).
//!
//! `tracing_appender`'s built-in `Rotation` is calendar-based only (daily,
//! hourly, minutely, never) — there is no byte-threshold variant — so
//! rotating at 10 MiB needs a small hand-rolled `Write` implementation
//! instead of that crate. Library crates (`automobile-core` and friends)
//! only ever emit `tracing` events; this binary is the only place a
//! subscriber gets installed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

struct RotatingState {
    path: PathBuf,
    file: File,
}

/// Rotates `server.log` to `server-<ISO timestamp>.log` once it exceeds
/// 10 MiB, then continues writing to a fresh `server.log` (spec.md §6).
#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<RotatingState>>,
}

impl RotatingFileWriter {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            state: Arc::new(Mutex::new(RotatingState { path, file })),
        })
    }

    fn rotate_if_needed(state: &mut RotatingState) -> io::Result<()> {
        if state.file.metadata()?.len() < ROTATE_AT_BYTES {
            return Ok(());
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string())
            .replace(':', "-");
        let rotated = state.path.with_file_name(format!("server-{timestamp}.log"));
        std::fs::rename(&state.path, &rotated)?;
        state.file = OpenOptions::new().create(true).append(true).open(&state.path)?;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        Self::rotate_if_needed(&mut state)?;
        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().file.flush()
    }
}

fn log_dir() -> PathBuf {
    Path::new("/tmp/auto-mobile/logs").to_path_buf()
}

/// Installs the global `tracing` subscriber. Level is controlled by the
/// `AUTO_MOBILE_LOG` environment variable, defaulting to `info`.
pub fn init() -> io::Result<()> {
    let writer = RotatingFileWriter::open(log_dir().join("server.log"))?;
    let env_filter = EnvFilter::try_from_env("AUTO_MOBILE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_below_threshold_stay_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let mut writer = RotatingFileWriter::open(&path).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn write_past_threshold_rotates_to_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap();
            file.set_len(ROTATE_AT_BYTES).unwrap();
        }
        let mut writer = RotatingFileWriter::open(&path).unwrap();
        writer.write_all(b"triggers rotation\n").unwrap();
        writer.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"server.log".to_string()));
        assert!(names.iter().any(|n| n.starts_with("server-") && n.ends_with(".log")));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "triggers rotation\n"
        );
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("logs").join("server.log");
        RotatingFileWriter::open(&nested).unwrap();
        assert!(nested.parent().unwrap().is_dir());
    }
}
