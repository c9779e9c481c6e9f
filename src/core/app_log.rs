use crate::error::{Error, Result};
use crate::models::Settings;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "keycount";
const LOG_FILE_SUFFIX: &str = "log";

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), level)))
}

/// Installs the global subscriber: stdout plus one file per day under `dir`, keeping at
/// most `settings.log_retain_days` files. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(dir: &Path, settings: &Settings) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;

    let appender = rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(settings.log_retain_days.max(1))
        .build(dir)
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&settings.log_level))
        .with_ansi(false)
        .with_writer(io::stdout.and(file_writer))
        .try_init()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    Ok(guard)
}

pub fn install_panic_hook() {
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "panic".to_string()
        };
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        tracing::error!(%location, "panic: {}", payload);
        prev(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_is_under_data_dir() {
        assert_eq!(
            log_dir(Path::new("/tmp/KeyCount")),
            PathBuf::from("/tmp/KeyCount/logs")
        );
    }

    #[test]
    fn env_filter_targets_this_crate() {
        // RUST_LOG may be set by the developer; only check the fallback shape.
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter("debug").to_string(), "keycount=debug");
        }
    }
}
