//! Disk configuration file (`.stxxl`-style) and log sink configuration.
//!
//! One line per disk: `disk=<path>,<capacity_in_MiB>,<backend_name>`.
//! `capacity = 0` enables autogrow. File location defaults to `./.stxxl`,
//! overridable via the `STXXLCFG` environment variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExMemError, Result};
use crate::file::BackendKind;

const DEFAULT_CONFIG_PATH: &str = ".stxxl";
const CONFIG_ENV: &str = "STXXLCFG";
const MSG_LOG_ENV: &str = "STXXLLOGFILE";
const ERR_LOG_ENV: &str = "STXXLERRLOGFILE";
const DEFAULT_MSG_LOG: &str = "stxxl.log";
const DEFAULT_ERR_LOG: &str = "stxxl.errlog";

#[derive(Debug, Clone)]
pub struct DiskDescriptor {
    pub path: PathBuf,
    /// Capacity in bytes; `0` means autogrow.
    pub capacity_bytes: i64,
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Default)]
pub struct DiskConfig {
    pub disks: Vec<DiskDescriptor>,
}

impl DiskConfig {
    /// Loads the disk configuration from the path named by `STXXLCFG`, or
    /// `./.stxxl` if the variable is unset.
    pub fn load_default() -> Result<Self> {
        let path = env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ExMemError::io(path.to_path_buf(), e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut disks = Vec::new();
        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            disks.push(parse_disk_line(line_no, line)?);
        }
        Ok(DiskConfig { disks })
    }
}

fn parse_disk_line(line_no: usize, line: &str) -> Result<DiskDescriptor> {
    let rest = line.strip_prefix("disk=").ok_or_else(|| ExMemError::Config {
        line_no,
        line: line.to_string(),
        reason: "expected a line of the form disk=<path>,<capacity_mib>,<backend>".to_string(),
    })?;

    let parts: Vec<&str> = rest.split(',').collect();
    if parts.len() != 3 {
        return Err(ExMemError::Config {
            line_no,
            line: line.to_string(),
            reason: format!("expected 3 comma-separated fields, found {}", parts.len()),
        });
    }

    let path = PathBuf::from(parts[0].trim());
    let capacity_mib: i64 = parts[1].trim().parse().map_err(|_| ExMemError::Config {
        line_no,
        line: line.to_string(),
        reason: format!("capacity {:?} is not an integer", parts[1]),
    })?;
    let backend = BackendKind::parse(parts[2].trim()).ok_or_else(|| ExMemError::Config {
        line_no,
        line: line.to_string(),
        reason: format!("unknown backend {:?}", parts[2]),
    })?;

    Ok(DiskDescriptor {
        path,
        capacity_bytes: capacity_mib * 1024 * 1024,
        backend,
    })
}

/// Resolved log file paths, honoring the `STXXLLOGFILE`/`STXXLERRLOGFILE`
/// overrides.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub message_log: PathBuf,
    pub error_log: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            message_log: env::var_os(MSG_LOG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MSG_LOG)),
            error_log: env::var_os(ERR_LOG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ERR_LOG)),
        }
    }
}

/// Installs two `tracing-subscriber` file layers: one for all messages, one
/// restricted to WARN/ERROR, mirroring the split message/error log sinks.
/// Returns the appender guards; drop them only at process teardown or
/// buffered lines may be lost.
pub fn init_logging(
    cfg: &LogConfig,
) -> Result<(tracing_appender::non_blocking::WorkerGuard, tracing_appender::non_blocking::WorkerGuard)> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let msg_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.message_log)
        .map_err(|e| ExMemError::io(cfg.message_log.clone(), e))?;
    let err_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.error_log)
        .map_err(|e| ExMemError::io(cfg.error_log.clone(), e))?;

    let (msg_writer, msg_guard) = tracing_appender::non_blocking(msg_file);
    let (err_writer, err_guard) = tracing_appender::non_blocking(err_file);

    let msg_layer = fmt::layer().with_writer(msg_writer).with_ansi(false);
    let err_layer = fmt::layer()
        .with_writer(err_writer)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(msg_layer)
        .with(err_layer);

    // Only one global subscriber may be installed per process; callers that
    // already installed one (e.g. in tests) get a no-op here.
    let _ = tracing::subscriber::set_global_default(subscriber);

    Ok((msg_guard, err_guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let text = "disk=/data/disk0,1024,syscall\ndisk=/data/disk1,0,mmap\n# a comment\n\n";
        let cfg = DiskConfig::parse(text).unwrap();
        assert_eq!(cfg.disks.len(), 2);
        assert_eq!(cfg.disks[0].capacity_bytes, 1024 * 1024 * 1024);
        assert_eq!(cfg.disks[1].capacity_bytes, 0);
        assert!(matches!(cfg.disks[0].backend, BackendKind::Syscall));
        assert!(matches!(cfg.disks[1].backend, BackendKind::Mmap));
    }

    #[test]
    fn rejects_malformed_line() {
        let err = DiskConfig::parse("disk=onlyonepart").unwrap_err();
        assert!(matches!(err, ExMemError::Config { .. }));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = DiskConfig::parse("disk=/tmp/x,0,nonsense").unwrap_err();
        assert!(matches!(err, ExMemError::Config { .. }));
    }
}
