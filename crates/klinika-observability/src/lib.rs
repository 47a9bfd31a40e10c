//! Logging for the bot process.
//!
//! One subscriber serves two sinks: a compact console layer for the
//! operator, and a daily-rolling JSONL file under the state directory for
//! later inspection. Rolled files older than the retention window are
//! pruned at startup.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolled files are named `klinika.bot.YYYY-MM-DD.jsonl`.
pub const LOG_FILE_PREFIX: &str = "klinika.bot";

const LOG_FILE_SUFFIX: &str = "jsonl";

#[derive(Debug, Clone)]
pub struct LoggingInitInfo {
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
}

/// Install the global subscriber and prune rolled files past the retention
/// window. The returned guard must be held for the process lifetime or
/// buffered file lines are lost on exit.
pub fn init_bot_logging(
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(logs_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(true))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .ok();

    let today = chrono::Utc::now().date_naive();
    let pruned = prune_rolled_logs(logs_dir, today, retention_days)?;
    if pruned > 0 {
        info!("pruned {pruned} rolled log file(s) past the {retention_days}-day retention");
    }

    Ok((
        guard,
        LoggingInitInfo {
            logs_dir: logs_dir.display().to_string(),
            prefix: LOG_FILE_PREFIX.to_string(),
            retention_days,
        },
    ))
}

/// Delete rolled log files dated before the retention cutoff, returning how
/// many were removed.
fn prune_rolled_logs(
    logs_dir: &Path,
    today: NaiveDate,
    retention_days: u64,
) -> anyhow::Result<usize> {
    let cutoff = today - chrono::Duration::days(retention_days as i64);
    let mut pruned = 0;
    for (path, date) in rolled_log_files(logs_dir)? {
        if date < cutoff && fs::remove_file(&path).is_ok() {
            pruned += 1;
        }
    }
    Ok(pruned)
}

/// Rolled log files in `logs_dir`, paired with the date parsed from their
/// name. Files whose name carries no parseable date stamp (including the
/// live, undated file) are skipped.
fn rolled_log_files(logs_dir: &Path) -> anyhow::Result<Vec<(PathBuf, NaiveDate)>> {
    let prefix = format!("{LOG_FILE_PREFIX}.");
    let suffix = format!(".{LOG_FILE_SUFFIX}");
    let mut files = Vec::new();
    for entry in fs::read_dir(logs_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stamp) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if let Ok(date) = NaiveDate::parse_from_str(stamp, "%Y-%m-%d") {
            files.push((path, date));
        }
    }
    Ok(files)
}

pub fn logs_dir_under(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("klinika-logs-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn prune_removes_only_dated_files_past_retention() {
        let dir = scratch_dir("prune");
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        for name in [
            "klinika.bot.2026-08-01.jsonl",
            "klinika.bot.2026-08-20.jsonl",
            "klinika.bot.current.jsonl",
            "other.2026-08-01.jsonl",
        ] {
            fs::write(dir.join(name), b"{}\n").unwrap();
        }

        let pruned = prune_rolled_logs(&dir, today, 14).unwrap();

        assert_eq!(pruned, 1);
        assert!(!dir.join("klinika.bot.2026-08-01.jsonl").exists());
        assert!(dir.join("klinika.bot.2026-08-20.jsonl").exists());
        assert!(dir.join("klinika.bot.current.jsonl").exists());
        assert!(dir.join("other.2026-08-01.jsonl").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rolled_files_are_recognized_by_date_stamp() {
        let dir = scratch_dir("stamp");
        fs::write(dir.join("klinika.bot.2026-07-31.jsonl"), b"").unwrap();
        fs::write(dir.join("klinika.bot.not-a-date.jsonl"), b"").unwrap();

        let files = rolled_log_files(&dir).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, NaiveDate::from_ymd_opt(2026, 7, 31).unwrap());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn logs_dir_is_under_root() {
        assert_eq!(
            logs_dir_under(Path::new("/var/lib/klinika")),
            PathBuf::from("/var/lib/klinika").join("logs")
        );
    }
}
