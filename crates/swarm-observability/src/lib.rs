use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub initialized_at: DateTime<Utc>,
}

/// Console layer filtered by `SWARM_LOG` (falling back to `info`), plus a
/// daily-rotated JSON file layer under `logs_dir`. The returned guard must be
/// held for the life of the process or buffered lines are lost.
pub fn init_logging(
    logs_dir: impl AsRef<Path>,
    prefix: &str,
) -> anyhow::Result<(LoggingInitInfo, WorkerGuard)> {
    let logs_dir = logs_dir.as_ref().to_path_buf();
    fs::create_dir_all(&logs_dir)?;
    prune_old_logs(&logs_dir, prefix);

    let file_appender = tracing_appender::rolling::daily(&logs_dir, format!("{prefix}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_env("SWARM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|error| anyhow::anyhow!("tracing init failed: {error}"))?;

    Ok((
        LoggingInitInfo {
            logs_dir: logs_dir.to_string_lossy().to_string(),
            prefix: prefix.to_string(),
            retention_days: LOG_RETENTION_DAYS,
            initialized_at: Utc::now(),
        },
        guard,
    ))
}

/// Replaces secret material with a length-and-hash marker before it can
/// reach a log line.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("[redacted len={} hash={}]", trimmed.len(), short_hash(trimmed))
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn prune_old_logs(logs_dir: &PathBuf, prefix: &str) {
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(prefix) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if stale {
            let _ = fs::remove_file(entry.path());
        }
    }
}
