use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "agent-stream.logs.jsonl";

/// Where session diagnostics are written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    /// Compact lines on stderr; stdout carries the conversation.
    Stderr,
    /// One JSON object per line in `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    /// Directive from `AGENT_STREAM_LOG_LEVEL`; `None` defers to `RUST_LOG`.
    level: Option<String>,
    target: LogTarget,
}

impl LogSettings {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("AGENT_STREAM_OBSERVABILITY")
            .and_then(|v| parse_switch(&v))
            .unwrap_or(true);
        let level = lookup("AGENT_STREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty());
        let target = match lookup("AGENT_STREAM_JSON_LOG_PATH").filter(|v| !v.trim().is_empty()) {
            Some(raw) => json_target(Path::new(raw.trim())),
            None => LogTarget::Stderr,
        };
        Self {
            enabled,
            level,
            target,
        }
    }

    fn filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn json_target(path: &Path) -> LogTarget {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogTarget::JsonFile { dir, file_name }
}

/// Installs the process-wide `tracing` subscriber for agent-stream clients.
///
/// The session logs each applied event at `debug` (with `kind` and `run_id`)
/// and dropped records, skipped patch operations and failed runs at `warn`.
/// Safe to call more than once; only the first call has an effect.
///
/// - `AGENT_STREAM_OBSERVABILITY=false` turns logging off.
/// - `AGENT_STREAM_LOG_LEVEL` takes an `EnvFilter` directive such as
///   `agent_stream=debug`; `RUST_LOG` is used when it is unset.
/// - `AGENT_STREAM_JSON_LOG_PATH` sends JSON lines to that file instead of
///   stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_env();
        if !settings.enabled {
            return;
        }
        let filter = settings.filter();
        match settings.target {
            LogTarget::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            LogTarget::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_stderr_when_unset() {
        let s = settings(&[]);
        assert!(s.enabled);
        assert_eq!(s.level, None);
        assert_eq!(s.target, LogTarget::Stderr);
    }

    #[test]
    fn json_path_splits_into_dir_and_file() {
        let s = settings(&[("AGENT_STREAM_JSON_LOG_PATH", "logs/run.jsonl")]);
        assert_eq!(
            s.target,
            LogTarget::JsonFile {
                dir: PathBuf::from("logs"),
                file_name: "run.jsonl".into()
            }
        );
        let bare = settings(&[("AGENT_STREAM_JSON_LOG_PATH", "run.jsonl")]);
        assert_eq!(
            bare.target,
            LogTarget::JsonFile {
                dir: PathBuf::from("."),
                file_name: "run.jsonl".into()
            }
        );
    }

    #[test]
    fn switch_accepts_common_spellings() {
        assert!(!settings(&[("AGENT_STREAM_OBSERVABILITY", " OFF ")]).enabled);
        assert!(settings(&[("AGENT_STREAM_OBSERVABILITY", "maybe")]).enabled);
        assert_eq!(
            settings(&[("AGENT_STREAM_LOG_LEVEL", "agent_stream=debug")]).level.as_deref(),
            Some("agent_stream=debug")
        );
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}
