use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Detect the number of logical CPU cores (1 if detection fails).
pub fn detected_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(windows)]
const WORKER_BIN: &str = "drover-worker.exe";
#[cfg(not(windows))]
const WORKER_BIN: &str = "drover-worker";

/// How workers are hosted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Out-of-process child workers speaking the JSON-lines protocol.
    #[default]
    Process,
    /// In-process workers driven by a registered [`TaskHandler`].
    ///
    /// [`TaskHandler`]: crate::thread::TaskHandler
    Thread,
}

/// Launch description for one out-of-process worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    /// Worker executable path.
    pub program: PathBuf,
    /// Flags appended to the worker command line.
    pub flags: Vec<String>,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Process vs in-process-thread workers.
    #[serde(default)]
    pub worker_kind: WorkerKind,
    /// Worker executable. Defaults to `drover-worker` beside the current
    /// executable. Children always inherit the parent's environment, so
    /// worker behavior stays consistent with the parent process.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    /// Flags forwarded to each spawned worker.
    #[serde(default)]
    pub forked_flags: Vec<String>,
    /// Maximum concurrent workers. 0 = auto (CPU cores − 1, floored at 1).
    #[serde(default)]
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_kind: WorkerKind::default(),
            worker_program: None,
            forked_flags: Vec::new(),
            max_workers: 0,
        }
    }
}

impl PoolConfig {
    /// Build config from `DROVER_*` environment variables.
    pub fn from_env() -> Self {
        let worker_kind = match env_opt("DROVER_WORKER_KIND").as_deref() {
            Some("thread") => WorkerKind::Thread,
            Some("process") | None => WorkerKind::Process,
            Some(other) => {
                warn!(kind = other, "unknown DROVER_WORKER_KIND, using process");
                WorkerKind::Process
            }
        };
        Self {
            worker_kind,
            worker_program: env_opt("DROVER_WORKER_PROGRAM").map(PathBuf::from),
            forked_flags: env_opt("DROVER_FORKED_FLAGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            max_workers: env_usize("DROVER_MAX_WORKERS", 0),
        }
    }

    /// Resolve the worker count. 0 means auto-detect (cores − 1); any
    /// resolved value is floored at 1 so the pool can always make progress.
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            detected_cpus().saturating_sub(1).max(1)
        } else {
            self.max_workers.max(1)
        }
    }

    /// Launch description for out-of-process workers.
    pub fn worker_entry(&self) -> WorkerEntry {
        let program = self
            .worker_program
            .clone()
            .unwrap_or_else(default_worker_program);
        WorkerEntry {
            program,
            flags: self.forked_flags.clone(),
        }
    }
}

/// Default worker executable: `drover-worker` next to the current executable,
/// falling back to a bare name resolved through `PATH`.
fn default_worker_program() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join(WORKER_BIN)))
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_resolves_at_least_one_worker() {
        let config = PoolConfig::default();
        assert!(config.resolved_max_workers() >= 1);
    }

    #[test]
    fn auto_worker_count_is_cores_minus_one() {
        let config = PoolConfig::default();
        let expected = detected_cpus().saturating_sub(1).max(1);
        assert_eq!(config.resolved_max_workers(), expected);
    }

    #[test]
    fn explicit_worker_count_is_respected() {
        let config = PoolConfig {
            max_workers: 8,
            ..PoolConfig::default()
        };
        assert_eq!(config.resolved_max_workers(), 8);
    }

    #[test]
    fn default_kind_is_process() {
        assert_eq!(PoolConfig::default().worker_kind, WorkerKind::Process);
    }

    #[test]
    fn worker_kind_parses_from_snake_case() {
        let kind: WorkerKind = serde_json::from_str("\"thread\"").unwrap();
        assert_eq!(kind, WorkerKind::Thread);
        let kind: WorkerKind = serde_json::from_str("\"process\"").unwrap();
        assert_eq!(kind, WorkerKind::Process);
    }

    #[test]
    fn worker_entry_uses_explicit_program_and_flags() {
        let config = PoolConfig {
            worker_program: Some(PathBuf::from("/opt/bin/my-worker")),
            forked_flags: vec!["--log-level".into(), "debug".into()],
            ..PoolConfig::default()
        };
        let entry = config.worker_entry();
        assert_eq!(entry.program, PathBuf::from("/opt/bin/my-worker"));
        assert_eq!(entry.flags, vec!["--log-level", "debug"]);
    }

    #[test]
    fn worker_entry_defaults_to_sibling_binary() {
        let entry = PoolConfig::default().worker_entry();
        assert!(entry.program.to_string_lossy().contains("drover-worker"));
        assert!(entry.flags.is_empty());
    }
}
