//! The worker-side implementation of the `run` task.
//!
//! Real test execution lives outside this repo; this runner validates the
//! options payload, checks the target file is readable, and reports a
//! [`RunResult`] with one event per file.

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use drover_pool::codec::{FailureDetail, RunResult, TestEvent, TestStatus};
use drover_pool::PoolError;

/// Execute one test file. `serialized_options` is the pool's cached options
/// wire form; it must parse even though this runner does not act on it, so
/// payload corruption is caught at the boundary.
pub fn run_file(filepath: &str, serialized_options: &str) -> Result<RunResult, PoolError> {
    let options: Map<String, Value> = serde_json::from_str(serialized_options)
        .map_err(|e| PoolError::Deserialization(format!("options payload: {e}")))?;
    debug!(filepath, options = options.len(), "running test file");

    let started = Instant::now();
    let readable = std::fs::metadata(filepath)
        .map(|m| m.is_file())
        .unwrap_or(false);
    let duration_ms = started.elapsed().as_millis() as u64;

    if readable {
        Ok(RunResult {
            failures: 0,
            events: vec![TestEvent {
                name: filepath.to_string(),
                status: TestStatus::Passed,
                duration_ms: Some(duration_ms),
                failure: None,
            }],
        })
    } else {
        Ok(RunResult {
            failures: 1,
            events: vec![TestEvent {
                name: filepath.to_string(),
                status: TestStatus::Failed,
                duration_ms: Some(duration_ms),
                failure: Some(FailureDetail {
                    message: format!("cannot read test file: {filepath}"),
                    stack: None,
                }),
            }],
        })
    }
}
