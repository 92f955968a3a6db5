//! Wire types and the serialize/deserialize seam.
//!
//! Everything that crosses the parent/worker boundary is newline-delimited
//! JSON: one [`TaskRequest`] per line on the worker's stdin, one
//! [`TaskResponse`] per line on its stdout. The response's `Ok` payload is
//! itself a serialized [`RunResult`] — the raw result string the pool hands
//! to [`deserialize_result`] exactly once per successful task.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PoolError;

/// The single task name understood by workers.
pub const TASK_RUN: &str = "run";

/// A task submitted to a worker: a name plus an ordered argument list.
///
/// For [`TASK_RUN`] the arguments are `[filepath, serialized_options]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    pub args: Vec<String>,
}

/// Worker reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResponse {
    /// Task completed; `result` is the raw serialized result.
    Ok { result: String },
    /// Task failed inside the worker.
    Err { message: String },
}

/// Deserialized result of one test-file execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Number of failed tests.
    pub failures: u64,
    /// Ordered event records produced during the run.
    pub events: Vec<TestEvent>,
}

/// One event record from a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEvent {
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

/// Outcome of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Error record attached to a failed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Serialize an opaque options payload to its wire form.
///
/// The payload type is a plain JSON map, so there are no non-data values to
/// tolerate or drop — failures are limited to genuine serde errors.
pub fn serialize_options(values: &Map<String, Value>) -> Result<String, PoolError> {
    Ok(serde_json::to_string(values)?)
}

/// Deserialize a worker's raw result string.
pub fn deserialize_result(raw: &str) -> Result<RunResult, PoolError> {
    serde_json::from_str(raw).map_err(|e| PoolError::Deserialization(e.to_string()))
}

/// Serialize a [`RunResult`] into the raw result string (worker side).
pub fn serialize_result(result: &RunResult) -> Result<String, PoolError> {
    Ok(serde_json::to_string(result)?)
}

/// Encode one request line (without the trailing newline).
pub fn encode_request(task: &str, args: &[String]) -> Result<String, PoolError> {
    let request = TaskRequest {
        task: task.to_string(),
        args: args.to_vec(),
    };
    Ok(serde_json::to_string(&request)?)
}

/// Decode one request line (worker side).
pub fn decode_request(line: &str) -> Result<TaskRequest, PoolError> {
    serde_json::from_str(line).map_err(|e| PoolError::Deserialization(e.to_string()))
}

/// Encode one response line (worker side, without the trailing newline).
pub fn encode_response(response: &TaskResponse) -> Result<String, PoolError> {
    Ok(serde_json::to_string(response)?)
}

/// Decode one response line and unwrap the envelope: `Ok` yields the raw
/// result string, `Err` becomes [`PoolError::Worker`].
pub fn decode_response(line: &str) -> Result<String, PoolError> {
    let response: TaskResponse =
        serde_json::from_str(line).map_err(|e| PoolError::Deserialization(e.to_string()))?;
    match response {
        TaskResponse::Ok { result } => Ok(result),
        TaskResponse::Err { message } => Err(PoolError::Worker(message)),
    }
}
