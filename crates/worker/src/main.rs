//! drover-worker — the fixed worker entry point spawned by the process pool.
//!
//! Protocol: one JSON [`TaskRequest`] per line on stdin, one JSON
//! [`TaskResponse`] per line on stdout. Logs go to stderr so they never
//! corrupt the protocol stream. EOF on stdin means the parent is done with
//! this worker; exit cleanly.
//!
//! [`TaskRequest`]: drover_pool::codec::TaskRequest
//! [`TaskResponse`]: drover_pool::codec::TaskResponse

mod runner;

use anyhow::Result;
use clap::Parser;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use drover_pool::codec::{self, TaskResponse, TASK_RUN};

/// Worker entry point for the drover test pool.
#[derive(Parser, Debug)]
#[command(name = "drover-worker", version, about)]
struct Cli {
    /// Worker id assigned by the parent (logging only).
    #[arg(long, env = "DROVER_WORKER_ID")]
    worker_id: Option<usize>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, env = "DROVER_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    info!(worker_id = ?cli.worker_id, "worker started");

    let mut lines = BufReader::new(stdin()).lines();
    let mut out = stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&line);
        let encoded = codec::encode_response(&response)?;
        out.write_all(encoded.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }

    info!(worker_id = ?cli.worker_id, "stdin closed, worker exiting");
    Ok(())
}

/// Handle one request line and produce the response envelope. Every failure
/// becomes a `TaskResponse::Err` — the worker never kills the protocol loop
/// over a bad task.
fn handle_line(line: &str) -> TaskResponse {
    let request = match codec::decode_request(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "unparseable request");
            return TaskResponse::Err {
                message: format!("unparseable request: {e}"),
            };
        }
    };

    match request.task.as_str() {
        TASK_RUN => {
            if request.args.len() != 2 {
                return TaskResponse::Err {
                    message: format!(
                        "run expects [filepath, serialized options], got {} args",
                        request.args.len()
                    ),
                };
            }
            match runner::run_file(&request.args[0], &request.args[1])
                .and_then(|result| codec::serialize_result(&result))
            {
                Ok(raw) => {
                    debug!(filepath = %request.args[0], "run complete");
                    TaskResponse::Ok { result: raw }
                }
                Err(e) => TaskResponse::Err {
                    message: e.to_string(),
                },
            }
        }
        other => TaskResponse::Err {
            message: format!("unknown task: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_pool::codec::TestStatus;
    use std::io::Write;

    #[test]
    fn run_request_yields_ok_envelope() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "test('x', () => {{}});").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let line = codec::encode_request(TASK_RUN, &[path.clone(), "{}".into()]).unwrap();
        match handle_line(&line) {
            TaskResponse::Ok { result } => {
                let decoded = codec::deserialize_result(&result).unwrap();
                assert_eq!(decoded.failures, 0);
                assert_eq!(decoded.events[0].status, TestStatus::Passed);
            }
            TaskResponse::Err { message } => panic!("unexpected error: {message}"),
        }
    }

    #[test]
    fn unknown_task_yields_err_envelope() {
        let line = codec::encode_request("compile", &[]).unwrap();
        match handle_line(&line) {
            TaskResponse::Err { message } => assert!(message.contains("unknown task")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_arity_yields_err_envelope() {
        let line = codec::encode_request(TASK_RUN, &["only-one-arg".into()]).unwrap();
        match handle_line(&line) {
            TaskResponse::Err { message } => assert!(message.contains("expects")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_line_yields_err_envelope() {
        match handle_line("}{") {
            TaskResponse::Err { message } => assert!(message.contains("unparseable")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
