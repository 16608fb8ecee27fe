//! Subprocess execution and outcome classification
//!
//! The build engine is run with stdout and stderr captured in full while each
//! line is echoed live (through secret redaction) for operator visibility.
//!
//! Failure classification is an explicit policy rather than incidental
//! string matching: the engine writes non-fatal warnings to stderr and uses
//! exit codes inconsistently for partial success, so a run is only declared
//! failed when it exits non-zero *and* wrote something to stderr. This is a
//! known heuristic; the engine offers no stronger status signal.

use crate::errors::{BakeError, InternalError, Result};
use crate::redaction::SecretRegistry;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// Message used when stderr holds nothing usable
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Outcome of one subprocess run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, trimmed, or [`UNKNOWN_ERROR`]
    pub fn error_message(&self) -> String {
        last_error_line(&self.stderr)
    }
}

/// Classification of an execution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Exit code zero and nothing on stderr
    Success,
    /// Something looked off (stderr output or a bare non-zero exit) but the
    /// run is not considered failed
    Warning,
    /// Non-zero exit with any stderr output, whitespace included
    Failure { message: String },
}

impl Classification {
    pub fn is_failure(&self) -> bool {
        matches!(self, Classification::Failure { .. })
    }
}

/// Classify an execution pass: failure iff non-zero exit and non-empty stderr
pub fn classify(result: &ExecutionResult) -> Classification {
    let has_stderr = !result.stderr.is_empty();
    match (result.success(), has_stderr) {
        (false, true) => Classification::Failure {
            message: result.error_message(),
        },
        (true, false) => Classification::Success,
        _ => Classification::Warning,
    }
}

/// Last non-empty line of `stderr` with trailing whitespace removed
pub fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Fully described subprocess invocation
#[derive(Clone)]
pub struct CommandSpec<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub env: &'a BTreeMap<String, String>,
    pub cwd: &'a Path,
    /// Echo output lines live; captured output is returned either way
    pub echo: bool,
}

/// Run a command to completion, capturing (and optionally echoing) both streams.
#[instrument(skip_all, fields(program = %spec.program))]
pub async fn run(spec: CommandSpec<'_>, registry: &SecretRegistry) -> Result<ExecutionResult> {
    debug!(
        "Executing: {} {}",
        spec.program,
        registry.redact_text(&spec.args.join(" "))
    );

    let mut child = tokio::process::Command::new(spec.program)
        .args(&spec.args)
        .envs(spec.env)
        .current_dir(spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BakeError::Spawn {
            program: spec.program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(pump(stdout, registry.clone(), Stream::Stdout, spec.echo));
    let stderr_task = tokio::spawn(pump(stderr, registry.clone(), Stream::Stderr, spec.echo));

    let status = child.wait().await.map_err(|source| BakeError::Spawn {
        program: spec.program.to_string(),
        source,
    })?;

    let stdout = collect(stdout_task).await?;
    let stderr = collect(stderr_task).await?;

    let exit_code = status.code().unwrap_or(-1);
    debug!("{} exited with code {}", spec.program, exit_code);

    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
    })
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn collect(task: JoinHandle<String>) -> Result<String> {
    task.await.map_err(|e| {
        InternalError::Generic {
            message: format!("Output reader task failed: {}", e),
        }
        .into()
    })
}

/// Drain `reader` to EOF, line by line. Bytes that are not valid UTF-8 are
/// replaced rather than ending the read, so the child never sees a closed pipe.
async fn pump<R>(reader: Option<R>, registry: SecretRegistry, stream: Stream, echo: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        }

        let raw = String::from_utf8_lossy(&buf);
        let line = raw.trim_end_matches(['\n', '\r']);
        if echo {
            let shown = registry.redact_text(line);
            match stream {
                Stream::Stdout => println!("{}", shown),
                Stream::Stderr => eprintln!("{}", shown),
            }
        }
        captured.push_str(line);
        captured.push('\n');
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_requires_exit_code_and_stderr() {
        let failed = ExecutionResult::new(1, "", "#1 building\nERROR: failed to solve: boom  \n\n");
        assert_eq!(
            classify(&failed),
            Classification::Failure {
                message: "ERROR: failed to solve: boom".to_string()
            }
        );

        let silent_exit = ExecutionResult::new(1, "done", "");
        assert_eq!(classify(&silent_exit), Classification::Warning);

        let whitespace_only = ExecutionResult::new(2, "", " \n\t\n");
        assert_eq!(
            classify(&whitespace_only),
            Classification::Failure {
                message: UNKNOWN_ERROR.to_string()
            }
        );

        let warned = ExecutionResult::new(0, "", "WARNING: deprecated field");
        assert_eq!(classify(&warned), Classification::Warning);

        let clean = ExecutionResult::new(0, "ok", "");
        assert_eq!(classify(&clean), Classification::Success);
    }

    #[test]
    fn test_last_error_line() {
        assert_eq!(last_error_line("a\nb\n"), "b");
        assert_eq!(last_error_line("a\n   b   \n  \n"), "b");
        assert_eq!(last_error_line(""), UNKNOWN_ERROR);
        assert_eq!(last_error_line("\n \n"), UNKNOWN_ERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_both_streams() {
        let env = BTreeMap::from([("BAKEFLOW_TEST_VALUE".to_string(), "visible".to_string())]);
        let cwd = std::env::temp_dir();
        let spec = CommandSpec {
            program: "sh",
            args: vec![
                "-c".to_string(),
                "echo out-$BAKEFLOW_TEST_VALUE; echo err-line >&2; exit 3".to_string(),
            ],
            env: &env,
            cwd: &cwd,
            echo: true,
        };

        let result = run(spec, &SecretRegistry::new()).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out-visible");
        assert_eq!(result.stderr.trim(), "err-line");
        assert!(classify(&result).is_failure());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_is_drained_in_full() {
        let env = BTreeMap::new();
        let cwd = std::env::temp_dir();
        let script = "printf 'step \\377 out\\n' >&2; sleep 0.3; \
            i=0; while [ $i -lt 2000 ]; do echo \"#$i layer\" >&2; i=$((i+1)); done; \
            echo 'ERROR: real failure' >&2; exit 1";
        let spec = CommandSpec {
            program: "sh",
            args: vec!["-c".to_string(), script.to_string()],
            env: &env,
            cwd: &cwd,
            echo: false,
        };

        let result = run(spec, &SecretRegistry::new()).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr.lines().count(), 2002);
        assert!(result.stderr.starts_with("step \u{FFFD} out\n"));
        assert_eq!(
            classify(&result),
            Classification::Failure {
                message: "ERROR: real failure".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let env = BTreeMap::new();
        let cwd = std::env::temp_dir();
        let spec = CommandSpec {
            program: "/nonexistent/bakeflow-engine",
            args: vec![],
            env: &env,
            cwd: &cwd,
            echo: false,
        };
        let err = run(spec, &SecretRegistry::new()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to launch /nonexistent/bakeflow-engine"));
    }
}
