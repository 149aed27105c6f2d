use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::{BridgeError, Result};

/// Uniform result of a one-shot tool invocation. Always produced when the
/// command actually ran, even on logical failure (`ok: false`).
#[derive(Debug, Clone)]
pub struct CommandRun {
    pub ok: bool,
    pub tool: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run an external command to completion with bounded output capture.
///
/// Errors only when the OS cannot create the process (`SpawnFailed`) or the
/// working directory is unusable; a command that runs and exits non-zero is
/// an `ok: false` result carrying its output.
pub async fn run(
    tool_label: &str,
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    stdin_bytes: Option<&[u8]>,
    output_limit: usize,
) -> Result<CommandRun> {
    let cwd = resolve_cwd(cwd)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&cwd)
        .stdin(if stdin_bytes.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(tool = tool_label, ?args, cwd = %cwd.display(), "running one-shot command");

    let mut child = command
        .spawn()
        .map_err(|e| BridgeError::spawn_failed(tool_label, e))?;

    if let Some(bytes) = stdin_bytes {
        if let Some(mut stdin) = child.stdin.take() {
            // Best-effort: the child may exit before consuming its input.
            let _ = stdin.write_all(bytes).await;
            let _ = stdin.shutdown().await;
        }
    }

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let (stdout, stderr) = tokio::join!(
        read_capped(stdout_pipe, output_limit),
        read_capped(stderr_pipe, output_limit),
    );

    let status = child.wait().await?;

    Ok(CommandRun {
        ok: status.success(),
        tool: tool_label.to_string(),
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

fn resolve_cwd(cwd: Option<&Path>) -> Result<PathBuf> {
    match cwd {
        Some(path) => std::fs::canonicalize(path).map_err(|e| {
            BridgeError::invalid_argument(format!(
                "working directory '{}' is not usable: {e}",
                path.display()
            ))
        }),
        None => Ok(std::env::current_dir()?),
    }
}

/// Read a pipe to EOF, keeping at most `limit` bytes. The pipe keeps being
/// drained past the limit so a verbose child never blocks on backpressure.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < limit {
                    let take = n.min(limit - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_LIMIT: usize = 64 * 1024;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let run = run(
            "sh",
            Path::new("sh"),
            &["-c".to_string(), "echo hello".to_string()],
            None,
            None,
            TEST_LIMIT,
        )
        .await
        .expect("sh should spawn");
        assert!(run.ok);
        assert_eq!(run.exit_code, Some(0));
        assert_eq!(run.stdout.trim(), "hello");
        assert!(run.stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let run = run(
            "sh",
            Path::new("sh"),
            &["-c".to_string(), "echo oops >&2; exit 2".to_string()],
            None,
            None,
            TEST_LIMIT,
        )
        .await
        .expect("sh should spawn");
        assert!(!run.ok);
        assert_eq!(run.exit_code, Some(2));
        assert_eq!(run.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failed() {
        let err = run(
            "ghost",
            Path::new("/nonexistent/ghost-tool"),
            &[],
            None,
            None,
            TEST_LIMIT,
        )
        .await
        .expect_err("missing executable must not produce a CommandRun");
        assert_eq!(err.kind(), "spawn_failed");
    }

    #[tokio::test]
    async fn test_bad_working_directory_is_invalid_argument() {
        let err = run(
            "sh",
            Path::new("sh"),
            &[],
            Some(Path::new("/nonexistent/cwd")),
            None,
            TEST_LIMIT,
        )
        .await
        .expect_err("bad cwd must be rejected before spawn");
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_truncated_at_the_limit() {
        let run = run(
            "sh",
            Path::new("sh"),
            &["-c".to_string(), "head -c 4096 /dev/zero".to_string()],
            None,
            None,
            128,
        )
        .await
        .expect("sh should spawn");
        assert!(run.ok);
        assert!(run.stdout.ends_with("[output truncated]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_bytes_reach_the_child() {
        let run = run(
            "sh",
            Path::new("sh"),
            &["-c".to_string(), "cat".to_string()],
            None,
            Some(b"piped input"),
            TEST_LIMIT,
        )
        .await
        .expect("sh should spawn");
        assert!(run.ok);
        assert_eq!(run.stdout, "piped input");
    }
}
