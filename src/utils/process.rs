use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Bytes of stderr kept when a tool fails
const STDERR_TAIL_CHARS: usize = 2000;

/// Outcome of an external tool invocation that did not succeed
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ProcessError {
    /// Captured stderr for failed runs, empty otherwise
    pub fn stderr(&self) -> &str {
        match self {
            ProcessError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Run a prepared command to completion, killing it when `timeout` expires.
pub async fn run_with_timeout(
    mut command: Command,
    program: &str,
    timeout: Duration,
) -> Result<Output, ProcessError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!(program, ?timeout, "Running external tool");

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            tracing::warn!(program, ?timeout, "External tool timed out and was killed");
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(stderr.trim(), STDERR_TAIL_CHARS).to_string(),
        });
    }

    Ok(output)
}

/// Run a prepared command while handing every output line to `on_line`.
///
/// Lines from both streams are offered to `on_line`; those it returns `false`
/// for are kept. Kept stdout lines are returned, kept stderr lines become the
/// error text when the tool fails.
pub async fn run_streaming<F>(
    mut command: Command,
    program: &str,
    timeout: Duration,
    on_line: F,
) -> Result<Vec<String>, ProcessError>
where
    F: Fn(&str) -> bool,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!(program, ?timeout, "Streaming external tool output");

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let (kept_stdout, kept_stderr) =
            tokio::try_join!(collect_lines(stdout, &on_line), collect_lines(stderr, &on_line))?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((kept_stdout, kept_stderr, status))
    };
    let outcome = tokio::time::timeout(timeout, run).await;

    let (kept_stdout, kept_stderr, status) = match outcome {
        Ok(Ok(finished)) => finished,
        Ok(Err(source)) => {
            return Err(ProcessError::Failed {
                program: program.to_string(),
                status: "unreadable output".to_string(),
                stderr: source.to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(program, ?timeout, "External tool timed out and was killed");
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        }
    };

    if !status.success() {
        let stderr = kept_stderr.join("\n");
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: tail(stderr.trim(), STDERR_TAIL_CHARS).to_string(),
        });
    }

    Ok(kept_stdout)
}

async fn collect_lines<R, F>(stream: Option<R>, on_line: &F) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> bool,
{
    let mut kept = Vec::new();
    let Some(stream) = stream else {
        return Ok(kept);
    };
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if !on_line(&line) {
            kept.push(line);
        }
    }
    Ok(kept)
}

/// Check if a command is available in PATH
pub async fn command_available(program: &str, version_flag: &str) -> bool {
    let mut command = Command::new(program);
    command.arg(version_flag);
    run_with_timeout(command, program, Duration::from_secs(10))
        .await
        .is_ok()
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}
