//! Child-process plumbing shared by the binary-backed engines

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Why a piped child process did not produce usable output
#[derive(Debug)]
pub(crate) enum ProcessFailure {
    /// The binary could not be started
    Spawn(std::io::Error),
    /// Waiting on the child failed
    Wait(std::io::Error),
    /// The child exited unsuccessfully; carries its diagnostics
    Exit(String),
}

impl std::fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start: {}", e),
            Self::Wait(e) => write!(f, "failed while running: {}", e),
            Self::Exit(msg) => f.write_str(msg),
        }
    }
}

/// Run `cmd` feeding `input` on stdin and collecting stdout.
///
/// Stdin is written from a separate task so a child that streams output
/// while still reading input cannot stall on a full pipe.
pub(crate) async fn run_piped(mut cmd: Command, input: Vec<u8>) -> Result<Vec<u8>, ProcessFailure> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ProcessFailure::Spawn)?;

    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        })
    });

    let output = child.wait_with_output().await.map_err(ProcessFailure::Wait)?;

    if let Some(writer) = writer {
        if let Ok(Err(e)) = writer.await {
            // A child that exits early closes its stdin; the exit status decides.
            debug!(program = %program, error = %e, "stdin write ended early");
        }
    }

    if !output.status.success() {
        return Err(ProcessFailure::Exit(exit_message(
            &program,
            &output.status,
            &output.stderr,
        )));
    }

    Ok(output.stdout)
}

/// Trimmed stderr, or `"<program> exited with code <n>"` when stderr is empty
pub(crate) fn exit_message(program: &str, status: &std::process::ExitStatus, stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match status.code() {
        Some(code) => format!("{} exited with code {}", program, code),
        None => format!("{} terminated by signal", program),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_piped_echoes_stdin() {
        let out = run_piped(Command::new("cat"), b"hello".to_vec()).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_run_piped_large_input_does_not_stall() {
        let input = vec![7u8; 4 * 1024 * 1024];
        let out = run_piped(Command::new("cat"), input.clone()).await.unwrap();
        assert_eq!(out.len(), input.len());
    }

    #[tokio::test]
    async fn test_run_piped_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'bad input' >&2; exit 3");
        match run_piped(cmd, Vec::new()).await {
            Err(ProcessFailure::Exit(msg)) => assert_eq!(msg, "bad input"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_piped_reports_exit_code_without_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 4");
        match run_piped(cmd, Vec::new()).await {
            Err(ProcessFailure::Exit(msg)) => assert_eq!(msg, "sh exited with code 4"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_piped_missing_binary() {
        let result = run_piped(Command::new("/nonexistent/murmur-binary"), Vec::new()).await;
        assert!(matches!(result, Err(ProcessFailure::Spawn(_))));
    }
}
