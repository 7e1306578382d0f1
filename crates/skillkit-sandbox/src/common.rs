//! Process plumbing shared by the runner: concurrent stdio pumps, a single
//! timeout over exit plus drain, and process-group termination.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Default execution timeout in milliseconds
pub use skillkit_core::config::DEFAULT_TIMEOUT_MS;

/// Environment variable carrying the skill name into the child
pub const ENV_SKILL_NAME: &str = "SKILLKIT_SKILL_NAME";

/// Environment variable carrying the absolute skill directory into the child
pub const ENV_SKILL_DIR: &str = "SKILLKIT_SKILL_DIR";

/// Captured output of a process that ran to completion.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Process killed: exceeded timeout of {0} ms")]
    TimedOut(u64),
    #[error("Failed to wait for process: {0}")]
    Wait(#[from] std::io::Error),
}

fn spawn_drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            let _ = r.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Feed `payload` to the child's stdin, drain stdout/stderr concurrently and
/// wait for exit, all under one `timeout_ms` budget.
///
/// Without concurrent draining a child writing more than a pipe buffer
/// blocks on write and never exits. On expiry the whole process group is
/// killed and the child reaped before returning.
pub async fn wait_with_timeout(
    child: &mut Child,
    payload: Vec<u8>,
    timeout_ms: u64,
) -> Result<ProcessOutput, WaitError> {
    let stdin = child.stdin.take();
    let stdin_task = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            // The child may exit without reading; a broken pipe is not our failure.
            let _ = stdin.write_all(&payload).await;
            let _ = stdin.shutdown().await;
        }
    });
    let stdout_task = spawn_drain(child.stdout.take());
    let stderr_task = spawn_drain(child.stderr.take());
    let abort_handles = [
        stdin_task.abort_handle(),
        stdout_task.abort_handle(),
        stderr_task.abort_handle(),
    ];

    let run = async {
        let status = child.wait().await?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let _ = stdin_task.await;
        Ok::<_, std::io::Error>(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
        Ok(result) => result.map_err(WaitError::from),
        Err(_) => {
            kill_process_group(child);
            let _ = child.wait().await;
            for handle in abort_handles {
                handle.abort();
            }
            Err(WaitError::TimedOut(timeout_ms))
        }
    }
}

/// SIGKILL the child's process group, then the child itself.
pub fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!("killpg({}) failed: {}", pid, e);
        }
    }
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;
    use tokio::process::Command;

    fn sh(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pipes_stdin_through() {
        let mut child = sh("cat; echo done >&2");
        let out = wait_with_timeout(&mut child, b"{\"a\":1}".to_vec(), 5_000)
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, "{\"a\":1}");
        assert_eq!(out.stderr.trim(), "done");
    }

    #[tokio::test]
    async fn test_large_output_does_not_deadlock() {
        let mut child = sh("head -c 300000 /dev/zero | tr '\\0' x");
        let out = wait_with_timeout(&mut child, Vec::new(), 5_000)
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 300_000);
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let mut child = sh("sleep 5 & sleep 5");
        let start = Instant::now();
        let err = wait_with_timeout(&mut child, Vec::new(), 50)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::TimedOut(50)));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(child.try_wait().unwrap().is_some());
    }
}
