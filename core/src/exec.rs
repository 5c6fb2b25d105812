//! Spawning and supervising one assistant process invocation.
//!
//! The assistant is a black box: it reads the wrapped prompt on stdin and
//! writes text on stdout, with a non-zero exit signaling failure. This
//! module owns the child's lifetime end to end: minimized environment,
//! piped stdio, concurrent output draining, the wall-clock timeout, and
//! out-of-band kills.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// The accumulated per-stream capture is bounded; the streams are still
// drained to EOF so the child never stalls on a full pipe.
const MAX_STREAM_OUTPUT: usize = 1024 * 1024;

/// Environment variables forwarded from the service process. Everything
/// else stays behind; in particular no shell-execution variables cross
/// into the assistant.
const FORWARDED_ENV_VARS: &[&str] = &["PATH", "TMPDIR", "TEMP"];

#[derive(Debug, Clone)]
pub struct AssistantParams {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub prompt: String,
    pub timeout: Duration,
    pub env: HashMap<String, String>,
}

/// How the child run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    TimedOut,
    Killed,
}

#[derive(Debug)]
pub struct AssistantOutput {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Build the minimized environment for one invocation.
pub fn assistant_env(session_id: Uuid, actor_id: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in FORWARDED_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            env.insert((*key).to_string(), value);
        }
    }
    env.insert("HUDDLE_SESSION_ID".to_string(), session_id.to_string());
    env.insert("HUDDLE_ACTOR_ID".to_string(), actor_id.to_string());
    env
}

/// Run the assistant once: write the prompt, drain both streams, and wait
/// for exit, timeout, or cancellation. Spawn and pipe failures surface as
/// `Err`; everything after a successful spawn is an [`AssistantOutput`].
pub async fn run_assistant(
    params: AssistantParams,
    cancel: CancellationToken,
) -> io::Result<AssistantOutput> {
    let start = Instant::now();

    let mut child = Command::new(&params.program)
        .args(&params.args)
        .current_dir(&params.cwd)
        .env_clear()
        .envs(&params.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("stdin pipe was unexpectedly not available"))?;
    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout pipe was unexpectedly not available"))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr pipe was unexpectedly not available"))?;

    // Start draining before feeding stdin: a chatty child must never
    // deadlock against a full output pipe while we are still writing.
    let stdout_handle = tokio::spawn(read_capped(
        BufReader::new(stdout_reader),
        MAX_STREAM_OUTPUT,
    ));
    let stderr_handle = tokio::spawn(read_capped(
        BufReader::new(stderr_reader),
        MAX_STREAM_OUTPUT,
    ));

    // Write the prompt and close the pipe so the assistant sees EOF. A
    // child that exits without reading produces a broken pipe here, which
    // is not our error to report.
    let prompt = params.prompt;
    let stdin_handle = tokio::spawn(async move {
        let _ = stdin.write_all(prompt.as_bytes()).await;
        let _ = stdin.shutdown().await;
    });

    let exit = tokio::select! {
        result = tokio::time::timeout(params.timeout, child.wait()) => {
            match result {
                Ok(Ok(exit_status)) => ExitKind::Exited(exit_status.code().unwrap_or(-1)),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    child.start_kill()?;
                    let _ = child.wait().await;
                    ExitKind::TimedOut
                }
            }
        }
        _ = cancel.cancelled() => {
            child.start_kill()?;
            let _ = child.wait().await;
            ExitKind::Killed
        }
    };

    let _ = stdin_handle.await;
    let stdout = stdout_handle.await.map_err(io::Error::other)??;
    let stderr = stderr_handle.await.map_err(io::Error::other)??;

    Ok(AssistantOutput {
        exit,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

async fn read_capped<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_output: usize,
) -> io::Result<String> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        let budget = max_output.saturating_sub(buf.len());
        if budget > 0 {
            buf.extend_from_slice(&tmp[..n.min(budget)]);
        }
        // Keep reading to EOF even once the cap is hit.
    }

    Ok(String::from_utf8_lossy(&buf).to_string())
}
