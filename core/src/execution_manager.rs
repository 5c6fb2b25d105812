//! Orchestrates one assistant invocation end to end: validation, rate
//! limiting, context initialization, prompt build, spawn, timeout, and
//! result classification.
//!
//! Executions for the same working directory are serialized by a real
//! per-directory lock held from context initialization until the result
//! is classified; the room coordinator's in-flight flag is only the UI
//! signal layered on top.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Instant;

use chrono::Utc;
use huddle_protocol::protocol::ActiveSession;
use huddle_protocol::protocol::ErrorKind;
use huddle_protocol::protocol::ExecutionRequest;
use huddle_protocol::protocol::ExecutionResult;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use uuid::Uuid;

use crate::config::Config;
use crate::context_store::ContextStore;
use crate::error::ExecutionError;
use crate::exec;
use crate::exec::AssistantOutput;
use crate::exec::AssistantParams;
use crate::exec::ExitKind;
use crate::prompt::PromptBuilder;
use crate::rate_limiter::Acquire;
use crate::rate_limiter::RateLimiter;
use crate::rooms::RoomCoordinator;
use crate::sandbox;

/// Synthetic output of the reset command.
pub const RESET_OUTPUT: &str = "Context cleared. Starting fresh session.";

struct ActiveSessionHandle {
    info: ActiveSession,
    cancel: CancellationToken,
}

pub struct ExecutionManager {
    config: Config,
    context_store: ContextStore,
    rate_limiter: RateLimiter,
    rooms: Arc<RoomCoordinator>,
    active: Mutex<HashMap<Uuid, ActiveSessionHandle>>,
    directory_locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl ExecutionManager {
    pub fn new(config: Config, rooms: Arc<RoomCoordinator>) -> Self {
        let context_store = ContextStore::new(config.context_line_cap);
        let rate_limiter = RateLimiter::new(config.rate_limit_ceiling, config.rate_limit_window);
        Self {
            config,
            context_store,
            rate_limiter,
            rooms,
            active: Mutex::new(HashMap::new()),
            directory_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run one command. Validation and rate-limit failures return `Err`
    /// without side effects; everything after a spawn attempt resolves to
    /// an [`ExecutionResult`], with process-level failures on its failure
    /// branch so peers' UIs still unlock.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        // The reset command bypasses rate limiting entirely so that
        // resetting a stuck session is never itself rate-limited.
        if request.prompt.trim() == sandbox::RESET_KEYWORD {
            if let Err(err) = self.context_store.reset(&request.directory).await {
                error!(
                    "context reset failed for {}: {err}",
                    request.directory.display()
                );
            }
            self.rooms
                .chat_cleared(&request.directory, &request.actor_id);
            return Ok(ExecutionResult {
                success: true,
                output: RESET_OUTPUT.to_string(),
                duration_ms: 0,
                session_id: Uuid::new_v4(),
                error_kind: None,
                error_message: None,
            });
        }

        let directory = sandbox::validate_directory(&request.directory, &self.config.denied_roots)?;
        let task = sandbox::sanitize_prompt(&request.prompt, self.config.max_prompt_chars)?;

        if let Acquire::Denied { retry_after } = self.rate_limiter.try_acquire(&request.actor_id) {
            return Err(ExecutionError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        // Genuine per-directory exclusivity: a concurrent command for the
        // same directory parks here instead of racing the room's advisory
        // flag. Held through context init so the document has a single
        // writer while an assistant for this directory is running.
        let directory_lock = self.directory_lock(&directory);
        let _exclusive = directory_lock.lock().await;

        // Context failures degrade to running without the wrapping; the
        // command itself still gets a response.
        let mut context_line_cap = request
            .context_enabled
            .then_some(self.config.context_line_cap);
        let mut warning = None;
        if context_line_cap.is_some() {
            match self.context_store.ensure(&directory).await {
                Ok(outcome) => warning = outcome.warning,
                Err(err) => {
                    error!(
                        "context init failed for {}; running without context: {err}",
                        directory.display()
                    );
                    context_line_cap = None;
                }
            }
        }

        let mut builder = PromptBuilder::new(&directory, request.action, &task);
        if let Some(line_cap) = context_line_cap {
            builder = builder.with_context(line_cap);
        }
        let prompt = builder.build();

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.register_session(session_id, &request.actor_id, &directory, cancel.clone());
        self.rooms
            .command_started(&directory, &task, &request.actor_id);

        let params = AssistantParams {
            program: self.config.assistant_program.clone(),
            args: self.config.assistant_args.clone(),
            cwd: directory.clone(),
            prompt,
            timeout: self.config.exec_timeout,
            env: exec::assistant_env(session_id, &request.actor_id),
        };
        let started = Instant::now();
        let outcome = exec::run_assistant(params, cancel).await;
        self.remove_session(session_id);

        let result = match outcome {
            Ok(output) => self.classify(session_id, output, warning.as_deref()),
            Err(err) => {
                error!("failed to start assistant process: {err}");
                ExecutionResult {
                    success: false,
                    output: prefix_warning(warning.as_deref(), String::new()),
                    duration_ms: started.elapsed().as_millis() as u64,
                    session_id,
                    error_kind: Some(ErrorKind::ProcessStartFailed),
                    error_message: Some(format!("failed to start assistant process: {err}")),
                }
            }
        };

        self.rooms
            .command_completed(&directory, result.success, &request.actor_id);
        Ok(result)
    }

    pub fn list_active_sessions(&self) -> Vec<ActiveSession> {
        self.active_lock()
            .values()
            .map(|handle| handle.info.clone())
            .collect()
    }

    /// Out-of-band cancellation. The pending `execute` call resolves
    /// through the normal exit classification once the child is gone.
    pub fn kill_session(&self, session_id: Uuid) -> bool {
        let handle = self.active_lock().remove(&session_id);
        match handle {
            Some(handle) => {
                debug!("killing session {session_id}");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn classify(
        &self,
        session_id: Uuid,
        output: AssistantOutput,
        warning: Option<&str>,
    ) -> ExecutionResult {
        let AssistantOutput {
            exit,
            stdout,
            stderr,
            duration,
        } = output;
        let duration_ms = duration.as_millis() as u64;

        match exit {
            ExitKind::Exited(0) => ExecutionResult {
                success: true,
                output: prefix_warning(warning, stdout),
                duration_ms,
                session_id,
                error_kind: None,
                error_message: None,
            },
            ExitKind::Exited(code) => {
                let detail = if stderr.trim().is_empty() {
                    stdout.clone()
                } else {
                    stderr
                };
                ExecutionResult {
                    success: false,
                    output: prefix_warning(warning, stdout),
                    duration_ms,
                    session_id,
                    error_kind: Some(ErrorKind::ProcessFailed),
                    error_message: Some(format!(
                        "assistant exited with status {code}: {}",
                        detail.trim()
                    )),
                }
            }
            ExitKind::TimedOut => ExecutionResult {
                success: false,
                output: prefix_warning(warning, stdout),
                duration_ms,
                session_id,
                error_kind: Some(ErrorKind::TimedOut),
                error_message: Some(format!(
                    "assistant did not finish within {}s; consider a simpler request",
                    self.config.exec_timeout.as_secs()
                )),
            },
            ExitKind::Killed => ExecutionResult {
                success: false,
                output: prefix_warning(warning, stdout),
                duration_ms,
                session_id,
                error_kind: Some(ErrorKind::ProcessFailed),
                error_message: Some("execution cancelled".to_string()),
            },
        }
    }

    fn register_session(
        &self,
        session_id: Uuid,
        actor_id: &str,
        directory: &Path,
        cancel: CancellationToken,
    ) {
        self.active_lock().insert(
            session_id,
            ActiveSessionHandle {
                info: ActiveSession {
                    session_id,
                    actor_id: actor_id.to_string(),
                    directory: directory.to_path_buf(),
                    started_at: Utc::now(),
                },
                cancel,
            },
        );
    }

    fn remove_session(&self, session_id: Uuid) {
        self.active_lock().remove(&session_id);
    }

    fn directory_lock(&self, directory: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.directory_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(directory.to_path_buf()).or_default().clone()
    }

    fn active_lock(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveSessionHandle>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn prefix_warning(warning: Option<&str>, output: String) -> String {
    match warning {
        Some(warning) if output.is_empty() => warning.to_string(),
        Some(warning) => format!("{warning}\n\n{output}"),
        None => output,
    }
}
