//! Conversational AI backend
//!
//! Adapts the Claude Code CLI to an `ask`/`cancel`/`reset` contract with
//! session continuity. Each `ask` spawns one `claude --print` subprocess;
//! the session state decides whether that invocation starts fresh, reattaches
//! to a session predating this process, or continues the session this process
//! already started.
//!
//! The caller contract guarantees single-flight `ask` usage (the worker is
//! the only asker). `cancel` may race `ask` from another task; it only ever
//! terminates the outstanding call, never starts one.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AiConfig;
use crate::{Error, Result};

/// Session continuity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange yet; next call starts a new session with the system prompt
    Fresh,
    /// Next call tries to reattach to the most recent prior session,
    /// falling back once to a fresh start if that fails
    ResumePending,
    /// A successful exchange happened; next call continues that session
    Continuing,
}

/// Directive passed to one subprocess invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Fresh,
    Resume,
    Continue,
}

/// Contract between the worker and the AI backend
#[async_trait]
pub trait ConversationalAgent: Send + Sync {
    /// Send one user message and return the trimmed response text
    ///
    /// # Errors
    ///
    /// Returns `AgentTimeout`, `AgentExit`, `AgentEmpty` or `AgentCancelled`
    /// depending on how the exchange failed.
    async fn ask(&self, text: &str) -> Result<String>;

    /// Terminate the outstanding call, if any; no-op otherwise
    async fn cancel(&self);

    /// Force the next call to start a fresh session
    async fn reset(&self);
}

/// AI backend driving the Claude Code CLI as a subprocess
pub struct ClaudeBackend {
    command: PathBuf,
    config: AiConfig,
    session: Mutex<SessionState>,
    active: Mutex<Option<CancellationToken>>,
}

impl ClaudeBackend {
    /// Create a new backend, resolving the agent binary
    ///
    /// # Errors
    ///
    /// Returns error if the configured binary cannot be found on `PATH`.
    pub fn new(config: AiConfig) -> Result<Self> {
        let command = if config.command.contains(std::path::MAIN_SEPARATOR) {
            PathBuf::from(&config.command)
        } else {
            which::which(&config.command).map_err(|e| {
                Error::Config(format!("agent binary '{}' not found: {e}", config.command))
            })?
        };

        let initial = if config.resume_session {
            SessionState::ResumePending
        } else {
            SessionState::Fresh
        };

        tracing::debug!(
            command = %command.display(),
            working_directory = %config.working_directory.display(),
            resume_session = config.resume_session,
            "agent backend initialized"
        );

        Ok(Self {
            command,
            config,
            session: Mutex::new(initial),
            active: Mutex::new(None),
        })
    }

    /// Current session state (test and status instrumentation)
    pub async fn session_state(&self) -> SessionState {
        *self.session.lock().await
    }

    /// Build CLI arguments for one invocation
    fn build_args(&self, directive: Directive, text: &str) -> Vec<String> {
        let mut args = vec!["--print".to_string()];

        match directive {
            Directive::Fresh => {
                if !self.config.system_prompt.is_empty() {
                    args.push("--system-prompt".to_string());
                    args.push(self.config.system_prompt.clone());
                }
            }
            Directive::Resume | Directive::Continue => {
                args.push("--continue".to_string());
            }
        }

        args.push(text.to_string());
        args
    }

    /// Run one subprocess invocation to completion, cancellation or deadline
    async fn run_once(&self, directive: Directive, text: &str) -> Result<String> {
        let args = self.build_args(directive, text);

        tracing::info!(
            directive = ?directive,
            prompt = %preview(text),
            "asking agent"
        );

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&self.config.working_directory)
            // Allow running inside an outer Claude Code session
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Agent(format!("failed to spawn agent: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Agent("agent stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Agent("agent stderr not captured".to_string()))?;

        // Drain pipes concurrently so a large response cannot deadlock the child
        let stdout_task = tokio::spawn(read_to_string(stdout));
        let stderr_task = tokio::spawn(read_to_string(stderr));

        let token = CancellationToken::new();
        *self.active.lock().await = Some(token.clone());

        let grace = Duration::from_secs(self.config.kill_grace_sec);
        let deadline = tokio::time::sleep(Duration::from_secs(self.config.timeout_sec));
        tokio::pin!(deadline);

        let status = tokio::select! {
            status = child.wait() => {
                self.clear_active().await;
                status.map_err(|e| Error::Agent(format!("agent wait failed: {e}")))?
            }
            () = token.cancelled() => {
                terminate(&mut child, grace).await;
                self.clear_active().await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::info!("agent call cancelled");
                return Err(Error::AgentCancelled);
            }
            () = &mut deadline => {
                terminate(&mut child, grace).await;
                self.clear_active().await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::warn!(timeout_sec = self.config.timeout_sec, "agent call timed out");
                return Err(Error::AgentTimeout {
                    secs: self.config.timeout_sec,
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(Error::AgentExit {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let response = stdout.trim().to_string();
        if response.is_empty() {
            return Err(Error::AgentEmpty);
        }

        tracing::info!(response = %preview(&response), "agent response");
        Ok(response)
    }

    async fn clear_active(&self) {
        *self.active.lock().await = None;
    }
}

#[async_trait]
impl ConversationalAgent for ClaudeBackend {
    async fn ask(&self, text: &str) -> Result<String> {
        let state = *self.session.lock().await;

        let result = match state {
            SessionState::Fresh => self.run_once(Directive::Fresh, text).await,
            SessionState::Continuing => self.run_once(Directive::Continue, text).await,
            SessionState::ResumePending => {
                match self.run_once(Directive::Resume, text).await {
                    Ok(response) => Ok(response),
                    // User cancellation aborts the turn outright
                    Err(Error::AgentCancelled) => Err(Error::AgentCancelled),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "session resume failed, falling back to a fresh session"
                        );
                        self.run_once(Directive::Fresh, text).await
                    }
                }
            }
        };

        // Only a confirmed successful exchange advances the state machine
        if result.is_ok() {
            *self.session.lock().await = SessionState::Continuing;
        }

        result
    }

    async fn cancel(&self) {
        let active = self.active.lock().await;
        if let Some(token) = active.as_ref() {
            tracing::info!("cancelling outstanding agent call");
            token.cancel();
        } else {
            tracing::debug!("cancel requested with no outstanding agent call");
        }
    }

    async fn reset(&self) {
        *self.session.lock().await = SessionState::Fresh;
        tracing::info!("agent session reset");
    }
}

/// Read a pipe to EOF as lossy UTF-8
async fn read_to_string(mut pipe: impl AsyncReadExt + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Terminate the child: polite signal first, hard kill after the grace period
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = Command::new("kill").arg(pid.to_string()).status().await;
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(pid, "agent ignored terminate signal, killing");
    }

    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// First 80 characters, for log lines
fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
