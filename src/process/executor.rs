//! Privileged command execution.
//!
//! # Responsibilities
//! - Spawn commands and capture {returncode, stdout, stderr}
//! - Prefix privileged calls with the configured root helper
//! - Forward privileged calls over the rootwrap daemon connection when one
//!   is configured, amortizing the escalation cost
//!
//! # Design Decisions
//! - Blocking std::process execution; serialization is the caller's concern
//! - Full command line and captured output logged at debug on success,
//!   error on failure

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use thiserror::Error;

use crate::config::schema::RootwrapConfig;
use crate::process::daemon::RootwrapDaemonClient;

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be started at all.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited with an unacceptable code.
    #[error("command '{command}' exited with code {code}: {stderr}")]
    ExitCode {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The rootwrap daemon connection could not be established or used.
    /// Fatal at startup; the agent cannot run privileged commands without it.
    #[error("rootwrap daemon: {0}")]
    Daemon(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform result of a command, whichever execution mode produced it.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

/// Executes command lines that may require elevated privileges.
///
/// Two escalation modes: per-call (prefix with `root_helper`, fresh process
/// every time) and daemon (one long-lived connection to a pre-started
/// privileged helper). The daemon client is created lazily under a lock so
/// only one connection is ever established.
pub struct PrivilegedExecutor {
    root_helper: Vec<String>,
    daemon_command: Vec<String>,
    daemon: Mutex<Option<RootwrapDaemonClient>>,
}

impl PrivilegedExecutor {
    pub fn new(config: &RootwrapConfig) -> Self {
        let split = |s: &Option<String>| {
            s.as_deref()
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self {
            root_helper: split(&config.root_helper),
            daemon_command: split(&config.root_helper_daemon),
            daemon: Mutex::new(None),
        }
    }

    /// Eagerly establish the daemon connection when one is configured.
    /// Called once at startup so an unreachable helper is fatal early
    /// instead of failing the first privileged command.
    pub fn connect_daemon(&self) -> Result<(), ExecError> {
        if self.daemon_command.is_empty() {
            return Ok(());
        }
        let mut guard = self.lock_daemon();
        if guard.is_none() {
            *guard = Some(RootwrapDaemonClient::spawn(&self.daemon_command)?);
            tracing::info!(
                command = %self.daemon_command.join(" "),
                "Rootwrap daemon connection established"
            );
        }
        Ok(())
    }

    /// Run `cmd`, feeding `input` to its stdin when given.
    ///
    /// A non-zero exit code outside `extra_ok_codes` is logged at error
    /// level and, with `check_exit_code`, surfaced as `ExecError::ExitCode`;
    /// otherwise the raw result is returned for the caller to judge.
    pub fn execute(
        &self,
        cmd: &[String],
        input: Option<&[u8]>,
        check_exit_code: bool,
        extra_ok_codes: &[i32],
        run_as_root: bool,
    ) -> Result<CommandResult, ExecError> {
        let result = if run_as_root && !self.daemon_command.is_empty() {
            self.execute_via_daemon(cmd, input)?
        } else {
            self.execute_spawn(cmd, input, run_as_root)?
        };

        let command_line = cmd.join(" ");
        let acceptable = result.success() || extra_ok_codes.contains(&result.returncode);

        if acceptable {
            tracing::debug!(
                command = %command_line,
                code = result.returncode,
                stdout = %result.stdout,
                stderr = %result.stderr,
                "Command finished"
            );
            return Ok(result);
        }

        tracing::error!(
            command = %command_line,
            code = result.returncode,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "Command failed"
        );
        if check_exit_code {
            return Err(ExecError::ExitCode {
                command: command_line,
                code: result.returncode,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    fn execute_spawn(
        &self,
        cmd: &[String],
        input: Option<&[u8]>,
        run_as_root: bool,
    ) -> Result<CommandResult, ExecError> {
        let mut full: Vec<&str> = Vec::new();
        if run_as_root {
            full.extend(self.root_helper.iter().map(String::as_str));
        }
        full.extend(cmd.iter().map(String::as_str));

        let (program, args) = full.split_first().ok_or_else(|| ExecError::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        tracing::debug!(command = %full.join(" "), "Running command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: full.join(" "),
                source,
            })?;

        if let Some(bytes) = input {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(bytes)?;
            }
        }
        // Drop stdin so the child sees EOF before we wait.
        drop(child.stdin.take());

        let output = child.wait_with_output()?;
        Ok(CommandResult {
            returncode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn execute_via_daemon(
        &self,
        cmd: &[String],
        input: Option<&[u8]>,
    ) -> Result<CommandResult, ExecError> {
        tracing::debug!(command = %cmd.join(" "), "Running command (rootwrap daemon)");
        let mut guard = self.lock_daemon();
        if guard.is_none() {
            *guard = Some(RootwrapDaemonClient::spawn(&self.daemon_command)?);
        }
        let client = guard.as_mut().ok_or_else(|| {
            ExecError::Daemon("client unavailable after connect".to_string())
        })?;
        match client.execute(cmd, input) {
            Ok(result) => Ok(result),
            Err(err) => {
                // A broken pipe means the daemon is gone; drop the client so
                // the next call re-establishes the connection.
                *guard = None;
                Err(err)
            }
        }
    }

    fn lock_daemon(&self) -> std::sync::MutexGuard<'_, Option<RootwrapDaemonClient>> {
        self.daemon.lock().expect("rootwrap daemon lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_executor() -> PrivilegedExecutor {
        PrivilegedExecutor::new(&RootwrapConfig::default())
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_execute_captures_stdout() {
        let result = plain_executor()
            .execute(&cmd(&["echo", "hello"]), None, true, &[], false)
            .unwrap();
        assert_eq!(result.returncode, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn test_execute_feeds_stdin() {
        let result = plain_executor()
            .execute(&cmd(&["cat"]), Some(b"ping"), true, &[], false)
            .unwrap();
        assert_eq!(result.stdout, "ping");
    }

    #[test]
    fn test_nonzero_exit_is_error_when_checked() {
        let err = plain_executor()
            .execute(&cmd(&["false"]), None, true, &[], false)
            .unwrap_err();
        assert!(matches!(err, ExecError::ExitCode { code: 1, .. }));
    }

    #[test]
    fn test_extra_ok_codes_accepted() {
        let result = plain_executor()
            .execute(&cmd(&["false"]), None, true, &[1], false)
            .unwrap();
        assert_eq!(result.returncode, 1);
    }

    #[test]
    fn test_unchecked_failure_returns_result() {
        let result = plain_executor()
            .execute(&cmd(&["false"]), None, false, &[], false)
            .unwrap();
        assert!(!result.success());
    }

    #[test]
    fn test_root_helper_prefixes_command() {
        // "env" as a helper is a no-op prefix that still runs the command.
        let executor = PrivilegedExecutor::new(&RootwrapConfig {
            root_helper: Some("env".to_string()),
            root_helper_daemon: None,
        });
        let result = executor
            .execute(&cmd(&["echo", "elevated"]), None, true, &[], true)
            .unwrap();
        assert_eq!(result.stdout.trim(), "elevated");
    }
}
