//! Rootwrap daemon client.
//!
//! One long-lived privileged helper process with a newline-delimited JSON
//! protocol over its stdin/stdout: a command (argument strings) plus
//! optional stdin bytes in, a {returncode, stdout, stderr} tuple out.
//! The executor keeps exactly one of these behind a lock.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::process::executor::{CommandResult, ExecError};

#[derive(Serialize)]
struct DaemonRequest<'a> {
    cmd: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

#[derive(Deserialize)]
struct DaemonResponse {
    returncode: i32,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

/// A connection to the pre-started privileged helper daemon.
pub struct RootwrapDaemonClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl RootwrapDaemonClient {
    /// Start the helper daemon and take ownership of its pipes.
    pub fn spawn(command: &[String]) -> Result<Self, ExecError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ExecError::Daemon("empty daemon command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecError::Daemon(format!("failed to start '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::Daemon("daemon stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| ExecError::Daemon("daemon stdout unavailable".to_string()))?;

        Ok(Self { child, stdin, stdout })
    }

    /// Forward one command over the connection and wait for its result.
    pub fn execute(
        &mut self,
        cmd: &[String],
        input: Option<&[u8]>,
    ) -> Result<CommandResult, ExecError> {
        let request = DaemonRequest {
            cmd,
            stdin: input.map(|b| String::from_utf8_lossy(b).into_owned()),
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| ExecError::Daemon(format!("encode request: {e}")))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|e| ExecError::Daemon(format!("write to daemon: {e}")))?;

        let mut response_line = String::new();
        let read = self
            .stdout
            .read_line(&mut response_line)
            .map_err(|e| ExecError::Daemon(format!("read from daemon: {e}")))?;
        if read == 0 {
            return Err(ExecError::Daemon("daemon closed the connection".to_string()));
        }

        let response: DaemonResponse = serde_json::from_str(response_line.trim_end())
            .map_err(|e| ExecError::Daemon(format!("decode response: {e}")))?;

        Ok(CommandResult {
            returncode: response.returncode,
            stdout: response.stdout,
            stderr: response.stderr,
        })
    }
}

impl Drop for RootwrapDaemonClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
