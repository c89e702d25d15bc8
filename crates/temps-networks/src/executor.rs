//! Remote command execution
//!
//! The driver never builds shell strings: it hands a program plus argv to a
//! [`CommandExecutor`], which decides how to reach the server.

use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::resources::Server;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command to run on a server: program and arguments, unquoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render as a single POSIX shell command line
    pub fn to_shell(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_shell())
    }
}

/// Quote one argument for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '@')
        });
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr, or stdout when the command wrote its error there
    pub fn error_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs commands on a server and returns their output.
///
/// Implementations must honour `timeout`; exceeding it is an
/// [`ExecutorError::Timeout`], never a hang.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        server: &Server,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Executes commands locally, or through `ssh` when the server has an
/// SSH target.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    ssh_options: Vec<String>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            ssh_options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
        }
    }

    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    fn build(&self, server: &Server, command: &RemoteCommand) -> Command {
        match &server.ssh_target {
            Some(target) => {
                let mut cmd = Command::new("ssh");
                cmd.args(&self.ssh_options)
                    .arg(target)
                    .arg("--")
                    .arg(command.to_shell());
                cmd
            }
            None => {
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args);
                cmd
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        server: &Server,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutorError> {
        debug!(server_id = server.id, "Executing: {}", command);

        let mut cmd = self.build(server, command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutorError::Unavailable(format!("{} is not installed", command.program))
            } else {
                ExecutorError::Io(e)
            }
        })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::Timeout {
                seconds: timeout.as_secs(),
            })??;

        // ssh reports its own connection failures with exit code 255
        let exit_code = output.status.code().unwrap_or(-1);
        if server.ssh_target.is_some() && exit_code == 255 {
            return Err(ExecutorError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn local_server() -> Server {
        Server {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "local".to_string(),
            team_id: 1,
            ssh_target: None,
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("temps-env-1"), "temps-env-1");
        assert_eq!(shell_quote("label=temps.managed=true"), "label=temps.managed=true");
        assert_eq!(shell_quote("{{json .}}"), "'{{json .}}'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_to_shell() {
        let command = RemoteCommand::docker()
            .args(["network", "ls"])
            .arg("--format")
            .arg("{{json .}}");
        assert_eq!(command.to_shell(), "docker network ls --format '{{json .}}'");
    }

    #[test]
    fn test_error_text_prefers_stderr() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "  boom \n".to_string(),
        };
        assert_eq!(output.error_text(), "boom");
        assert_eq!(CommandOutput::failure(1, "").error_text(), "");
    }

    #[tokio::test]
    async fn test_local_execution_captures_output() {
        let executor = ShellExecutor::new();
        let output = executor
            .execute(
                &local_server(),
                &RemoteCommand::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_execution_times_out() {
        let executor = ShellExecutor::new();
        let result = executor
            .execute(
                &local_server(),
                &RemoteCommand::new("sleep").arg("5"),
                Duration::from_millis(100),
            )
            .await;

        assert!(matches!(result, Err(ExecutorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let executor = ShellExecutor::new();
        let result = executor
            .execute(
                &local_server(),
                &RemoteCommand::new("temps-definitely-not-installed"),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(ExecutorError::Unavailable(_))));
    }
}
