//! Remote command execution over ssh.
//!
//! Stages describe what to run as structured argv; the lowering to a shell
//! line quotes every word, so untrusted values from webhook payloads can
//! never splice extra commands into the session.

use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::info;

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// One command to run on the deployment target: an optional working
/// directory plus argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub working_dir: Option<String>,
    pub argv: Vec<String>,
}

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            working_dir: None,
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn in_dir<I, S>(dir: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            working_dir: Some(dir.into()),
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Lowers the command to a single shell line, quoting each word.
    pub fn shell_line(&self) -> String {
        let command = self
            .argv
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ");
        match &self.working_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
            None => command,
        }
    }
}

/// Single-quotes a word for the remote shell unless it is plainly safe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Capability to run a command on the deployment target. The transport
/// (ssh, an agent, a test double) stays swappable behind this trait.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, command: &RemoteCommand) -> io::Result<CommandOutput>;
}

/// Runs commands over `ssh <host> <script>`.
pub struct SshExecutor {
    host: String,
}

impl SshExecutor {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &RemoteCommand) -> io::Result<CommandOutput> {
        let script = command.shell_line();
        info!("Running on '{}': {}", self.host, script);

        let output = Command::new("ssh")
            .arg(&self.host)
            .arg(&script)
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        })
    }
}
