//! Credential helper run as a subprocess.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use credrelay_core::codec::{encode_helper_input, parse_helper_output};
use credrelay_core::config::{HelperConfig, HelperStyle};
use credrelay_core::{CredentialResponse, Fields, Operation};

use super::{CredentialHelper, HelperError};

/// Runs the configured helper command once per request.
#[derive(Debug, Clone)]
pub struct ProcessHelper {
    program: String,
    args: Vec<String>,
    style: HelperStyle,
    timeout: Duration,
}

impl ProcessHelper {
    /// `command` is the program followed by leading arguments; the operation
    /// verb is appended on each call.
    pub fn new(command: &[String], style: HelperStyle, timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            style,
            timeout,
        })
    }

    pub fn from_config(config: &HelperConfig) -> Option<Self> {
        Self::new(
            &config.command,
            config.style,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn command(&self, operation: Operation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(verb(self.style, operation))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if self.style == HelperStyle::GitCredential {
            // Git must never fall back to asking on the daemon's terminal.
            cmd.env("GIT_TERMINAL_PROMPT", "0");
        }
        cmd
    }
}

/// Argument naming the operation for the given invocation style.
pub(crate) const fn verb(style: HelperStyle, operation: Operation) -> &'static str {
    match (style, operation) {
        (HelperStyle::Helper, op) => op.as_str(),
        (HelperStyle::GitCredential, Operation::Get) => "fill",
        (HelperStyle::GitCredential, Operation::Store) => "approve",
        (HelperStyle::GitCredential, Operation::Erase) => "reject",
    }
}

#[async_trait]
impl CredentialHelper for ProcessHelper {
    async fn invoke(
        &self,
        operation: Operation,
        fields: &Fields,
    ) -> Result<CredentialResponse, HelperError> {
        let input = encode_helper_input(fields)?;
        let mut child = self
            .command(operation)
            .spawn()
            .map_err(|source| HelperError::Unavailable {
                program: self.program.clone(),
                source,
            })?;
        debug!(program = %self.program, op = %operation, pid = ?child.id(), "Spawned credential helper");

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // A helper may exit without reading its input.
                if let Err(e) = stdin.write_all(&input).await
                    && e.kind() != std::io::ErrorKind::BrokenPipe
                {
                    return Err(e);
                }
                drop(stdin);
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| HelperError::Timeout(self.timeout))??;

        // Killed by a signal: no exit code.
        let status = output.status.code().unwrap_or(-1);
        let response = CredentialResponse::new(parse_helper_output(&output.stdout), status);
        debug!(op = %operation, status, fields = ?response.fields.keys(), "Credential helper finished");

        if output.status.success() {
            Ok(response)
        } else {
            Err(HelperError::Failed { status, response })
        }
    }
}
