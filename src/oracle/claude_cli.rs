//! Command-line oracle transport.
//!
//! Shells out to an oracle CLI (by default `claude --print <prompt>`),
//! bounded by the configured hard timeout. There is no retry here: a
//! timed-out or failed rule simply stays in the retry pool for the next
//! convergence pass.

use super::{Oracle, OracleFailure};
use crate::config::OracleConfig;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

/// Characters of stderr kept on a non-zero exit.
const STDERR_LIMIT: usize = 200;

/// Oracle transport that invokes an external CLI process per request.
pub struct CliOracle {
    config: OracleConfig,
}

impl CliOracle {
    /// Creates a new CLI oracle with the given invocation settings.
    #[must_use]
    pub const fn new(config: OracleConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Oracle for CliOracle {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleFailure> {
        // Prompt goes as an argument, not stdin; stdin is closed so a
        // misbehaving oracle cannot hang waiting for input.
        let mut child = Command::new(&self.config.command)
            .arg("--print")
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OracleFailure::Unavailable(self.config.command.clone())
                } else {
                    OracleFailure::Io(format!("failed to spawn oracle: {e}"))
                }
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleFailure::Io("missing stdout handle".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| OracleFailure::Io("missing stderr handle".to_string()))?;

        let timeout_secs = self.config.timeout_secs;
        let result = timeout(Duration::from_secs(timeout_secs), async {
            let mut output = String::new();
            stdout
                .read_to_string(&mut output)
                .await
                .map_err(|e| OracleFailure::Io(format!("failed to read stdout: {e}")))?;

            let mut errors = String::new();
            stderr
                .read_to_string(&mut errors)
                .await
                .map_err(|e| OracleFailure::Io(format!("failed to read stderr: {e}")))?;

            let status = child
                .wait()
                .await
                .map_err(|e| OracleFailure::Io(format!("failed to wait for oracle: {e}")))?;

            Ok::<_, OracleFailure>((output, errors, status))
        })
        .await;

        match result {
            Ok(Ok((output, errors, status))) => {
                if status.success() {
                    Ok(output.trim().to_string())
                } else {
                    Err(OracleFailure::NonZeroExit {
                        code: status.code(),
                        stderr: errors.chars().take(STDERR_LIMIT).collect(),
                    })
                }
            },
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(OracleFailure::Timeout(timeout_secs)),
        }
    }
}
