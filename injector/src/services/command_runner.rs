//! Shell command runner backed by tokio processes

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{FaultError, FaultResult};
use crate::traits::CommandRunner;

/// How long a detached launch is watched for an immediate failure
const LAUNCH_GRACE: Duration = Duration::from_millis(200);

/// Runs commands through `sh -c`
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    launch_grace: Duration,
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            launch_grace: LAUNCH_GRACE,
        }
    }

    /// Configure how long detached launches are watched (fluent API)
    pub fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run_blocking(&self, command: &str) -> FaultResult<String> {
        debug!("Running: {}", command);

        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FaultError::LaunchFailed {
                command: command.to_string(),
                output: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(FaultError::CommandFailed {
                command: command.to_string(),
                status: output.status.code(),
                output: combined.trim_end().to_string(),
            })
        }
    }

    async fn spawn_detached(&self, command: &str) -> FaultResult<()> {
        info!("Launching in background: {}", command);

        let mut child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group so terminal signals to the CLI do not reach it
            .process_group(0)
            .spawn()
            .map_err(|e| FaultError::LaunchFailed {
                command: command.to_string(),
                output: e.to_string(),
            })?;

        tokio::time::sleep(self.launch_grace).await;

        match child.try_wait() {
            Ok(Some(status)) if !status.success() => Err(FaultError::LaunchFailed {
                command: command.to_string(),
                output: format!("exited immediately with {status}"),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(FaultError::LaunchFailed {
                command: command.to_string(),
                output: e.to_string(),
            }),
        }
    }

    fn has_command(&self, name: &str) -> bool {
        if name.contains('/') {
            return is_executable(Path::new(name));
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
            .unwrap_or(false)
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
