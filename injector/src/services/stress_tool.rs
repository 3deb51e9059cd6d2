//! External stress-tool supervisor
//!
//! Launches a long-running load generator in one invocation and destroys it in
//! another. No process handle survives between the two; the tool is found
//! again by its command line, so the text used to launch it and the text used
//! to search for it are tracked separately.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use shared::{fault_info, fault_warn, FaultType, OpKind, RunArgs};

use crate::error::{FaultError, FaultResult};
use crate::services::signals;
use crate::traits::{check_dependencies, CommandRunner, ProcessLocator};

static NICE_FLAG: OnceLock<Regex> = OnceLock::new();

/// Commands the supervisor shells out to
pub const SUPERVISOR_DEPENDENCIES: &[&str] = &["kill", "ps", "grep", "awk"];

/// Remove every `--nice <int>` pair and normalise whitespace so the result
/// matches the tool's command line in the process table exactly.
pub fn strip_nice(flags: &str) -> String {
    let pattern = NICE_FLAG.get_or_init(|| Regex::new(r"--nice\s+-?\d+").expect("nice pattern is valid"));
    pattern
        .replace_all(flags, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Set the execute bits on the tool if none are present
pub fn ensure_executable(path: &Path) -> FaultResult<()> {
    let meta = std::fs::metadata(path).map_err(|e| FaultError::io("stat stress tool", path, e))?;
    let mode = meta.permissions().mode();
    if mode & 0o111 != 0 {
        return Ok(());
    }

    tracing::info!("Marking {} executable", path.display());
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| FaultError::io("chmod stress tool", path, e))
}

/// A background tool invocation that can be found again later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcess {
    /// What actually gets executed, including any priority prefix
    pub launch_command: String,
    pub nice: Option<i32>,
    /// The tool's own argv as the process table shows it
    pub search_string: String,
}

impl SupervisedProcess {
    pub fn build(tool: &Path, raw_flags: &str, private_args: &[&str], nice: Option<i32>) -> Self {
        let tool = tool.display().to_string();
        let flags = strip_nice(raw_flags);

        let search_string = std::iter::once(tool.as_str())
            .chain(std::iter::once(flags.as_str()))
            .chain(private_args.iter().copied())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let launch_command = match nice {
            Some(level) => format!("nice -n {level} {search_string}"),
            None => search_string.clone(),
        };

        Self {
            launch_command,
            nice,
            search_string,
        }
    }

    /// Launch command with a bounded duration override
    pub fn validation_command(&self, window: &str) -> String {
        format!("{} -t {}", self.launch_command, window)
    }
}

/// Supervises one stress-tool backed fault
pub struct StressTool {
    runner: Arc<dyn CommandRunner>,
    locator: Arc<dyn ProcessLocator>,
    tool_path: PathBuf,
    validation_window: String,
}

impl StressTool {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        locator: Arc<dyn ProcessLocator>,
        tool_path: impl Into<PathBuf>,
        validation_window: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            locator,
            tool_path: tool_path.into(),
            validation_window: validation_window.into(),
        }
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    /// Validate the invocation and build its supervised description.
    ///
    /// Inject runs the tool briefly to prove the flags work and rejects a
    /// second instance; remove only needs the search string.
    pub async fn prepare(
        &self,
        fault: &FaultType,
        args: &RunArgs,
        private_args: &[&str],
    ) -> FaultResult<SupervisedProcess> {
        let flags = args.flags();
        let nice = flags.parse_value::<i32>("nice")?;

        let mut dependencies = SUPERVISOR_DEPENDENCIES.to_vec();
        if nice.is_some() {
            dependencies.push("nice");
        }
        check_dependencies(self.runner.as_ref(), &dependencies)?;

        ensure_executable(&self.tool_path)?;

        let process = SupervisedProcess::build(&self.tool_path, &args.flags_string(), private_args, nice);

        if args.op_kind()? == OpKind::Remove {
            return Ok(process);
        }

        let running = self.locator.locate(&process.search_string).await?;
        if !running.is_empty() {
            return Err(FaultError::already_injected(
                fault,
                format!("{} running as pid(s) {:?}", process.search_string, running),
            ));
        }

        let validation = process.validation_command(&self.validation_window);
        fault_info!(fault, "Validating stress tool: {}", validation);
        let output = self.runner.run_blocking(&validation).await?;
        if let Some(line) = output.lines().find(|line| line.contains("error:")) {
            return Err(FaultError::CommandFailed {
                command: validation,
                status: Some(0),
                output: line.trim().to_string(),
            });
        }

        Ok(process)
    }

    /// Start the validated command without waiting for it
    pub async fn launch(&self, fault: &FaultType, process: &SupervisedProcess) -> FaultResult<()> {
        fault_info!(fault, "Starting: {}", process.launch_command);
        self.runner.spawn_detached(&process.launch_command).await
    }

    /// Kill every process whose command line matches the search string
    pub async fn destroy(&self, fault: &FaultType, process: &SupervisedProcess) -> FaultResult<usize> {
        let pids = self.locator.locate(&process.search_string).await?;
        if pids.is_empty() {
            fault_warn!(fault, "No running instance of: {}", process.search_string);
            return Err(FaultError::ProcessNotFound {
                search: process.search_string.clone(),
            });
        }

        let killed = signals::kill_all(&pids)?;
        fault_info!(fault, "Killed {} instance(s) of: {}", killed, process.search_string);
        Ok(killed)
    }
}
