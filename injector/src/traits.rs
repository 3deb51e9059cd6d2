//! Trait definitions with mockall annotations for testing
//!
//! Every boundary between the fault lifecycle engine and the host sits behind
//! one of these traits so plugins can be exercised against mocks.

use std::io;
use std::path::Path;

use shared::{FaultType, RunArgs};

use crate::error::{FaultError, FaultResult};

/// Shell command execution
///
/// Commands are full shell strings (`sh -c`), so redirections such as
/// `echo 0 > /sys/...` work unchanged.
#[mockall::automock]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and return combined stdout and stderr.
    ///
    /// A non-zero exit yields `CommandFailed` carrying the exit status and the
    /// captured output.
    async fn run_blocking(&self, command: &str) -> FaultResult<String>;

    /// Start the command detached from this process and return immediately
    async fn spawn_detached(&self, command: &str) -> FaultResult<()>;

    /// Whether an executable with this name is reachable on PATH
    fn has_command(&self, name: &str) -> bool;
}

/// Locates running processes by command-line text
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessLocator: Send + Sync {
    /// Every pid whose command line full-word-matches `search`, excluding the
    /// calling process
    async fn locate(&self, search: &str) -> FaultResult<Vec<u32>>;
}

/// Three-phase lifecycle every fault type implements
///
/// `prepare` validates without side effects and must run first. `inject` and
/// `remove` usually run in separate invocations, so `remove` re-derives its
/// state from disk or the process table.
#[mockall::automock]
#[async_trait::async_trait]
pub trait FaultPlugin: Send + Sync {
    fn fault_type(&self) -> FaultType;

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()>;

    async fn inject(&mut self, args: &RunArgs) -> FaultResult<()>;

    async fn remove(&mut self, args: &RunArgs) -> FaultResult<()>;
}

/// Filesystem operations driven by the exhaustion workers
///
/// Called from blocking worker threads.
#[mockall::automock]
pub trait ExhaustionTarget: Send + Sync {
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    fn create_file(&self, path: &Path) -> io::Result<()>;

    /// Free inode count of the target mount
    fn free_inodes(&self) -> io::Result<u64>;
}

/// Fail with the first command in `commands` that is not on PATH
pub fn check_dependencies(runner: &dyn CommandRunner, commands: &[&str]) -> FaultResult<()> {
    match commands.iter().find(|name| !runner.has_command(name)) {
        Some(missing) => Err(FaultError::MissingCommand {
            command: missing.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_check_dependencies_names_first_missing() {
        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().with(eq("ps")).returning(|_| true);
        runner.expect_has_command().with(eq("dd")).returning(|_| false);

        let err = check_dependencies(&runner, &["ps", "dd", "kill"]).unwrap_err();
        assert!(matches!(err, FaultError::MissingCommand { ref command } if command == "dd"));
    }

    #[test]
    fn test_check_dependencies_passes_when_all_present() {
        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().returning(|_| true);

        assert!(check_dependencies(&runner, &["echo", "kill"]).is_ok());
    }
}
