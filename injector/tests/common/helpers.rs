//! Test helpers and builder patterns for dispatcher tests

use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Instant;

use injector::services::signals::{self, ProcessStatus};
use injector::services::{ProcessTable, ShellCommandRunner};
use injector::{Dispatcher, EngineConfig, FaultContext, Registry};
use shared::RunArgs;

use super::fixtures::TestFixtures;

/// Builder for dispatchers wired to the real host services
pub struct DispatcherBuilder {
    config: EngineConfig,
    exe_path: String,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            exe_path: TestFixtures::EXE_PATH.to_string(),
        }
    }

    /// Override the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        let runner = Arc::new(ShellCommandRunner::new());
        let locator = Arc::new(ProcessTable::new(runner.clone()));
        let context = FaultContext::new(runner, locator, self.config, self.exe_path);
        Dispatcher::new(Registry::with_defaults(), context)
    }
}

/// Common helper functions for tests
pub struct TestHelpers;

impl TestHelpers {
    /// RunArgs from a whitespace separated command line
    pub fn args(line: &str) -> RunArgs {
        RunArgs::new(line.split_whitespace().map(str::to_string).collect())
    }

    /// Long-lived child that tests can signal
    pub fn spawn_sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("sleep is available")
    }

    /// Poll the process table until `pid` reports `state`
    pub fn wait_for_state(pid: u32, state: ProcessStatus) -> bool {
        let deadline = Instant::now() + TestFixtures::STATE_TIMEOUT;
        while Instant::now() < deadline {
            if signals::process_status(pid as i32).map(|s| s == state).unwrap_or(false) {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        false
    }

    /// Kill and reap a test child
    pub fn reap(mut child: Child) {
        let _ = child.kill();
        let _ = child.wait();
    }
}
