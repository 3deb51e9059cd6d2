//! Process faults driven by signals

use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use shared::{fault_info, parse_interval, FaultModule, FaultType, Flags, OpKind, RunArgs};

use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::services::signals;
use crate::traits::{check_dependencies, FaultPlugin};

pub const PROCESS_HANG: &str = "process-hang";
pub const PROCESS_CHOKING: &str = "process-choking";
pub const PROCESS_EXIT_ABNORMAL: &str = "process-exit-abnormal";

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::Process, PROCESS_HANG, process_hang);
    registry.register(FaultModule::Process, PROCESS_CHOKING, process_choking);
    registry.register(FaultModule::Process, PROCESS_EXIT_ABNORMAL, process_exit_abnormal);
}

fn process_hang(_ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(ProcessHang::new())
}

fn process_choking(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(ProcessChoking::new(ctx))
}

fn process_exit_abnormal(_ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(ProcessExitAbnormal::new())
}

/// Positive `--pid` of a live process
fn target_pid(flags: &Flags) -> FaultResult<i32> {
    let pid: i32 = flags.require_parsed("pid")?;
    if pid <= 0 {
        return Err(FaultError::invalid_flag("pid", pid.to_string(), "must be positive"));
    }
    if !signals::process_exists(pid) {
        return Err(FaultError::target_absent(format!("process {pid}")));
    }
    Ok(pid)
}

/// Stops a process with SIGSTOP and resumes it with SIGCONT
#[derive(Debug)]
pub struct ProcessHang {
    fault_type: FaultType,
    pid: i32,
}

impl ProcessHang {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(PROCESS_HANG),
            pid: 0,
        }
    }
}

impl Default for ProcessHang {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for ProcessHang {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.pid = target_pid(&args.flags())?;
        if args.op_kind()? == OpKind::Inject && signals::is_stopped(self.pid)? {
            return Err(FaultError::already_injected(
                &self.fault_type,
                format!("process {} is already stopped", self.pid),
            ));
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Stopping process {}", self.pid);
        signals::send_signal(self.pid, Signal::SIGSTOP)
    }

    /// Resuming a process that was never stopped is a no-op for the kernel
    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Resuming process {}", self.pid);
        signals::send_signal(self.pid, Signal::SIGCONT)
    }
}

/// Alternates STOP and CONT on a target for as long as the inject
/// invocation lives
pub struct ProcessChoking {
    ctx: FaultContext,
    fault_type: FaultType,
    pid: i32,
    interval: Duration,
}

impl ProcessChoking {
    pub fn new(ctx: &FaultContext) -> Self {
        Self {
            ctx: ctx.clone(),
            fault_type: FaultType::new(PROCESS_CHOKING),
            pid: 0,
            interval: Duration::ZERO,
        }
    }

    /// One STOP/sleep/CONT/sleep cycle. `Ok(false)` once the target is gone.
    async fn choke_once(&self) -> FaultResult<bool> {
        for signal in [Signal::SIGSTOP, Signal::SIGCONT] {
            match signals::send_signal(self.pid, signal) {
                Ok(()) => {}
                Err(FaultError::Signal { errno: Errno::ESRCH, .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.interval).await;
        }
        Ok(true)
    }
}

#[async_trait]
impl FaultPlugin for ProcessChoking {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.ctx.runner.as_ref(), &["ps"])?;
        let flags = args.flags();
        self.pid = target_pid(&flags)?;
        self.interval = parse_interval(flags.require("interval")?)?;
        if self.interval.is_zero() {
            return Err(FaultError::invalid_flag(
                "interval",
                flags.get("interval").unwrap_or_default(),
                "must be greater than zero",
            ));
        }

        if args.op_kind()? == OpKind::Inject {
            let search = self.ctx.inject_invocation(args);
            if !self.ctx.locator.locate(&search).await?.is_empty() {
                return Err(FaultError::already_injected(
                    &self.fault_type,
                    format!("process {} is already being choked", self.pid),
                ));
            }
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(
            self.fault_type,
            "Choking process {} every {:?}",
            self.pid,
            self.interval
        );
        while self.choke_once().await? {}
        fault_info!(self.fault_type, "Process {} exited, stopping", self.pid);
        Ok(())
    }

    async fn remove(&mut self, args: &RunArgs) -> FaultResult<()> {
        let search = self.ctx.inject_invocation(args);
        let pids = self.ctx.locator.locate(&search).await?;
        let killed = signals::kill_all(&pids)?;

        // The target may have been left stopped mid-cycle
        signals::send_signal(self.pid, Signal::SIGCONT)?;

        if killed == 0 {
            return Err(FaultError::ProcessNotFound { search });
        }
        fault_info!(self.fault_type, "Stopped {} choking invocation(s)", killed);
        Ok(())
    }
}

/// Kills a process outright; nothing can bring it back
#[derive(Debug)]
pub struct ProcessExitAbnormal {
    fault_type: FaultType,
    pid: i32,
}

impl ProcessExitAbnormal {
    pub fn new() -> Self {
        Self {
            fault_type: FaultType::new(PROCESS_EXIT_ABNORMAL),
            pid: 0,
        }
    }
}

impl Default for ProcessExitAbnormal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FaultPlugin for ProcessExitAbnormal {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        if args.op_kind()? == OpKind::Inject {
            self.pid = target_pid(&args.flags())?;
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Killing process {}", self.pid);
        signals::send_signal(self.pid, Signal::SIGKILL)
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        Err(FaultError::nothing_to_remove(
            &self.fault_type,
            "a killed process cannot be restored",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use std::sync::Arc;
    use std::time::Instant;

    use crate::config::EngineConfig;
    use crate::services::signals::ProcessStatus;
    use crate::traits::{MockCommandRunner, MockProcessLocator};

    fn args(line: &str) -> RunArgs {
        RunArgs::new(line.split_whitespace().map(str::to_string).collect())
    }

    fn sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("sleep is available")
    }

    fn wait_for_state(pid: i32, wanted: ProcessStatus) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if signals::process_status(pid).map(|s| s == wanted).unwrap_or(false) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn context(locator: MockProcessLocator) -> FaultContext {
        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().returning(|_| true);
        FaultContext::new(Arc::new(runner), Arc::new(locator), EngineConfig::default(), "/opt/arsenal/arsenal")
    }

    #[tokio::test]
    async fn test_hang_stops_and_resumes() {
        let mut child = sleeper();
        let pid = child.id() as i32;
        let inject = args(&format!("arsenal inject process process-hang --pid {pid}"));
        let remove = args(&format!("arsenal remove process process-hang --pid {pid}"));

        let mut fault = ProcessHang::new();
        fault.prepare(&inject).await.unwrap();
        fault.inject(&inject).await.unwrap();
        assert!(wait_for_state(pid, ProcessStatus::Stop));

        // Second inject sees the stopped state
        let mut again = ProcessHang::new();
        let err = again.prepare(&inject).await.unwrap_err();
        assert!(matches!(err, FaultError::AlreadyInjected { .. }));

        let mut fault = ProcessHang::new();
        fault.prepare(&remove).await.unwrap();
        fault.remove(&remove).await.unwrap();
        assert!(wait_for_state(pid, ProcessStatus::Sleep));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_pid_is_precondition() {
        let mut fault = ProcessHang::new();

        let err = fault.prepare(&args("arsenal inject process process-hang --pid 0")).await.unwrap_err();
        assert!(matches!(err, FaultError::InvalidFlag { .. }));

        let err = fault
            .prepare(&args("arsenal inject process process-hang --pid abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::InvalidFlag { .. }));

        let err = fault
            .prepare(&args(&format!("arsenal inject process process-hang --pid {}", i32::MAX)))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::TargetAbsent { .. }));
    }

    #[tokio::test]
    async fn test_choking_rejects_running_invocation() {
        let mut child = sleeper();
        let pid = child.id();
        let expected = format!("arsenal inject process process-choking --pid {pid} --interval 0h:0m:1s");

        let mut locator = MockProcessLocator::new();
        locator
            .expect_locate()
            .withf(move |search| search == expected)
            .times(1)
            .returning(|_| Ok(vec![4242]));

        let mut fault = ProcessChoking::new(&context(locator));
        let err = fault
            .prepare(&args(&format!(
                "/usr/bin/arsenal inject process process-choking --pid {pid} --interval 0h:0m:1s"
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::AlreadyInjected { .. }));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_choking_rejects_zero_interval() {
        let mut child = sleeper();
        let pid = child.id();

        let mut fault = ProcessChoking::new(&context(MockProcessLocator::new()));
        let err = fault
            .prepare(&args(&format!(
                "arsenal inject process process-choking --pid {pid} --interval 0h:0m:0s"
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultError::InvalidFlag { .. }));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_choking_ends_when_target_exits() {
        let mut child = sleeper();
        let pid = child.id() as i32;

        let mut fault = ProcessChoking::new(&context(MockProcessLocator::new()));
        fault.pid = pid;
        fault.interval = Duration::from_millis(20);
        assert!(fault.choke_once().await.unwrap());

        child.kill().unwrap();
        child.wait().unwrap();
        assert!(!fault.choke_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_choking_remove_without_invocation_still_resumes() {
        let mut child = sleeper();
        let pid = child.id() as i32;
        signals::send_signal(pid, Signal::SIGSTOP).unwrap();
        assert!(wait_for_state(pid, ProcessStatus::Stop));

        let mut locator = MockProcessLocator::new();
        locator.expect_locate().returning(|_| Ok(vec![]));
        let remove = args(&format!(
            "arsenal remove process process-choking --pid {pid} --interval 0h:0m:1s"
        ));

        let mut fault = ProcessChoking::new(&context(locator));
        fault.prepare(&remove).await.unwrap();
        let err = fault.remove(&remove).await.unwrap_err();

        assert!(matches!(err, FaultError::ProcessNotFound { .. }));
        assert!(wait_for_state(pid, ProcessStatus::Sleep));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_exit_abnormal_kills_and_cannot_be_removed() {
        let mut child = sleeper();
        let pid = child.id();
        let inject = args(&format!("arsenal inject process process-exit-abnormal --pid {pid}"));

        let mut fault = ProcessExitAbnormal::new();
        fault.prepare(&inject).await.unwrap();
        fault.inject(&inject).await.unwrap();

        let status = child.wait().unwrap();
        assert!(!status.success());

        let remove = args(&format!("arsenal remove process process-exit-abnormal --pid {pid}"));
        let mut fault = ProcessExitAbnormal::new();
        fault.prepare(&remove).await.unwrap();
        let err = fault.remove(&remove).await.unwrap_err();
        assert!(matches!(err, FaultError::NothingToRemove { .. }));
    }
}
