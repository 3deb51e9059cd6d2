//! Fault session state machine and dispatcher

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shared::{fault_debug, fault_info, FaultType, OpKind, RunArgs};

use crate::config::EngineConfig;
use crate::error::{FaultError, FaultResult};
use crate::registry::Registry;
use crate::traits::{CommandRunner, FaultPlugin, ProcessLocator};

/// Everything a plugin factory needs to build a plugin
#[derive(Clone)]
pub struct FaultContext {
    pub runner: Arc<dyn CommandRunner>,
    pub locator: Arc<dyn ProcessLocator>,
    pub config: EngineConfig,
    pub exe_path: PathBuf,
    pub exe_dir: PathBuf,
}

impl FaultContext {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        locator: Arc<dyn ProcessLocator>,
        config: EngineConfig,
        exe_path: impl Into<PathBuf>,
    ) -> Self {
        let exe_path = exe_path.into();
        let exe_dir = exe_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            runner,
            locator,
            config,
            exe_path,
            exe_dir,
        }
    }

    /// Executable file name; matches both bare and absolute invocations
    /// under full-word search
    pub fn exe_name(&self) -> String {
        self.exe_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "arsenal".to_string())
    }

    /// Command line of the inject invocation matching `args`
    pub fn inject_invocation(&self, args: &RunArgs) -> String {
        let inject = args.with_op(OpKind::Inject);
        std::iter::once(self.exe_name())
            .chain(inject.tokens().iter().skip(1).cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn stress_tool_path(&self) -> PathBuf {
        self.config.stress_tool_path(&self.exe_dir)
    }
}

/// Lifecycle position of one plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unprepared,
    Ready,
    Injected,
    Removed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Unprepared => "unprepared",
            SessionState::Ready => "ready",
            SessionState::Injected => "injected",
            SessionState::Removed => "removed",
        };
        f.write_str(label)
    }
}

/// One plugin driven through `Unprepared -> Ready -> Injected -> Removed`.
///
/// Remove is also legal straight from Ready, since injection normally
/// happened in another invocation. A failed phase leaves the state unchanged.
pub struct FaultSession {
    plugin: Box<dyn FaultPlugin>,
    state: SessionState,
}

impl FaultSession {
    pub fn new(plugin: Box<dyn FaultPlugin>) -> Self {
        Self {
            plugin,
            state: SessionState::Unprepared,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fault_type(&self) -> FaultType {
        self.plugin.fault_type()
    }

    fn guard(&self, operation: &str, allowed: &[SessionState]) -> FaultResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FaultError::InvalidLifecycle {
                operation: operation.to_string(),
                state: self.state.to_string(),
            })
        }
    }

    pub async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.guard("prepare", &[SessionState::Unprepared])?;
        self.plugin.prepare(args).await?;
        self.state = SessionState::Ready;
        Ok(())
    }

    pub async fn inject(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.guard("inject", &[SessionState::Ready])?;
        self.plugin.inject(args).await?;
        self.state = SessionState::Injected;
        Ok(())
    }

    pub async fn remove(&mut self, args: &RunArgs) -> FaultResult<()> {
        self.guard("remove", &[SessionState::Ready, SessionState::Injected])?;
        self.plugin.remove(args).await?;
        self.state = SessionState::Removed;
        Ok(())
    }
}

/// Routes one invocation to its plugin
pub struct Dispatcher {
    registry: Registry,
    context: FaultContext,
}

impl Dispatcher {
    pub fn new(registry: Registry, context: FaultContext) -> Self {
        Self { registry, context }
    }

    pub fn context(&self) -> &FaultContext {
        &self.context
    }

    /// Look up the plugin, prepare it, then inject or remove per the
    /// operation slot
    pub async fn run(&self, args: &RunArgs) -> FaultResult<SessionState> {
        let op = args.op_kind()?;
        let module = args.module()?;
        let fault_type = args.fault_type()?;

        let factory = self.registry.lookup(module, &fault_type)?;
        let mut session = FaultSession::new(factory(&self.context));

        fault_debug!(fault_type, "Preparing {} with flags: {}", op, args.flags_string());
        session.prepare(args).await?;

        match op {
            OpKind::Inject => session.inject(args).await?,
            OpKind::Remove => session.remove(args).await?,
        }

        fault_info!(fault_type, "{} completed", op);
        Ok(session.state())
    }
}
