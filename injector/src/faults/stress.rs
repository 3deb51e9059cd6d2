//! Plugin shared by every stress-tool backed fault

use async_trait::async_trait;
use shared::{FaultType, RunArgs};

use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::services::{StressTool, SupervisedProcess};
use crate::traits::FaultPlugin;

/// Launches the stress tool on inject and kills it on remove
pub struct StressFault {
    fault_type: FaultType,
    /// Tool arguments always appended after the user's flags
    private_args: &'static [&'static str],
    supervisor: StressTool,
    process: Option<SupervisedProcess>,
}

impl StressFault {
    pub fn new(ctx: &FaultContext, fault_type: &str, private_args: &'static [&'static str]) -> Self {
        Self {
            fault_type: FaultType::new(fault_type),
            private_args,
            supervisor: StressTool::new(
                ctx.runner.clone(),
                ctx.locator.clone(),
                ctx.stress_tool_path(),
                ctx.config.validation_window.clone(),
            ),
            process: None,
        }
    }

    pub fn process(&self) -> Option<&SupervisedProcess> {
        self.process.as_ref()
    }

    fn prepared(&self, operation: &str) -> FaultResult<&SupervisedProcess> {
        self.process.as_ref().ok_or_else(|| FaultError::InvalidLifecycle {
            operation: operation.to_string(),
            state: "unprepared".to_string(),
        })
    }
}

#[async_trait]
impl FaultPlugin for StressFault {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        let process = self
            .supervisor
            .prepare(&self.fault_type, args, self.private_args)
            .await?;
        self.process = Some(process);
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let process = self.prepared("inject")?;
        self.supervisor.launch(&self.fault_type, process).await
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let process = self.prepared("remove")?;
        self.supervisor.destroy(&self.fault_type, process).await.map(|_| ())
    }
}
