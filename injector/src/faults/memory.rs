//! Memory pressure through the stress tool's vm stressors

use shared::FaultModule;

use super::stress::StressFault;
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::traits::FaultPlugin;

pub const MEMORY_OVERLOAD: &str = "memory-overload";

/// Keep the mapping resident instead of unmapping between passes
const VM_ARGS: &[&str] = &["--vm-keep", "--vm-populate"];

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::Memory, MEMORY_OVERLOAD, memory_overload);
}

fn memory_overload(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(StressFault::new(ctx, MEMORY_OVERLOAD, VM_ARGS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    use shared::RunArgs;

    use crate::config::EngineConfig;
    use crate::traits::{MockCommandRunner, MockProcessLocator};

    #[tokio::test]
    async fn test_remove_searches_with_vm_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("stress-ng");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        let expected = format!("{} --vm 2 --vm-keep --vm-populate", tool.display());

        let mut runner = MockCommandRunner::new();
        runner.expect_has_command().returning(|_| true);
        let mut locator = MockProcessLocator::new();
        locator
            .expect_locate()
            .withf(move |search| search == expected)
            .times(1)
            .returning(|_| Ok(vec![]));

        let config = EngineConfig {
            stress_tool: tool.clone(),
            ..EngineConfig::default()
        };
        let ctx = FaultContext::new(Arc::new(runner), Arc::new(locator), config, "/opt/arsenal/arsenal");
        let mut fault = memory_overload(&ctx);
        let args = RunArgs::new(
            "arsenal remove memory memory-overload --vm 2"
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        );

        fault.prepare(&args).await.unwrap();
        let err = fault.remove(&args).await.unwrap_err();
        assert!(matches!(err, crate::error::FaultError::ProcessNotFound { .. }));
    }
}
