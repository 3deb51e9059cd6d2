//! Fault registry
//!
//! Built once at startup from an explicit list of constructors and read-only
//! afterwards. Only lookup by name is exposed to the dispatcher.

use std::collections::HashMap;

use shared::{FaultModule, FaultType};

use crate::error::{FaultError, FaultResult};
use crate::faults;
use crate::lifecycle::FaultContext;
use crate::traits::FaultPlugin;

/// Builds a fresh plugin for one invocation
pub type PluginFactory = fn(&FaultContext) -> Box<dyn FaultPlugin>;

#[derive(Clone, Copy)]
struct Entry {
    module: FaultModule,
    factory: PluginFactory,
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<FaultType, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in fault
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        faults::register_all(&mut registry);
        registry
    }

    /// Register a fault type.
    ///
    /// # Panics
    /// When the fault type is already registered.
    pub fn register(&mut self, module: FaultModule, fault_type: &str, factory: PluginFactory) {
        let key = FaultType::new(fault_type);
        if self.entries.contains_key(&key) {
            panic!("fault type {fault_type} registered twice");
        }
        self.entries.insert(key, Entry { module, factory });
    }

    pub fn contains(&self, fault_type: &FaultType) -> bool {
        self.entries.contains_key(fault_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Factory for `fault_type`, which must belong to `module`
    pub fn lookup(&self, module: FaultModule, fault_type: &FaultType) -> FaultResult<PluginFactory> {
        let entry = self.entries.get(fault_type).ok_or_else(|| FaultError::UnknownFault {
            fault_type: fault_type.to_string(),
        })?;

        if entry.module != module {
            return Err(FaultError::ModuleMismatch {
                fault_type: fault_type.to_string(),
                expected: entry.module.to_string(),
                requested: module.to_string(),
            });
        }
        Ok(entry.factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockFaultPlugin;

    fn mock_factory(_: &FaultContext) -> Box<dyn FaultPlugin> {
        Box::new(MockFaultPlugin::new())
    }

    #[test]
    fn test_lookup_checks_module() {
        let mut registry = Registry::new();
        registry.register(FaultModule::Cpu, "cpu-overload", mock_factory);

        assert!(registry.lookup(FaultModule::Cpu, &FaultType::new("cpu-overload")).is_ok());
        assert!(matches!(
            registry.lookup(FaultModule::Memory, &FaultType::new("cpu-overload")),
            Err(FaultError::ModuleMismatch { .. })
        ));
        assert!(matches!(
            registry.lookup(FaultModule::Cpu, &FaultType::new("cpu-melt")),
            Err(FaultError::UnknownFault { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = Registry::new();
        registry.register(FaultModule::Cpu, "cpu-overload", mock_factory);
        registry.register(FaultModule::Memory, "cpu-overload", mock_factory);
    }

    #[test]
    fn test_defaults_cover_catalogue() {
        let registry = Registry::with_defaults();

        assert_eq!(registry.len(), 20);
        for (module, name) in [
            (FaultModule::Cpu, "cpu-overload"),
            (FaultModule::Cpu, "cpu-offline"),
            (FaultModule::Memory, "memory-overload"),
            (FaultModule::File, "file-corruption"),
            (FaultModule::File, "file-lost"),
            (FaultModule::File, "file-readonly"),
            (FaultModule::File, "file-unexecuted"),
            (FaultModule::Filesystem, "filesystem-io-overload"),
            (FaultModule::Filesystem, "filesystem-mountpoint-space-full"),
            (FaultModule::Filesystem, "filesystem-mountpoint-inode-exhaustion"),
            (FaultModule::Process, "process-hang"),
            (FaultModule::Process, "process-choking"),
            (FaultModule::Process, "process-exit-abnormal"),
            (FaultModule::System, "system-oom"),
            (FaultModule::System, "system-panic"),
            (FaultModule::System, "system-reboot-abnormal"),
            (FaultModule::System, "system-file-systems-readonly"),
            (FaultModule::System, "system-service-stop"),
            (FaultModule::System, "system-service-restart"),
            (FaultModule::System, "system-time-jump"),
        ] {
            assert!(registry.lookup(module, &FaultType::new(name)).is_ok(), "{name}");
        }
    }
}
