//! CPU faults: stress-tool overload and taking cores offline via sysfs

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use shared::{fault_info, FaultModule, FaultType, OpKind, RunArgs};

use super::required_str;
use super::stress::StressFault;
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::traits::{check_dependencies, CommandRunner, FaultPlugin};

pub const CPU_OVERLOAD: &str = "cpu-overload";
pub const CPU_OFFLINE: &str = "cpu-offline";

static CPU_LIST: OnceLock<Regex> = OnceLock::new();

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::Cpu, CPU_OVERLOAD, cpu_overload);
    registry.register(FaultModule::Cpu, CPU_OFFLINE, cpu_offline);
}

fn cpu_overload(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(StressFault::new(ctx, CPU_OVERLOAD, &[]))
}

fn cpu_offline(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(CpuOffline::new(ctx))
}

/// Parse a cpu list such as `0-2,4` into sorted cpu ids.
/// Ranges must ascend and no id may appear twice.
pub fn parse_cpu_list(raw: &str) -> FaultResult<Vec<u32>> {
    let pattern = CPU_LIST.get_or_init(|| Regex::new(r"^(\d+(-\d+)?)(,\d+(-\d+)?)*$").expect("cpu list pattern is valid"));
    let raw = raw.trim();
    if !pattern.is_match(raw) {
        return Err(FaultError::invalid_flag("cpuid", raw, "expected a list like 0-2,4"));
    }

    let mut ids = BTreeSet::new();
    for part in raw.split(',') {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (start, end),
            None => (part, part),
        };
        let parse = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|e| FaultError::invalid_flag("cpuid", raw, e.to_string()))
        };
        let (start, end) = (parse(start)?, parse(end)?);
        if start > end {
            return Err(FaultError::invalid_flag("cpuid", raw, format!("descending range {part}")));
        }
        for id in start..=end {
            if !ids.insert(id) {
                return Err(FaultError::invalid_flag("cpuid", raw, format!("cpu {id} listed twice")));
            }
        }
    }
    Ok(ids.into_iter().collect())
}

/// Writes 0 to `cpuN/online` on inject and 1 on remove
pub struct CpuOffline {
    runner: Arc<dyn CommandRunner>,
    sysfs: PathBuf,
    fault_type: FaultType,
    cpus: Vec<u32>,
}

impl CpuOffline {
    pub fn new(ctx: &FaultContext) -> Self {
        Self {
            runner: ctx.runner.clone(),
            sysfs: ctx.config.cpu_sysfs.clone(),
            fault_type: FaultType::new(CPU_OFFLINE),
            cpus: Vec::new(),
        }
    }

    fn online_path(&self, cpu: u32) -> PathBuf {
        self.sysfs.join(format!("cpu{cpu}")).join("online")
    }

    async fn set_online(&self, online: bool) -> FaultResult<()> {
        let value = if online { 1 } else { 0 };
        for &cpu in &self.cpus {
            let command = format!("echo {} > {}", value, self.online_path(cpu).display());
            fault_info!(self.fault_type, "Running: {}", command);
            self.runner.run_blocking(&command).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FaultPlugin for CpuOffline {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.runner.as_ref(), &["echo"])?;
        let flags = args.flags();
        self.cpus = parse_cpu_list(required_str(&flags, "cpuid")?)?;

        let mut offline = Vec::new();
        for &cpu in &self.cpus {
            let path = self.online_path(cpu);
            let state = tokio::fs::read_to_string(&path)
                .await
                .map_err(|_| FaultError::target_absent(format!("cpu{cpu} has no online control at {}", path.display())))?;
            if state.trim() == "0" {
                offline.push(cpu);
            }
        }

        match args.op_kind()? {
            OpKind::Inject if !offline.is_empty() => Err(FaultError::already_injected(
                &self.fault_type,
                format!("cpu(s) {offline:?} already offline"),
            )),
            OpKind::Remove if offline.is_empty() => Err(FaultError::nothing_to_remove(
                &self.fault_type,
                "all listed cpus are online",
            )),
            _ => Ok(()),
        }
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        self.set_online(false).await
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        self.set_online(true).await
    }
}
