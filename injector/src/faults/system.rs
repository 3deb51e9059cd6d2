//! Whole-host faults: sysrq triggers, service control and clock skew

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use regex::Regex;
use shared::{fault_info, fault_warn, parse_interval, FaultModule, FaultType, OpKind, RunArgs};

use super::required_str;
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::FaultContext;
use crate::registry::Registry;
use crate::traits::{check_dependencies, CommandRunner, FaultPlugin};

pub const SYSTEM_OOM: &str = "system-oom";
pub const SYSTEM_PANIC: &str = "system-panic";
pub const SYSTEM_REBOOT_ABNORMAL: &str = "system-reboot-abnormal";
pub const SYSTEM_FS_READONLY: &str = "system-file-systems-readonly";
pub const SYSTEM_SERVICE_STOP: &str = "system-service-stop";
pub const SYSTEM_SERVICE_RESTART: &str = "system-service-restart";
pub const SYSTEM_TIME_JUMP: &str = "system-time-jump";

/// `service <name> status` exit codes (LSB)
const STATUS_INACTIVE: i32 = 3;
const STATUS_UNKNOWN_SERVICE: i32 = 4;

static SERVICE_NAME: OnceLock<Regex> = OnceLock::new();

pub fn register(registry: &mut Registry) {
    registry.register(FaultModule::System, SYSTEM_OOM, system_oom);
    registry.register(FaultModule::System, SYSTEM_PANIC, system_panic);
    registry.register(FaultModule::System, SYSTEM_REBOOT_ABNORMAL, system_reboot);
    registry.register(FaultModule::System, SYSTEM_FS_READONLY, system_fs_readonly);
    registry.register(FaultModule::System, SYSTEM_SERVICE_STOP, service_stop);
    registry.register(FaultModule::System, SYSTEM_SERVICE_RESTART, service_restart);
    registry.register(FaultModule::System, SYSTEM_TIME_JUMP, time_jump);
}

fn system_oom(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(SysrqFault::new(ctx, SYSTEM_OOM, 'f'))
}

fn system_panic(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(SysrqFault::new(ctx, SYSTEM_PANIC, 'c'))
}

fn system_reboot(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(SysrqFault::new(ctx, SYSTEM_REBOOT_ABNORMAL, 'b'))
}

fn system_fs_readonly(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(SysrqFault::new(ctx, SYSTEM_FS_READONLY, 'u'))
}

fn service_stop(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(ServiceFault::new(ctx, ServiceAction::Stop))
}

fn service_restart(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(ServiceFault::new(ctx, ServiceAction::Restart))
}

fn time_jump(ctx: &FaultContext) -> Box<dyn FaultPlugin> {
    Box::new(TimeJump::new(ctx))
}

/// Writes one magic character to the sysrq trigger.
///
/// Only the emergency read-only remount can be undone, and only by
/// rebooting.
pub struct SysrqFault {
    runner: Arc<dyn CommandRunner>,
    trigger: PathBuf,
    fault_type: FaultType,
    key: char,
}

impl SysrqFault {
    pub fn new(ctx: &FaultContext, fault_type: &str, key: char) -> Self {
        Self {
            runner: ctx.runner.clone(),
            trigger: ctx.config.sysrq_trigger.clone(),
            fault_type: FaultType::new(fault_type),
            key,
        }
    }

    fn reversible(&self) -> bool {
        self.fault_type.as_str() == SYSTEM_FS_READONLY
    }
}

#[async_trait]
impl FaultPlugin for SysrqFault {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        match args.op_kind()? {
            OpKind::Inject => {
                check_dependencies(self.runner.as_ref(), &["echo"])?;
                if !self.trigger.exists() {
                    return Err(FaultError::target_absent(format!(
                        "sysrq trigger {}",
                        self.trigger.display()
                    )));
                }
            }
            OpKind::Remove if self.reversible() => {
                check_dependencies(self.runner.as_ref(), &["reboot"])?;
            }
            OpKind::Remove => {}
        }
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let command = format!("echo {} > {}", self.key, self.trigger.display());
        fault_info!(self.fault_type, "Running: {}", command);
        self.runner.run_blocking(&command).await.map(|_| ())
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        if !self.reversible() {
            return Err(FaultError::nothing_to_remove(
                &self.fault_type,
                "the kernel action cannot be reverted",
            ));
        }
        fault_warn!(self.fault_type, "Rebooting to restore writable filesystems");
        self.runner.run_blocking("reboot").await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Stop,
    Restart,
}

impl ServiceAction {
    fn fault_type(self) -> &'static str {
        match self {
            ServiceAction::Stop => SYSTEM_SERVICE_STOP,
            ServiceAction::Restart => SYSTEM_SERVICE_RESTART,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Active,
    Inactive,
}

/// Validated `--name` of a service
fn service_name(raw: &str) -> FaultResult<String> {
    let pattern =
        SERVICE_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9@._:-]+$").expect("service name pattern is valid"));
    if !pattern.is_match(raw) {
        return Err(FaultError::invalid_flag("name", raw, "not a valid service name"));
    }
    Ok(raw.to_string())
}

/// Stops or restarts a service through `service(8)`
pub struct ServiceFault {
    runner: Arc<dyn CommandRunner>,
    action: ServiceAction,
    fault_type: FaultType,
    name: String,
}

impl ServiceFault {
    pub fn new(ctx: &FaultContext, action: ServiceAction) -> Self {
        Self {
            runner: ctx.runner.clone(),
            action,
            fault_type: FaultType::new(action.fault_type()),
            name: String::new(),
        }
    }

    async fn status(&self) -> FaultResult<ServiceStatus> {
        match self.runner.run_blocking(&format!("service {} status", self.name)).await {
            Ok(_) => Ok(ServiceStatus::Active),
            Err(FaultError::CommandFailed {
                status: Some(STATUS_INACTIVE),
                ..
            }) => Ok(ServiceStatus::Inactive),
            Err(FaultError::CommandFailed {
                status: Some(STATUS_UNKNOWN_SERVICE),
                ..
            }) => Err(FaultError::target_absent(format!("service {}", self.name))),
            Err(e) => Err(e),
        }
    }

    async fn service(&self, verb: &str) -> FaultResult<()> {
        let command = format!("service {} {}", self.name, verb);
        fault_info!(self.fault_type, "Running: {}", command);
        self.runner.run_blocking(&command).await.map(|_| ())
    }
}

#[async_trait]
impl FaultPlugin for ServiceFault {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.runner.as_ref(), &["service"])?;
        self.name = service_name(required_str(&args.flags(), "name")?)?;

        let status = self.status().await?;
        match (self.action, args.op_kind()?, status) {
            (ServiceAction::Stop, OpKind::Inject, ServiceStatus::Inactive) => Err(FaultError::already_injected(
                &self.fault_type,
                format!("service {} is not running", self.name),
            )),
            (ServiceAction::Stop, OpKind::Remove, ServiceStatus::Active) => Err(FaultError::nothing_to_remove(
                &self.fault_type,
                format!("service {} is running", self.name),
            )),
            _ => Ok(()),
        }
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        match self.action {
            ServiceAction::Stop => self.service("stop").await,
            ServiceAction::Restart => self.service("restart").await,
        }
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        match self.action {
            ServiceAction::Stop => self.service("start").await,
            ServiceAction::Restart => Err(FaultError::nothing_to_remove(
                &self.fault_type,
                "a restart has no lasting effect",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backwards,
    Forwards,
}

impl FromStr for Direction {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backwards" => Ok(Direction::Backwards),
            "forwards" => Ok(Direction::Forwards),
            other => Err(FaultError::invalid_flag(
                "direction",
                other,
                "expected backwards or forwards",
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Backwards => write!(f, "backwards"),
            Direction::Forwards => write!(f, "forwards"),
        }
    }
}

/// Wall-clock time `interval` away from `now`, formatted for `date -s`
pub fn jump_target(now: NaiveDateTime, direction: Direction, interval: Duration) -> FaultResult<String> {
    let out_of_range = || FaultError::InvalidArgument {
        reason: format!("cannot move the clock {direction} by {interval:?}"),
    };
    let delta = chrono::Duration::from_std(interval).map_err(|_| out_of_range())?;
    let target = match direction {
        Direction::Backwards => now.checked_sub_signed(delta),
        Direction::Forwards => now.checked_add_signed(delta),
    }
    .ok_or_else(out_of_range)?;
    Ok(target.format("%H:%M:%S").to_string())
}

/// Moves the system clock and restores it from the hardware clock
pub struct TimeJump {
    runner: Arc<dyn CommandRunner>,
    fault_type: FaultType,
    direction: Direction,
    interval: Duration,
}

impl TimeJump {
    pub fn new(ctx: &FaultContext) -> Self {
        Self {
            runner: ctx.runner.clone(),
            fault_type: FaultType::new(SYSTEM_TIME_JUMP),
            direction: Direction::Forwards,
            interval: Duration::ZERO,
        }
    }
}

#[async_trait]
impl FaultPlugin for TimeJump {
    fn fault_type(&self) -> FaultType {
        self.fault_type.clone()
    }

    async fn prepare(&mut self, args: &RunArgs) -> FaultResult<()> {
        check_dependencies(self.runner.as_ref(), &["date", "hwclock"])?;
        if args.op_kind()? == OpKind::Remove {
            return Ok(());
        }

        let flags = args.flags();
        self.direction = required_str(&flags, "direction")?.parse()?;
        self.interval = parse_interval(flags.require("interval")?)?;
        Ok(())
    }

    async fn inject(&mut self, _args: &RunArgs) -> FaultResult<()> {
        let target = jump_target(Local::now().naive_local(), self.direction, self.interval)?;
        let command = format!("date -s {target}");
        fault_info!(self.fault_type, "Running: {}", command);
        self.runner.run_blocking(&command).await.map(|_| ())
    }

    async fn remove(&mut self, _args: &RunArgs) -> FaultResult<()> {
        fault_info!(self.fault_type, "Restoring system time from the hardware clock");
        self.runner.run_blocking("hwclock -s").await.map(|_| ())
    }
}
