//! Core shared types: fault identifiers, operation kinds and raw run arguments

use std::fmt;
use std::str::FromStr;

use crate::errors::{SharedError, SharedResult};
use crate::flags::Flags;

/// Position of the operation kind (`inject` / `remove`) in the raw argument list
pub const OPS_TYPE_INDEX: usize = 1;
/// Position of the fault module name
pub const MODULE_NAME_INDEX: usize = 2;
/// Position of the fault type name
pub const FAULT_TYPE_INDEX: usize = 3;
/// First position holding `--flag value` tokens
pub const FLAGS_START_INDEX: usize = 4;

/// Immutable fault identifier, e.g. `cpu-overload`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaultType(String);

impl FaultType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FaultType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Fault families exposed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultModule {
    Cpu,
    Memory,
    File,
    Filesystem,
    Process,
    System,
}

impl FaultModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultModule::Cpu => "cpu",
            FaultModule::Memory => "memory",
            FaultModule::File => "file",
            FaultModule::Filesystem => "filesystem",
            FaultModule::Process => "process",
            FaultModule::System => "system",
        }
    }
}

impl fmt::Display for FaultModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultModule {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(FaultModule::Cpu),
            "memory" => Ok(FaultModule::Memory),
            "file" => Ok(FaultModule::File),
            "filesystem" => Ok(FaultModule::Filesystem),
            "process" => Ok(FaultModule::Process),
            "system" => Ok(FaultModule::System),
            _ => Err(SharedError::UnknownModule { input: s.to_string() }),
        }
    }
}

/// The two mutating operations a single invocation can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Inject,
    Remove,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Inject => "inject",
            OpKind::Remove => "remove",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inject" => Ok(OpKind::Inject),
            "remove" => Ok(OpKind::Remove),
            _ => Err(SharedError::UnknownOperation { input: s.to_string() }),
        }
    }
}

/// Ordered raw CLI tokens of one invocation.
///
/// Layout: `<program> <inject|remove> <module> <fault-type> [--flag value ...]`.
/// The operation and fault type are always read by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    tokens: Vec<String>,
}

impl RunArgs {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    /// Build the token list from already separated parts
    pub fn from_parts<S: Into<String>>(
        program: impl Into<String>,
        op: OpKind,
        module: FaultModule,
        fault_type: &str,
        flags: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut tokens = vec![
            program.into(),
            op.as_str().to_string(),
            module.as_str().to_string(),
            fault_type.to_string(),
        ];
        tokens.extend(flags.into_iter().map(Into::into));
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn slot(&self, index: usize, expected: &str) -> SharedResult<&str> {
        self.tokens
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| SharedError::MissingArgument {
                index,
                expected: expected.to_string(),
            })
    }

    pub fn op_kind(&self) -> SharedResult<OpKind> {
        self.slot(OPS_TYPE_INDEX, "operation")?.parse()
    }

    pub fn module(&self) -> SharedResult<FaultModule> {
        self.slot(MODULE_NAME_INDEX, "module")?.parse()
    }

    pub fn fault_type(&self) -> SharedResult<FaultType> {
        self.slot(FAULT_TYPE_INDEX, "fault type").map(FaultType::from)
    }

    /// Raw `--flag value` tokens following the fixed slots
    pub fn flag_tokens(&self) -> &[String] {
        self.tokens.get(FLAGS_START_INDEX..).unwrap_or(&[])
    }

    pub fn flags(&self) -> Flags {
        Flags::parse(self.flag_tokens())
    }

    /// Flag tokens joined with single spaces, as forwarded to external tools
    pub fn flags_string(&self) -> String {
        self.flag_tokens().join(" ")
    }

    /// Same invocation with the operation slot replaced
    pub fn with_op(&self, op: OpKind) -> Self {
        let mut tokens = self.tokens.clone();
        if let Some(slot) = tokens.get_mut(OPS_TYPE_INDEX) {
            *slot = op.as_str().to_string();
        }
        Self { tokens }
    }

    /// Full command line as it appears in the process table
    pub fn command_line(&self) -> String {
        self.tokens.join(" ")
    }
}
