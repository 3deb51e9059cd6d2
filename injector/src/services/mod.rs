//! Service implementations
//!
//! Real implementations of the seam traits plus the two reusable leaves every
//! plugin family builds on: the stress-tool supervisor and the exhaustion
//! worker pool.

pub mod command_runner;
pub mod exhaustion;
pub mod file_attr;
pub mod mounts;
pub mod process_locator;
pub mod signals;
pub mod stress_tool;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use command_runner::ShellCommandRunner;
pub use exhaustion::{ExhaustionJob, HostFilesystem};
pub use process_locator::ProcessTable;
pub use stress_tool::{StressTool, SupervisedProcess};
