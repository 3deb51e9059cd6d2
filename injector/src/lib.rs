//! Host-level fault injection engine
//!
//! Every fault type is a [`FaultPlugin`] registered in a [`Registry`] and driven
//! through prepare, inject and remove by the [`Dispatcher`]. Host interaction goes
//! through the [`CommandRunner`] and [`ProcessLocator`] seams so plugins can be
//! tested against mocks.

pub mod config;
pub mod error;
pub mod faults;
pub mod lifecycle;
pub mod registry;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{ErrorKind, FaultError, FaultResult};
pub use lifecycle::{Dispatcher, FaultContext, FaultSession, SessionState};
pub use registry::{PluginFactory, Registry};
pub use traits::{
    CommandRunner, ExhaustionTarget, FaultPlugin, MockCommandRunner, MockExhaustionTarget, MockFaultPlugin,
    MockProcessLocator, ProcessLocator,
};
