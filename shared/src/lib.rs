//! Shared types for the arsenal fault-injection toolkit
//!
//! Contains the data model every fault component agrees on: fault
//! identifiers, the positional run-argument layout, flag parsing and the
//! logging bootstrap.

pub mod errors;
pub mod flags;
pub mod logging;
pub mod types;

pub use errors::*;
pub use flags::{parse_interval, Flags};
pub use types::*;
