//! Service-specific tests
//!
//! Each service has its own test file; helpers shared between them live in
//! `common`.


pub mod common {
    use std::process::{Child, Command};
    use std::time::Duration;

    use shared::RunArgs;

    /// Upper bound for waiting on process state changes
    pub const STATE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Build RunArgs from a whitespace separated command line
    pub fn run_args(line: &str) -> RunArgs {
        RunArgs::new(line.split_whitespace().map(str::to_string).collect())
    }

    /// Long-lived child that tests can signal
    pub fn spawn_sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("sleep is available")
    }
}
