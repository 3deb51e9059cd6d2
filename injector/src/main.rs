//! Entry point for the `arsenal` fault injection CLI
//!
//! Usage: `arsenal <inject|remove> <module> <fault-type> [--flag value ...]`

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use injector::services::{ProcessTable, ShellCommandRunner};
use injector::{Dispatcher, EngineConfig, FaultContext, FaultError, Registry};
use shared::{logging, RunArgs};

/// Inject and remove host-level faults
#[derive(Parser)]
#[command(name = "arsenal")]
#[command(about = "Injects and removes host-level faults for resilience testing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a fault
    Inject(FaultArgs),
    /// Revert a previously applied fault
    Remove(FaultArgs),
}

#[derive(Args)]
struct FaultArgs {
    /// Fault module (cpu, memory, file, filesystem, process, system)
    module: String,

    /// Fault type within the module, e.g. cpu-overload
    fault_type: String,

    /// Fault flags as `--name value` pairs, passed through verbatim
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    flags: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    logging::init_tracing(None);

    // Shape check only; the raw tokens keep their positions so running
    // invocations can be found again by their exact command line
    let cli = Cli::parse();
    let (op, fault) = match &cli.command {
        Command::Inject(fault) => ("inject", fault),
        Command::Remove(fault) => ("remove", fault),
    };
    logging::log_startup(op, &format!("{} {}", fault.module, fault.fault_type));

    let args = RunArgs::new(std::env::args().collect());
    match run(&args).await {
        Ok(()) => {
            logging::log_success(&format!("{} {} {}", op, fault.module, fault.fault_type));
            ExitCode::SUCCESS
        }
        Err(err) => {
            logging::log_error(op, &format!("{err:#}"));
            let code = err
                .downcast_ref::<FaultError>()
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let exe_path = std::env::current_exe().context("Failed to resolve the arsenal executable")?;
    let config = EngineConfig::from_env();

    let runner = Arc::new(ShellCommandRunner::new());
    let locator = Arc::new(ProcessTable::new(runner.clone()));
    let context = FaultContext::new(runner, locator, config, exe_path);

    let dispatcher = Dispatcher::new(Registry::with_defaults(), context);
    dispatcher.run(args).await?;
    Ok(())
}
