use crate::core::registry::Registry;
use crate::models::StdioMode;
use crate::system::executor::Command;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs an executable and waits for it.")]
struct RunArgs {
    /// Discard the output of the process.
    #[arg(long, short)]
    quiet: bool,

    /// Print the command line before running it.
    #[arg(long)]
    echo: bool,

    /// Logical name or path of the executable.
    exe: String,

    /// Arguments passed to the executable.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

pub fn handle(args: Vec<String>, registry: &Arc<Registry>) -> Result<i32> {
    let run_args = RunArgs::try_parse_from(&args)?;
    let output = if run_args.quiet {
        StdioMode::Null
    } else {
        StdioMode::Inherit
    };

    let outcome = Command::with_registry(Arc::clone(registry), run_args.exe)
        .args(run_args.args)
        .echo(run_args.echo)
        .stdout(output)
        .stderr(output)
        .output_sync()?;
    log::debug!("'{}' finished in {:?}", outcome.file, outcome.duration());
    Ok(outcome.code)
}
