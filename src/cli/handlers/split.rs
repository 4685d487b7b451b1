use crate::core::args::split_arguments;
use crate::core::registry::Registry;
use anyhow::{Result, anyhow};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Tokenizes a command line into arguments.")]
struct SplitArgs {
    /// Print the arguments as one POSIX-quoted line instead of one per line.
    #[arg(long)]
    join: bool,

    /// The command line to split.
    line: String,
}

pub fn handle(args: Vec<String>, _registry: &Arc<Registry>) -> Result<i32> {
    let split_args = SplitArgs::try_parse_from(&args)?;
    let tokens = split_arguments(&split_args.line);

    if split_args.join {
        let joined = shlex::try_join(tokens.iter().map(String::as_str))
            .map_err(|e| anyhow!("Cannot quote arguments: {e}"))?;
        println!("{joined}");
    } else {
        for token in &tokens {
            println!("{token}");
        }
    }
    Ok(0)
}
