use crate::core::registry::Registry;
use crate::core::which::{self, ResolveOptions};
use crate::error::Error;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Resolves an executable to its absolute path.")]
struct WhichArgs {
    /// Logical name or path of the executable.
    name: String,

    /// Scan again even if the name was resolved before.
    #[arg(long)]
    no_cache: bool,
}

pub fn handle(args: Vec<String>, registry: &Arc<Registry>) -> Result<i32> {
    let which_args = WhichArgs::try_parse_from(&args)?;
    let options = if which_args.no_cache {
        ResolveOptions::no_cache()
    } else {
        ResolveOptions::default()
    };

    let path = which::resolve_sync(registry, &which_args.name, &options)
        .ok_or_else(|| Error::executable_not_found(&which_args.name))?;
    println!("{}", path.display());
    Ok(0)
}
