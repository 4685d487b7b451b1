// src/cli/mod.rs

use clap::Parser;
use std::path::PathBuf;

pub mod handlers;

/// plumb: run processes, pipelines and scripts across shells.
///
/// Commands:
///   which <name> [--no-cache]              Resolve an executable
///   run [--quiet] [--echo] <exe> [args...]  Run an executable
///   sh [--shell <id>] <script> [args...]    Run an inline script
///   exec [--shell <id>] <file> [args...]    Run a script file
///   shells                                  List registered shells
///   split [--join] <line>                   Tokenize a command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(
    disable_help_subcommand = true,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Load shell definitions from this file instead of the user config.
    #[arg(long, value_name = "FILE")]
    pub shells: Option<PathBuf>,

    /// The command to run.
    pub command: Option<String>,

    /// Arguments for the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
