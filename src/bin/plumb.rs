// src/bin/plumb.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use plumb::{
    Error, ErrorKind, Registry,
    cli::{Cli, handlers},
    system::shells_config,
};
use std::sync::Arc;

/// A CLI action, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &Arc<Registry>) -> Result<i32>,
}

static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "exec",
        aliases: &["x"],
        handler: handlers::shell::handle_file,
    },
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "sh",
        aliases: &["shell"],
        handler: handlers::shell::handle_inline,
    },
    CommandDefinition {
        name: "shells",
        aliases: &[],
        handler: handlers::shells::handle,
    },
    CommandDefinition {
        name: "split",
        aliases: &[],
        handler: handlers::split::handle,
    },
    CommandDefinition {
        name: "which",
        aliases: &[],
        handler: handlers::which::handle,
    },
];

fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    match run_cli(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Match the shell convention for a command that cannot be found.
            if let Some(err) = e.downcast_ref::<Error>()
                && err.is(ErrorKind::ExecutableNotFound)
            {
                eprintln!("{}: {}", "Error".red().bold(), err);
                std::process::exit(127);
            }
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run_cli(cli: Cli) -> Result<i32> {
    log::debug!("CLI args parsed: {:?}", cli);

    let registry = Arc::new(Registry::system());
    let loaded = match &cli.shells {
        Some(path) => shells_config::load_shells_config(&registry, path)?,
        None => shells_config::load_user_shells_config(&registry)?,
    };
    log::debug!("Loaded {} shell definition(s) from config", loaded);

    let Some(action) = cli.command else {
        println!(
            "{}",
            "Usage: plumb <which|run|sh|exec|shells|split> [args...]. See --help.".yellow()
        );
        return Ok(0);
    };

    match find_command(&action) {
        Some(command) => (command.handler)(cli.args, &registry),
        None => Err(anyhow::anyhow!(
            "Unknown command '{}'. Expected one of: {}.",
            action.cyan(),
            COMMAND_REGISTRY
                .iter()
                .map(|c| c.name)
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}
