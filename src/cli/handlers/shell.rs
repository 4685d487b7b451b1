use crate::core::registry::Registry;
use crate::models::StdioMode;
use crate::system::shell::ShellSession;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs an inline script through a shell.")]
struct ShArgs {
    /// Shell id. Defaults to the registry's default shell.
    #[arg(long, short)]
    shell: Option<String>,

    /// Script text.
    script: String,

    /// Arguments placed after the script.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Runs a script file through a shell.")]
struct ExecArgs {
    /// Shell id. Inferred from the file extension when omitted.
    #[arg(long, short)]
    shell: Option<String>,

    /// Script file.
    file: PathBuf,

    /// Arguments passed to the script.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// `plumb sh`.
pub fn handle_inline(args: Vec<String>, registry: &Arc<Registry>) -> Result<i32> {
    let sh_args = ShArgs::try_parse_from(&args)?;
    let session = ShellSession::with_registry(Arc::clone(registry))
        .inline(sh_args.script)
        .args(sh_args.args);
    run(session, sh_args.shell)
}

/// `plumb exec`.
pub fn handle_file(args: Vec<String>, registry: &Arc<Registry>) -> Result<i32> {
    let exec_args = ExecArgs::try_parse_from(&args)?;
    let session = ShellSession::with_registry(Arc::clone(registry))
        .file(exec_args.file)
        .args(exec_args.args);
    run(session, exec_args.shell)
}

fn run(session: ShellSession, shell: Option<String>) -> Result<i32> {
    let session = match shell {
        Some(id) => session.shell(id),
        None => session,
    };
    let outcome = session
        .stdout(StdioMode::Inherit)
        .stderr(StdioMode::Inherit)
        .output_sync()?;
    Ok(outcome.code)
}
