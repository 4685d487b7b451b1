// src/system/shell.rs

use crate::constants::SCRIPT_FILE_PREFIX;
use crate::core::registry::Registry;
use crate::core::which::{self, ResolveOptions};
use crate::error::{Error, Result};
use crate::models::{Blob, ProcessOutcome, StdInput, StdioMode};
use crate::system::child::{ChildProcess, LineStream};
use crate::system::executor::Command;
use crate::system::shells_config::{MapContext, shell_for_extension};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

/// A script written to a temporary file for shells that only run files.
///
/// The file is deleted by [`TempScript::close`] once the process that runs it
/// has been consumed, or on drop as a fallback.
#[derive(Debug)]
pub(crate) struct TempScript {
    path: TempPath,
}

impl TempScript {
    pub(crate) fn create(content: &str, ext: &str) -> Result<Self> {
        let ext = ext.trim_start_matches('.');
        let suffix = if ext.is_empty() {
            String::new()
        } else {
            format!(".{ext}")
        };
        let mut file = tempfile::Builder::new()
            .prefix(SCRIPT_FILE_PREFIX)
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| Error::io("Failed to create temporary script", e))?;
        file.write_all(content.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| Error::io("Failed to write temporary script", e))?;
        let path = file.into_temp_path();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::io("Failed to mark temporary script executable", e))?;
        }

        log::debug!("Temporary script created at: {}", path.display());
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file. Failures are logged, never raised.
    pub(crate) fn close(self) {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => log::debug!("Temporary script removed: {}", shown),
            Err(e) => log::warn!("Failed to remove temporary script '{}': {}", shown, e),
        }
    }
}

/// Runs an inline script or a script file through a registered shell.
///
/// The shell defaults to the registry's default shell. When only a file is
/// given and no shell is chosen, the shell is inferred from the file
/// extension. Inline scripts are wrapped by the shell's wrapper, and written
/// to a temporary file first when the shell cannot take a script argument.
#[derive(Debug)]
pub struct ShellSession {
    command: Command,
    shell: Option<String>,
    script: Option<String>,
    file: Option<PathBuf>,
    extra: Vec<String>,
}

impl Default for ShellSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellSession {
    /// A session resolved through [`Registry::global`].
    pub fn new() -> Self {
        Self::with_registry(Registry::global())
    }

    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            command: Command::with_registry(registry, String::new()),
            shell: None,
            script: None,
            file: None,
            extra: Vec::new(),
        }
    }

    /// Script text passed to the shell. Replaces any script file.
    pub fn inline(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self.file = None;
        self
    }

    /// Script file run by the shell. Replaces any inline script.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.script = None;
        self
    }

    pub fn shell(mut self, id: impl Into<String>) -> Self {
        self.shell = Some(id.into());
        self
    }

    /// Argument placed after the script.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.command = self.command.cwd(dir);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command = self.command.env(key, value);
        self
    }

    pub fn input(mut self, input: impl Into<StdInput>) -> Self {
        self.command = self.command.input(input);
        self
    }

    pub fn stdout(mut self, mode: StdioMode) -> Self {
        self.command = self.command.stdout(mode);
        self
    }

    pub fn stderr(mut self, mode: StdioMode) -> Self {
        self.command = self.command.stderr(mode);
        self
    }

    pub fn echo(mut self, enabled: bool) -> Self {
        self.command = self.command.echo(enabled);
        self
    }

    /// Blocking resolution; see [`Command::spawn`].
    pub fn spawn(self) -> Result<ChildProcess> {
        self.into_command()?.spawn()
    }

    pub async fn spawn_async(self) -> Result<ChildProcess> {
        self.into_command_async().await?.spawn_async().await
    }

    pub async fn output(self) -> Result<ProcessOutcome> {
        self.into_command_async().await?.output().await
    }

    pub fn output_sync(self) -> Result<ProcessOutcome> {
        self.into_command()?.output_sync()
    }

    pub async fn quiet(self) -> Result<ProcessOutcome> {
        self.into_command_async().await?.quiet().await
    }

    pub async fn text(self) -> Result<String> {
        self.into_command_async().await?.text().await
    }

    pub async fn bytes(self) -> Result<Vec<u8>> {
        self.into_command_async().await?.bytes().await
    }

    pub async fn blob(self) -> Result<Blob> {
        self.into_command_async().await?.blob().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        self.into_command_async().await?.json().await
    }

    pub async fn lines(self) -> Result<LineStream> {
        self.into_command_async().await?.lines().await
    }

    /// Picks the shell id and checks that there is something to run.
    fn select(&self) -> Result<String> {
        let registry = self.command.registry();
        let id = match (&self.shell, &self.script, &self.file) {
            (Some(id), _, _) => id.clone(),
            (None, None, Some(file)) => file
                .extension()
                .and_then(|ext| shell_for_extension(registry, &ext.to_string_lossy()))
                .unwrap_or_else(|| registry.default_shell()),
            _ => registry.default_shell(),
        };
        if registry.shells().lookup(&id).is_none() {
            return Err(Error::unregistered_shell(&id));
        }
        if self.script.is_none() && self.file.is_none() {
            return Err(Error::missing_script());
        }
        Ok(id)
    }

    fn into_command(self) -> Result<Command> {
        let id = self.select()?;
        let found = which::resolve_sync(self.command.registry(), &id, &ResolveOptions::default());
        let exe = found.ok_or_else(|| Error::executable_not_found(&id))?;
        self.build(&id, exe)
    }

    async fn into_command_async(self) -> Result<Command> {
        let id = self.select()?;
        let registry = Arc::clone(self.command.registry());
        let found = which::resolve(&registry, &id, &ResolveOptions::default()).await;
        let exe = found.ok_or_else(|| Error::executable_not_found(&id))?;
        self.build(&id, exe)
    }

    /// Materializes the script and builds the final argv around `exe`.
    fn build(self, id: &str, exe: PathBuf) -> Result<Command> {
        let Self {
            command,
            script,
            file,
            extra,
            ..
        } = self;
        let registry = Arc::clone(command.registry());
        let descriptor = registry
            .shells()
            .lookup(id)
            .ok_or_else(|| Error::unregistered_shell(id))?;
        let ctx = MapContext {
            platform: registry.platform(),
            exe: Some(exe.clone()),
            cwd: command
                .current_dir()
                .map(Path::to_path_buf)
                .or_else(|| registry.env().current_dir()),
        };

        let mut argv = descriptor.args.clone();
        let mut temp = None;
        match (script, file) {
            (Some(script), _) => {
                let script = descriptor.wrap_script(&script);
                if descriptor.requires_file() {
                    let written = TempScript::create(&script, &descriptor.ext)?;
                    let path = written.path().to_string_lossy().into_owned();
                    argv.push(descriptor.map_script_path(&path, &ctx));
                    temp = Some(written);
                } else {
                    argv.push(script);
                }
            }
            (None, Some(file)) => {
                argv.push(descriptor.map_script_path(&file.to_string_lossy(), &ctx));
            }
            (None, None) => return Err(Error::missing_script()),
        }
        argv.extend(extra);
        log::debug!("Running through shell '{}' ({})", id, exe.display());

        Ok(command.args(argv).resolved(exe, temp))
    }
}

/// Runs a script file with the shell registered for its extension.
pub fn exec(file: impl Into<PathBuf>) -> ShellSession {
    ShellSession::new().file(file)
}

fn through(id: &str, script: &str) -> ShellSession {
    ShellSession::new().shell(id).inline(script)
}

pub fn bash(script: &str) -> ShellSession {
    through("bash", script)
}

pub fn sh(script: &str) -> ShellSession {
    through("sh", script)
}

pub fn pwsh(script: &str) -> ShellSession {
    through("pwsh", script)
}

pub fn powershell(script: &str) -> ShellSession {
    through("powershell", script)
}

pub fn node(script: &str) -> ShellSession {
    through("node", script)
}

pub fn python(script: &str) -> ShellSession {
    through("python", script)
}

pub fn ruby(script: &str) -> ShellSession {
    through("ruby", script)
}

pub fn perl(script: &str) -> ShellSession {
    through("perl", script)
}

pub fn deno(script: &str) -> ShellSession {
    through("deno", script)
}

/// Runs C# script through `dotnet-script`.
pub fn dotnet(script: &str) -> ShellSession {
    through("dotnet-script", script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::{MapEnvironment, Platform};
    use crate::error::ErrorKind;

    fn has(exe: &str) -> bool {
        which::resolve_sync(&Registry::system(), exe, &ResolveOptions::default()).is_some()
    }

    #[test]
    fn test_temp_script_is_removed_on_close() {
        // --- Setup ---
        let script = TempScript::create("echo hi\n", ".sh").unwrap();
        let path = script.path().to_path_buf();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(SCRIPT_FILE_PREFIX));
        assert!(name.ends_with(".sh"));

        // --- Execute ---
        script.close();

        // --- Assert ---
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_script() {
        let registry = Arc::new(Registry::system());
        let err = ShellSession::with_registry(registry)
            .shell("sh")
            .output_sync()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingScript);
    }

    #[test]
    fn test_unregistered_shell() {
        let registry = Arc::new(Registry::new(
            Platform::Linux,
            Arc::new(MapEnvironment::new()),
        ));
        let err = ShellSession::with_registry(registry)
            .shell("zsh")
            .inline("echo hi")
            .output_sync()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnregisteredShell);
        assert_eq!(err.target(), Some("zsh"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inline_through_bash() {
        if !has("bash") {
            return;
        }
        let text = bash("echo 'hello world'").text().await.unwrap();
        assert_eq!(text, "hello world\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inline_through_sh_with_args() {
        if !has("sh") {
            return;
        }
        let text = sh("echo \"hello $1\"").arg("world").text().await.unwrap();
        assert_eq!(text, "hello world\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_temp_file_removed_after_success_and_failure() {
        if !has("sh") {
            return;
        }
        // --- Execute ---
        let ok = sh("echo \"$0\"").output_sync().unwrap();
        let failed = sh("echo \"$0\"\nexit 3").output_sync().unwrap();

        // --- Assert ---
        assert!(ok.success());
        assert_eq!(failed.code, 3);
        for outcome in [&ok, &failed] {
            let path = PathBuf::from(outcome.text().trim());
            assert!(path.to_string_lossy().contains(SCRIPT_FILE_PREFIX));
            assert!(!path.exists());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_temp_file_removed_after_lines() {
        if !has("sh") {
            return;
        }
        let lines = sh("echo \"$0\"").lines().await.unwrap().collect().await.unwrap();
        let path = PathBuf::from(lines.first().unwrap());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sh_still_runs_inline_after_args_override() {
        if !has("sh") {
            return;
        }
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("shells.toml");
        std::fs::write(&config, "[shells.sh]\nargs = [\"-eu\"]\n").unwrap();
        let registry = Arc::new(Registry::system());
        crate::system::shells_config::load_shells_config(&registry, &config).unwrap();

        // --- Execute ---
        let outcome = ShellSession::with_registry(registry)
            .shell("sh")
            .inline("echo hello")
            .output()
            .await
            .unwrap();

        // --- Assert ---
        assert_eq!(outcome.code, 0);
        assert_eq!(outcome.text(), "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_infers_shell_from_extension() {
        if !has("bash") {
            return;
        }
        // --- Setup ---
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.sh");
        std::fs::write(&file, "#!/bin/sh\necho from-file\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();

        // --- Execute ---
        let outcome = exec(&file).output_sync().unwrap();

        // --- Assert ---
        assert!(outcome.success());
        assert_eq!(outcome.text(), "from-file\n");
    }
}
