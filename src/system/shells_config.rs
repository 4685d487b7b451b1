// src/system/shells_config.rs

use crate::core::env::Platform;
use crate::core::paths;
use crate::core::registry::{ExecutableEntry, Registry};
use crate::core::which::{self, ResolveOptions};
use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Rewrites an inline script before it is run.
pub type WrapFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites a script path into the argument handed to the shell.
pub type MapPathFn = Arc<dyn Fn(&str, &MapContext) -> String + Send + Sync>;

/// What a path mapper may know about the invocation.
#[derive(Debug, Clone)]
pub struct MapContext {
    pub platform: Platform,
    /// Resolved shell executable.
    pub exe: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
}

impl MapContext {
    fn absolutize(&self, path: &str) -> String {
        paths::absolutize(path, self.cwd.as_deref(), self.platform.is_windows())
    }
}

/// How to run scripts through one shell or interpreter.
#[derive(Clone, Default)]
pub struct ShellDescriptor {
    pub id: String,
    /// Arguments placed before the script path or inline script.
    pub args: Vec<String>,
    /// Script file extension, including the dot.
    pub ext: String,
    /// Inline scripts must be written to a temporary file first. Unset means
    /// no, and leaves an existing descriptor's value alone when merged.
    pub requires_file: Option<bool>,
    pub env_variable: Option<String>,
    pub windows: Vec<String>,
    pub linux: Vec<String>,
    pub darwin: Vec<String>,
    pub wrap: Option<WrapFn>,
    pub map_path: Option<MapPathFn>,
}

impl fmt::Debug for ShellDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellDescriptor")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("ext", &self.ext)
            .field("requires_file", &self.requires_file)
            .field("env_variable", &self.env_variable)
            .field("windows", &self.windows)
            .field("linux", &self.linux)
            .field("darwin", &self.darwin)
            .field("wrap", &self.wrap.is_some())
            .field("map_path", &self.map_path.is_some())
            .finish()
    }
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl ShellDescriptor {
    pub fn new(id: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ext: ext.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = strings(args);
        self
    }

    pub fn with_requires_file(mut self, requires_file: bool) -> Self {
        self.requires_file = Some(requires_file);
        self
    }

    pub fn requires_file(&self) -> bool {
        self.requires_file.unwrap_or(false)
    }

    pub fn with_windows(mut self, paths: &[&str]) -> Self {
        self.windows = strings(paths);
        self
    }

    pub fn with_linux(mut self, paths: &[&str]) -> Self {
        self.linux = strings(paths);
        self
    }

    pub fn with_darwin(mut self, paths: &[&str]) -> Self {
        self.darwin = strings(paths);
        self
    }

    pub fn with_wrap<F>(mut self, wrap: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.wrap = Some(Arc::new(wrap));
        self
    }

    pub fn with_map_path<F>(mut self, map_path: F) -> Self
    where
        F: Fn(&str, &MapContext) -> String + Send + Sync + 'static,
    {
        self.map_path = Some(Arc::new(map_path));
        self
    }

    /// Applies the wrapper, if any.
    pub fn wrap_script(&self, script: &str) -> String {
        match &self.wrap {
            Some(wrap) => wrap(script),
            None => script.to_string(),
        }
    }

    /// Applies the path mapper, if any.
    pub fn map_script_path(&self, path: &str, ctx: &MapContext) -> String {
        match &self.map_path {
            Some(map) => map(path, ctx),
            None => path.to_string(),
        }
    }

    pub(crate) fn executable_entry(&self) -> ExecutableEntry {
        ExecutableEntry {
            name: self.id.clone(),
            env_variable: self.env_variable.clone(),
            windows: self.windows.clone(),
            linux: self.linux.clone(),
            darwin: self.darwin.clone(),
        }
    }

    fn merge(&mut self, other: Self) {
        if !other.args.is_empty() {
            self.args = other.args;
        }
        if !other.ext.is_empty() {
            self.ext = other.ext;
        }
        if other.requires_file.is_some() {
            self.requires_file = other.requires_file;
        }
        if other.env_variable.is_some() {
            self.env_variable = other.env_variable;
        }
        if !other.windows.is_empty() {
            self.windows = other.windows;
        }
        if !other.linux.is_empty() {
            self.linux = other.linux;
        }
        if !other.darwin.is_empty() {
            self.darwin = other.darwin;
        }
        if other.wrap.is_some() {
            self.wrap = other.wrap;
        }
        if other.map_path.is_some() {
            self.map_path = other.map_path;
        }
    }
}

/// Shell id → descriptor store.
#[derive(Debug, Default)]
pub struct ShellRegistry {
    shells: RwLock<HashMap<String, ShellDescriptor>>,
}

impl ShellRegistry {
    /// First registration wins unless `force` is set.
    pub fn register(&self, descriptor: ShellDescriptor, force: bool) -> bool {
        let mut shells = self.shells.write().unwrap_or_else(PoisonError::into_inner);
        match shells.get_mut(&descriptor.id) {
            Some(existing) if force => {
                existing.merge(descriptor);
                true
            }
            Some(_) => false,
            None => {
                shells.insert(descriptor.id.clone(), descriptor);
                true
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<ShellDescriptor> {
        self.shells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Registered ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Picks the first registered shell (in id order) whose extension matches
/// `ext` and whose executable can be found.
pub fn shell_for_extension(registry: &Registry, ext: &str) -> Option<String> {
    let ext = ext.trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        return None;
    }
    registry.shells().list().into_iter().find(|id| {
        registry.shells().lookup(id).is_some_and(|d| {
            d.ext.trim_start_matches('.').to_lowercase() == ext
                && which::resolve_sync(registry, id, &ResolveOptions::default()).is_some()
        })
    })
}

/// Rewrites `C:/dir/file` (or `C:\dir\file`) as `/mnt/c/dir/file`.
pub fn windows_to_wsl_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    let mut chars = forward.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("/mnt/{}{}", drive.to_ascii_lowercase(), chars.as_str())
        }
        _ => forward,
    }
}

fn wrap_powershell(script: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'\n{script}\nif ((Test-Path -LiteralPath variable:\\LASTEXITCODE)) {{ exit $LASTEXITCODE }}\n"
    )
}

fn dot_source(path: &str) -> String {
    format!(". '{}'", path.replace('\'', "''"))
}

fn map_bash_path(path: &str, ctx: &MapContext) -> String {
    let absolute = ctx.absolutize(path);
    if !ctx.platform.is_windows() {
        return absolute;
    }
    let via_wsl = ctx.exe.as_ref().is_some_and(|exe| {
        exe.to_string_lossy()
            .to_lowercase()
            .ends_with("system32\\bash.exe")
    });
    if via_wsl {
        windows_to_wsl_path(&absolute)
    } else {
        absolute.replace('\\', "/")
    }
}

/// The shells known out of the box.
pub fn builtin_shells() -> Vec<ShellDescriptor> {
    let powershell_args = [
        "-NoProfile",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Unrestricted",
        "-Command",
    ];

    vec![
        ShellDescriptor::new("cmd", ".cmd")
            .with_args(&["/D", "/E:ON", "/V:OFF", "/S", "/C", "CALL"])
            .with_requires_file(true)
            .with_windows(&["%SystemRoot%\\System32\\cmd.exe"])
            .with_wrap(|script| format!("@echo off\n{script}")),
        ShellDescriptor::new("bash", ".sh")
            .with_args(&["--noprofile", "--norc", "-e", "-o", "pipefail", "-c"])
            .with_windows(&[
                "%ProgramFiles%\\Git\\bin\\bash.exe",
                "%ProgramFiles%\\Git\\usr\\bin\\bash.exe",
                "%ChocolateyInstall%\\msys2\\usr\\bin\\bash.exe",
                "%SystemDrive%\\msys64\\usr\\bin\\bash.exe",
                "%SystemDrive%\\msys\\usr\\bin\\bash.exe",
                "%SystemRoot%\\System32\\bash.exe",
            ])
            .with_linux(&["/bin/bash", "/usr/bin/bash"])
            .with_darwin(&["/opt/homebrew/bin/bash", "/usr/local/bin/bash"])
            .with_map_path(map_bash_path),
        ShellDescriptor::new("sh", ".sh")
            .with_args(&["-e"])
            .with_requires_file(true)
            .with_windows(&[
                "%ProgramFiles%\\Git\\usr\\bin\\sh.exe",
                "%ChocolateyInstall%\\msys2\\usr\\bin\\sh.exe",
                "%SystemDrive%\\msys64\\usr\\bin\\sh.exe",
                "%SystemDrive%\\msys\\usr\\bin\\sh.exe",
            ])
            .with_linux(&["/bin/sh", "/usr/bin/sh"]),
        ShellDescriptor::new("deno", ".ts")
            .with_args(&["run", "-A"])
            .with_requires_file(true)
            .with_windows(&[
                "%UserProfile%\\.deno\\bin\\deno.exe",
                "%ChocolateyInstall%\\lib\\deno\\tools\\deno.exe",
            ])
            .with_linux(&["$HOME/.deno/bin/deno"]),
        ShellDescriptor::new("node", ".js")
            .with_requires_file(true)
            .with_windows(&[
                "%ProgramFiles%\\nodejs\\node.exe",
                "%ProgramFiles(x86)%\\nodejs\\node.exe",
            ])
            .with_linux(&["/usr/bin/node"]),
        ShellDescriptor::new("python", ".py")
            .with_requires_file(true)
            .with_linux(&["/usr/bin/python3", "/usr/bin/python"]),
        ShellDescriptor::new("ruby", ".rb")
            .with_requires_file(true)
            .with_linux(&["/usr/bin/ruby"]),
        ShellDescriptor::new("perl", ".pl")
            .with_requires_file(true)
            .with_linux(&["/usr/bin/perl"]),
        ShellDescriptor::new("dotnet-script", ".csx")
            .with_requires_file(true)
            .with_windows(&["%UserProfile%\\.dotnet\\tools\\dotnet-script.exe"])
            .with_linux(&["${HOME}/.dotnet/tools/dotnet-script"]),
        ShellDescriptor::new("powershell", ".ps1")
            .with_args(&powershell_args)
            .with_windows(&["%SystemRoot%\\System32\\WindowsPowerShell\\v1.0\\powershell.exe"])
            .with_wrap(wrap_powershell)
            .with_map_path(|path, _| dot_source(path)),
        ShellDescriptor::new("pwsh", ".ps1")
            .with_args(&powershell_args)
            .with_windows(&[
                "%ProgramFiles%\\PowerShell\\7\\pwsh.exe",
                "%ProgramFiles(x86)%\\PowerShell\\7\\pwsh.exe",
                "%ProgramFiles%\\PowerShell\\6\\pwsh.exe",
                "%ProgramFiles(x86)%\\PowerShell\\6\\pwsh.exe",
            ])
            .with_linux(&[
                "/opt/microsoft/powershell/7/pwsh",
                "/opt/microsoft/powershell/6/pwsh",
            ])
            .with_wrap(wrap_powershell)
            .with_map_path(|path, ctx| dot_source(&ctx.absolutize(path))),
    ]
}

pub fn register_builtin_shells(registry: &Registry) {
    for descriptor in builtin_shells() {
        registry.register_shell(descriptor, false);
    }
}

/// A data-only shell entry of `shells.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub args: Vec<String>,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_file: Option<bool>,
    pub env_variable: Option<String>,
    pub windows: Vec<String>,
    pub linux: Vec<String>,
    pub darwin: Vec<String>,
}

/// The whole `shells.toml` file: a `[shells.<id>]` table per shell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellsConfig {
    #[serde(default)]
    pub shells: BTreeMap<String, ShellConfig>,
}

impl ShellConfig {
    fn into_descriptor(self, id: String) -> ShellDescriptor {
        ShellDescriptor {
            id,
            args: self.args,
            ext: self.ext,
            requires_file: self.requires_file,
            env_variable: self.env_variable,
            windows: self.windows,
            linux: self.linux,
            darwin: self.darwin,
            wrap: None,
            map_path: None,
        }
    }
}

pub fn parse_shells_config(text: &str) -> Result<ShellsConfig> {
    toml::from_str(text).map_err(|e| {
        Error::new(
            ErrorKind::InvalidArgument,
            format!("Failed to parse shells config: {e}"),
        )
        .with_source(e)
    })
}

/// Registers every shell of a `shells.toml` file, overriding existing ones.
/// Returns the number of shells registered.
pub fn load_shells_config(registry: &Registry, path: &Path) -> Result<usize> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Could not read '{}'", path.display()), e))?;
    let config = parse_shells_config(&text)?;
    let count = config.shells.len();
    for (id, shell) in config.shells {
        log::debug!("Registering shell '{}' from {}", id, path.display());
        registry.register_shell(shell.into_descriptor(id), true);
    }
    Ok(count)
}

/// Loads the user's `shells.toml` if it exists.
pub fn load_user_shells_config(registry: &Registry) -> Result<usize> {
    let path = paths::shells_config_path()?;
    if !path.is_file() {
        log::debug!("No user shells config at {}", path.display());
        return Ok(0);
    }
    load_shells_config(registry, &path)
}
