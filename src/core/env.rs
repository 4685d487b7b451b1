// src/core/env.rs

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

lazy_static! {
    static ref PERCENT_VAR: Regex =
        Regex::new(r"%([^%\s]+)%").expect("percent variable pattern is valid");
}

/// The operating-system family whose conventions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }

    /// Separator used by `PATH`-like variables.
    pub fn path_separator(self) -> char {
        if self.is_windows() { ';' } else { ':' }
    }
}

/// Read access to environment variables and a few process-wide locations.
///
/// Resolution code depends on this capability instead of `std::env` so it can
/// be exercised against an in-memory environment.
pub trait Environment: Send + Sync + fmt::Debug {
    fn var(&self, key: &str) -> Option<String>;

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables, used by tests and sandboxed lookups.
#[derive(Debug, Default, Clone)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl Environment for MapEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        self.cwd.clone().or_else(|| std::env::current_dir().ok())
    }
}

/// Expands `%VAR%`, `$VAR`, `${VAR}` and a leading `~` in `input`.
/// Unknown variables are left untouched.
pub fn expand(env: &dyn Environment, input: &str) -> String {
    let percent = PERCENT_VAR.replace_all(input, |caps: &Captures<'_>| {
        caps.get(1)
            .and_then(|name| env.var(name.as_str()))
            .unwrap_or_else(|| caps.get(0).map_or_else(String::new, |m| m.as_str().to_string()))
    });

    shellexpand::full_with_context_no_errors(
        percent.as_ref(),
        || env.home_dir().map(|h| h.to_string_lossy().into_owned()),
        |name| env.var(name),
    )
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_env() -> MapEnvironment {
        MapEnvironment::new()
            .with_var("HOME", "/home/dev")
            .with_var("SystemRoot", "C:\\Windows")
            .with_home("/home/dev")
    }

    #[test]
    fn test_expand_posix_tokens() {
        let env = sample_env();
        assert_eq!(expand(&env, "$HOME/.deno/bin/deno"), "/home/dev/.deno/bin/deno");
        assert_eq!(expand(&env, "${HOME}/bin"), "/home/dev/bin");
        assert_eq!(expand(&env, "~/.dotnet"), "/home/dev/.dotnet");
    }

    #[test]
    fn test_expand_windows_tokens() {
        let env = sample_env();
        assert_eq!(
            expand(&env, "%SystemRoot%\\System32\\cmd.exe"),
            "C:\\Windows\\System32\\cmd.exe"
        );
    }

    #[test]
    fn test_unknown_variables_are_kept() {
        let env = sample_env();
        assert_eq!(expand(&env, "%NOPE%/x"), "%NOPE%/x");
        assert_eq!(expand(&env, "$NOPE/x"), "$NOPE/x");
    }

    #[test]
    fn test_path_separator() {
        assert_eq!(Platform::Windows.path_separator(), ';');
        assert_eq!(Platform::Linux.path_separator(), ':');
    }
}
