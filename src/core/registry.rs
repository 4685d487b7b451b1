// src/core/registry.rs

use crate::core::env::{Environment, Platform, SystemEnvironment};
use crate::system::echo::SecretMasker;
use crate::system::shells_config::{self, ShellDescriptor, ShellRegistry};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::system());
}

/// What the resolver knows about one logical executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutableEntry {
    pub name: String,
    /// Variable holding an explicit path; defaults to `<NAME>_PATH`.
    pub env_variable: Option<String>,
    pub windows: Vec<String>,
    pub linux: Vec<String>,
    pub darwin: Vec<String>,
}

impl ExecutableEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The override variable for this executable.
    pub fn env_variable(&self) -> String {
        self.env_variable
            .clone()
            .unwrap_or_else(|| path_variable_for(&self.name))
    }

    /// Candidate paths for `platform`, in probing order.
    pub fn candidates(&self, platform: Platform) -> Vec<&str> {
        let lists: Vec<&Vec<String>> = match platform {
            Platform::Windows => vec![&self.windows],
            Platform::MacOs => vec![&self.darwin, &self.linux],
            Platform::Linux => vec![&self.linux],
        };
        lists
            .into_iter()
            .flat_map(|l| l.iter().map(String::as_str))
            .collect()
    }

    fn merge(&mut self, other: Self) {
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
    }
}

/// Derives `<NAME>_PATH`: upper-cased, every non-alphanumeric char becomes `_`.
pub fn path_variable_for(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    let mut var: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    var.push_str("_PATH");
    var
}

/// Counters describing resolver activity.
#[derive(Debug, Default)]
pub struct ResolverStats {
    lookups: AtomicU64,
    cache_hits: AtomicU64,
    scans: AtomicU64,
}

/// A point-in-time copy of [`ResolverStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub cache_hits: u64,
    pub scans: u64,
}

impl ResolverStats {
    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
        }
    }
}

/// Process-execution state shared by commands, pipes and shell sessions.
///
/// Holds the platform and environment used for resolution, the executable and
/// shell registries, the resolver cache, the default shell and the command
/// echo settings. Share it with `Arc<Registry>`.
#[derive(Debug)]
pub struct Registry {
    platform: Platform,
    env: Arc<dyn Environment>,
    executables: RwLock<HashMap<String, ExecutableEntry>>,
    cache: RwLock<HashMap<String, PathBuf>>,
    shells: ShellRegistry,
    default_shell: RwLock<String>,
    echo: AtomicBool,
    masker: SecretMasker,
    stats: ResolverStats,
}

impl Registry {
    /// An empty registry: no executables, no shells.
    pub fn new(platform: Platform, env: Arc<dyn Environment>) -> Self {
        let default_shell = if platform.is_windows() {
            "powershell"
        } else {
            "bash"
        };
        Self {
            platform,
            env,
            executables: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            shells: ShellRegistry::default(),
            default_shell: RwLock::new(default_shell.to_string()),
            echo: AtomicBool::new(false),
            masker: SecretMasker::default(),
            stats: ResolverStats::default(),
        }
    }

    /// A registry with the built-in shells registered.
    pub fn with_builtins(platform: Platform, env: Arc<dyn Environment>) -> Self {
        let registry = Self::new(platform, env);
        shells_config::register_builtin_shells(&registry);
        registry
    }

    /// The current platform and the real process environment, with built-ins.
    pub fn system() -> Self {
        Self::with_builtins(Platform::current(), Arc::new(SystemEnvironment))
    }

    /// A lazily created process-wide registry.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn shells(&self) -> &ShellRegistry {
        &self.shells
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    pub fn masker(&self) -> &SecretMasker {
        &self.masker
    }

    /// Registers an executable. An existing entry is only updated when
    /// `force` is set, in which case non-empty fields replace the old ones.
    /// Returns `true` when the registry changed.
    pub fn register_exe(&self, entry: ExecutableEntry, force: bool) -> bool {
        let mut executables = self
            .executables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match executables.get_mut(&entry.name) {
            Some(existing) if force => {
                existing.merge(entry);
                true
            }
            Some(_) => false,
            None => {
                executables.insert(entry.name.clone(), entry);
                true
            }
        }
    }

    pub fn executable(&self, name: &str) -> Option<ExecutableEntry> {
        self.executables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registers a shell and an executable entry for its binary.
    pub fn register_shell(&self, descriptor: ShellDescriptor, force: bool) -> bool {
        let entry = descriptor.executable_entry();
        self.register_exe(entry, force);
        self.shells.register(descriptor, force)
    }

    pub fn default_shell(&self) -> String {
        self.default_shell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_default_shell(&self, id: impl Into<String>) {
        *self
            .default_shell
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id.into();
    }

    /// Whether commands are echoed before they are spawned by default.
    pub fn echo_enabled(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn cached(&self, name: &str) -> Option<PathBuf> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(name)
            .or_else(|| cache.get(&cache_stem(name)))
            .cloned()
    }

    pub(crate) fn remember(&self, name: &str, path: &Path) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(cache_stem(name), path.to_path_buf());
        cache.insert(name.to_string(), path.to_path_buf());
    }
}

fn cache_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::MapEnvironment;

    fn empty_registry() -> Registry {
        Registry::new(Platform::Linux, Arc::new(MapEnvironment::new()))
    }

    #[test]
    fn test_path_variable_for() {
        assert_eq!(path_variable_for("node"), "NODE_PATH");
        assert_eq!(path_variable_for("dotnet-script"), "DOTNET_SCRIPT_PATH");
        assert_eq!(path_variable_for("pwsh.exe"), "PWSH_PATH");
    }

    #[test]
    fn test_register_exe_first_wins_unless_forced() {
        let registry = empty_registry();
        let mut first = ExecutableEntry::new("tool");
        first.linux = vec!["/opt/a/tool".to_string()];
        assert!(registry.register_exe(first, false));

        let mut second = ExecutableEntry::new("tool");
        second.linux = vec!["/opt/b/tool".to_string()];
        assert!(!registry.register_exe(second.clone(), false));
        assert_eq!(registry.executable("tool").unwrap().linux, ["/opt/a/tool"]);

        second.env_variable = Some("MY_TOOL".to_string());
        assert!(registry.register_exe(second, true));
        let merged = registry.executable("tool").unwrap();
        assert_eq!(merged.linux, ["/opt/b/tool"]);
        assert_eq!(merged.env_variable(), "MY_TOOL");
    }

    #[test]
    fn test_candidates_per_platform() {
        let mut entry = ExecutableEntry::new("x");
        entry.linux = vec!["/usr/bin/x".to_string()];
        entry.darwin = vec!["/opt/homebrew/bin/x".to_string()];
        entry.windows = vec!["C:\\x.exe".to_string()];
        assert_eq!(
            entry.candidates(Platform::MacOs),
            ["/opt/homebrew/bin/x", "/usr/bin/x"]
        );
        assert_eq!(entry.candidates(Platform::Windows), ["C:\\x.exe"]);
    }

    #[test]
    fn test_cache_is_keyed_by_name_and_stem() {
        let registry = empty_registry();
        registry.remember("node.exe", Path::new("/x/node.exe"));
        assert_eq!(registry.cached("node"), Some(PathBuf::from("/x/node.exe")));
        assert_eq!(registry.cached("node.exe"), Some(PathBuf::from("/x/node.exe")));
        assert_eq!(registry.cached("deno"), None);
    }

    #[test]
    fn test_default_shell_follows_platform() {
        assert_eq!(empty_registry().default_shell(), "bash");
        let win = Registry::new(Platform::Windows, Arc::new(MapEnvironment::new()));
        assert_eq!(win.default_shell(), "powershell");
    }
}
