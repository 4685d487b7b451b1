// src/core/which.rs

//! Executable resolution.
//!
//! Lookup order for a logical name:
//! 1. the name itself when it is an absolute path to an existing file;
//! 2. the resolver cache (unless bypassed);
//! 3. the `<NAME>_PATH` override variable;
//! 4. the extra paths followed by every `PATH` segment;
//! 5. the registered per-platform candidate paths.
//!
//! The blocking and async variants build the same search plan and only
//! differ in how they stat the filesystem.

use crate::core::env::{self, Platform};
use crate::core::registry::{Registry, path_variable_for};
use std::path::{Path, PathBuf};

/// Extensions tried on Windows when `PATHEXT` is unset.
pub const DEFAULT_PATHEXT: &str = ".com;.exe;.bat;.cmd;.vbs;.vbe;.js;.jse;.wsf;.wsh";

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directories searched before `PATH`. Relative entries are resolved
    /// against the current directory.
    pub prepend_paths: Vec<PathBuf>,
    pub use_cache: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            prepend_paths: Vec::new(),
            use_cache: true,
        }
    }
}

impl ResolveOptions {
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    /// Any regular file.
    File,
    /// A regular file that can be executed.
    Executable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Probe {
    path: PathBuf,
    check: Check,
}

/// Resolves `name` to an absolute path, blocking the current thread.
pub fn resolve_sync(registry: &Registry, name: &str, options: &ResolveOptions) -> Option<PathBuf> {
    if let Some(hit) = shortcut(registry, name, options, Path::is_file) {
        return Some(hit);
    }

    registry.stats().record_scan();
    let found = search_plan(registry, name, options)
        .into_iter()
        .find(|probe| probe_sync(probe))
        .map(|probe| probe.path);
    finish(registry, name, found)
}

/// Resolves `name` to an absolute path without blocking the runtime.
pub async fn resolve(registry: &Registry, name: &str, options: &ResolveOptions) -> Option<PathBuf> {
    let absolute = Path::new(name).is_absolute() && is_file_async(Path::new(name)).await;
    if let Some(hit) = shortcut(registry, name, options, |_| absolute) {
        return Some(hit);
    }

    registry.stats().record_scan();
    let mut found = None;
    for probe in search_plan(registry, name, options) {
        if probe_async(&probe).await {
            found = Some(probe.path);
            break;
        }
    }
    finish(registry, name, found)
}

/// Searches only the extra paths and `PATH`, without touching the cache.
pub fn which_sync(registry: &Registry, name: &str, prepend_paths: &[PathBuf]) -> Option<PathBuf> {
    path_probes(registry, name, prepend_paths)
        .into_iter()
        .find(probe_sync)
        .map(|probe| probe.path)
}

/// Async form of [`which_sync`].
pub async fn which(registry: &Registry, name: &str, prepend_paths: &[PathBuf]) -> Option<PathBuf> {
    for probe in path_probes(registry, name, prepend_paths) {
        if probe_async(&probe).await {
            return Some(probe.path);
        }
    }
    None
}

/// Steps 1 and 2 of the lookup order.
fn shortcut<F>(
    registry: &Registry,
    name: &str,
    options: &ResolveOptions,
    is_file: F,
) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    registry.stats().record_lookup();
    let path = Path::new(name);
    if path.is_absolute() && is_file(path) {
        registry.remember(name, path);
        return Some(path.to_path_buf());
    }
    if options.use_cache
        && let Some(hit) = registry.cached(name)
    {
        registry.stats().record_cache_hit();
        log::trace!("Resolved '{}' from cache: {}", name, hit.display());
        return Some(hit);
    }
    None
}

fn finish(registry: &Registry, name: &str, found: Option<PathBuf>) -> Option<PathBuf> {
    match &found {
        Some(path) => {
            log::debug!("Resolved executable '{}' to {}", name, path.display());
            registry.remember(name, path);
        }
        None => log::debug!("Executable '{}' was not found.", name),
    }
    found
}

/// Steps 3 to 5 of the lookup order, as an ordered list of probes.
fn search_plan(
    registry: &Registry,
    name: &str,
    options: &ResolveOptions,
) -> Vec<Probe> {
    let env = registry.env();
    let entry = registry.executable(name).or_else(|| {
        Path::new(name)
            .file_stem()
            .and_then(|stem| registry.executable(&stem.to_string_lossy()))
    });

    let mut plan = Vec::new();

    let variable = entry
        .as_ref()
        .map_or_else(|| path_variable_for(name), |e| e.env_variable());
    if let Some(value) = env.var(&variable).filter(|v| !v.trim().is_empty()) {
        plan.push(Probe {
            path: PathBuf::from(env::expand(env, value.trim())),
            check: Check::File,
        });
    }

    plan.extend(path_probes(registry, name, &options.prepend_paths));

    if let Some(entry) = &entry {
        for candidate in entry.candidates(registry.platform()) {
            plan.push(Probe {
                path: PathBuf::from(env::expand(env, candidate)),
                check: Check::File,
            });
        }
    }
    plan
}

fn path_probes(registry: &Registry, name: &str, prepend_paths: &[PathBuf]) -> Vec<Probe> {
    let env = registry.env();
    let platform = registry.platform();
    let cwd = env.current_dir();

    let Some(base) = Path::new(name).file_name().map(|b| b.to_string_lossy().into_owned())
    else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = prepend_paths
        .iter()
        .map(|p| match &cwd {
            Some(cwd) if p.is_relative() => cwd.join(p),
            _ => p.clone(),
        })
        .collect();
    if let Some(path_var) = env.var("PATH") {
        dirs.extend(
            path_var
                .split(platform.path_separator())
                .filter(|segment| !segment.trim().is_empty())
                .map(|segment| PathBuf::from(env::expand(env, segment))),
        );
    }

    let pathext = env.var("PATHEXT");
    let names = probe_names(&base, platform, pathext.as_deref());
    log::trace!("Scanning {} directories for {:?}", dirs.len(), names);

    dirs.iter()
        .flat_map(|dir| {
            names.iter().map(move |n| Probe {
                path: dir.join(n),
                check: Check::Executable,
            })
        })
        .collect()
}

/// File names to look for in each directory.
///
/// On Windows a name without a known extension is tried with every `PATHEXT`
/// extension in order; the filesystem takes care of case-insensitivity.
fn probe_names(base: &str, platform: Platform, pathext: Option<&str>) -> Vec<String> {
    if !platform.is_windows() {
        return vec![base.to_string()];
    }
    let pathext = pathext
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_PATHEXT)
        .to_lowercase();
    let extensions: Vec<&str> = pathext
        .split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();

    let lowered = base.to_lowercase();
    if extensions.iter().any(|ext| lowered.ends_with(ext)) {
        return vec![base.to_string()];
    }
    extensions.iter().map(|ext| format!("{base}{ext}")).collect()
}

fn probe_sync(probe: &Probe) -> bool {
    match std::fs::metadata(&probe.path) {
        Ok(meta) => accepts(&meta, probe.check),
        Err(e) => {
            log::trace!("Skipping {}: {}", probe.path.display(), e);
            false
        }
    }
}

async fn probe_async(probe: &Probe) -> bool {
    match tokio::fs::metadata(&probe.path).await {
        Ok(meta) => accepts(&meta, probe.check),
        Err(e) => {
            log::trace!("Skipping {}: {}", probe.path.display(), e);
            false
        }
    }
}

async fn is_file_async(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn accepts(meta: &std::fs::Metadata, check: Check) -> bool {
    if !meta.is_file() {
        return false;
    }
    match check {
        Check::File => true,
        Check::Executable => is_executable(meta),
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::MapEnvironment;
    use crate::core::registry::ExecutableEntry;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_tool(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\necho tool\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn registry_with(env: MapEnvironment) -> Registry {
        Registry::new(Platform::current(), Arc::new(env))
    }

    fn path_var(dirs: &[&Path]) -> String {
        let sep = Platform::current().path_separator().to_string();
        dirs.iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(&sep)
    }

    #[test]
    fn test_probe_names_windows_pathext() {
        assert_eq!(
            probe_names("node", Platform::Windows, Some(".EXE;.CMD")),
            ["node.exe", "node.cmd"]
        );
        assert_eq!(probe_names("node.cmd", Platform::Windows, None), ["node.cmd"]);
        assert_eq!(probe_names("Node.EXE", Platform::Windows, Some(".exe")), ["Node.EXE"]);
        assert_eq!(probe_names("node", Platform::Linux, Some(".exe")), ["node"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_scans_path_then_hits_cache() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "plumbtool");
        let env = MapEnvironment::new().with_var("PATH", path_var(&[dir.path()]));
        let registry = registry_with(env);

        // --- Execute ---
        let first = resolve_sync(&registry, "plumbtool", &ResolveOptions::default());
        let second = resolve_sync(&registry, "plumbtool", &ResolveOptions::default());

        // --- Assert ---
        assert_eq!(first.as_deref(), Some(tool.as_path()));
        assert_eq!(first, second);
        let stats = registry.stats().snapshot();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.scans, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plain"), "data").unwrap();
        let env = MapEnvironment::new().with_var("PATH", path_var(&[dir.path()]));
        let registry = registry_with(env);
        assert!(resolve_sync(&registry, "plain", &ResolveOptions::default()).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_prepend_paths_win_over_path() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_tool(second.path(), "dup");
        let preferred = make_tool(first.path(), "dup");
        let env = MapEnvironment::new().with_var("PATH", path_var(&[second.path()]));
        let registry = registry_with(env);

        let options = ResolveOptions {
            prepend_paths: vec![first.path().to_path_buf()],
            use_cache: false,
        };
        assert_eq!(resolve_sync(&registry, "dup", &options), Some(preferred));
    }

    #[test]
    fn test_env_override_beats_path() {
        let dir = TempDir::new().unwrap();
        let on_path = make_tool(dir.path(), "mytool");
        let other = TempDir::new().unwrap();
        let custom = make_tool(other.path(), "custom-tool");
        let env = MapEnvironment::new()
            .with_var("PATH", path_var(&[dir.path()]))
            .with_var("MYTOOL_PATH", custom.display().to_string());
        let registry = registry_with(env);

        let found = resolve_sync(&registry, "mytool", &ResolveOptions::no_cache());
        assert_eq!(found, Some(custom));
        assert_ne!(found, Some(on_path));
    }

    #[test]
    fn test_registered_candidates_are_last_resort() {
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "fallback-bin");
        let registry = registry_with(MapEnvironment::new().with_var("TOOLS", dir.path().display().to_string()));

        let mut entry = ExecutableEntry::new("fallback");
        let candidate = "${TOOLS}/fallback-bin".to_string();
        entry.linux = vec![candidate.clone()];
        entry.darwin = vec![candidate.clone()];
        entry.windows = vec![candidate];
        registry.register_exe(entry, false);

        assert_eq!(
            resolve_sync(&registry, "fallback", &ResolveOptions::default()),
            Some(PathBuf::from(format!("{}/fallback-bin", dir.path().display())))
        );
        assert!(tool.exists());
    }

    #[test]
    fn test_absolute_path_is_returned_as_is() {
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "abs-tool");
        let registry = registry_with(MapEnvironment::new());
        let name = tool.display().to_string();
        assert_eq!(resolve_sync(&registry, &name, &ResolveOptions::default()), Some(tool));
    }

    #[test]
    fn test_missing_executable() {
        let registry = registry_with(MapEnvironment::new().with_var("PATH", ""));
        assert!(resolve_sync(&registry, "definitely-not-here-42", &ResolveOptions::default()).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_async_and_sync_agree() {
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "asynctool");
        let env = MapEnvironment::new().with_var("PATH", path_var(&[dir.path()]));
        let registry = registry_with(env);

        let found = resolve(&registry, "asynctool", &ResolveOptions::no_cache()).await;
        assert_eq!(found.as_deref(), Some(tool.as_path()));
        assert_eq!(which(&registry, "asynctool", &[]).await, Some(tool.clone()));
        assert_eq!(which_sync(&registry, "asynctool", &[]), Some(tool));
    }
}
