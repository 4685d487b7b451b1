// src/core/shebang.rs

//! Parsing of `#!` interpreter lines, including the options understood by
//! `/usr/bin/env`.

use crate::core::args::split_arguments;
use crate::core::registry::Registry;
use crate::core::which::{self, ResolveOptions};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Options given to `env` on a shebang line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOptions {
    /// `-C DIR` / `--chdir=DIR`.
    pub chdir: Option<String>,
    /// `KEY=VALUE` assignments.
    pub env: BTreeMap<String, String>,
    /// `-i`, `--ignore-environment` or `-`.
    pub ignore: bool,
    /// `-u NAME` / `--unset=NAME`.
    pub unset: Vec<String>,
    /// `-S` / `-vS` was used.
    pub split: bool,
    pub verbose: bool,
}

/// A parsed interpreter line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shebang {
    /// Interpreter, resolved to an absolute path when possible.
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub options: EnvOptions,
}

fn unquote(value: &str) -> String {
    value.trim_matches(|c| c == '"' || c == '\'').to_string()
}

fn resolve(registry: &Registry, name: &str) -> Option<String> {
    which::resolve_sync(registry, name, &ResolveOptions::default())
        .map(|p| p.to_string_lossy().into_owned())
}

fn is_env(interpreter: &str) -> bool {
    Path::new(interpreter)
        .file_name()
        .is_some_and(|name| name == "env" || name == "env.exe")
        && interpreter.contains('/')
}

/// Parses a shebang line such as `#!/usr/bin/env -S deno run -A`.
///
/// A plain interpreter is resolved by its basename. For `env` lines, a
/// resolvable `env` becomes the shell and everything after it is passed as one
/// argument, the way the kernel does it. Otherwise the `env` options are
/// interpreted here.
pub fn parse_shebang(line: &str, registry: &Registry) -> Result<Shebang> {
    let body = line.trim().strip_prefix("#!").unwrap_or(line.trim());
    let parts = split_arguments(body);
    let mut shebang = Shebang::default();

    let Some((interpreter, rest)) = parts.split_first() else {
        return Ok(shebang);
    };

    if !is_env(interpreter) {
        let basename = interpreter.rsplit('/').next().unwrap_or(interpreter);
        shebang.shell = Some(resolve(registry, basename).unwrap_or_else(|| interpreter.clone()));
        shebang.args = rest.to_vec();
        return Ok(shebang);
    }

    if let [exe] = rest {
        if registry.platform().is_windows()
            && let Some(path) = resolve(registry, exe)
        {
            shebang.shell = Some(path);
            return Ok(shebang);
        }
        shebang.shell = Some(interpreter.clone());
        shebang.args = vec![exe.clone()];
        return Ok(shebang);
    }

    if let Some(env) = resolve(registry, "env") {
        let remainder = body
            .trim_start()
            .get(interpreter.len()..)
            .unwrap_or_default()
            .trim();
        shebang.shell = Some(env);
        if !remainder.is_empty() {
            shebang.args = vec![remainder.to_string()];
        }
        return Ok(shebang);
    }

    log::debug!("'env' not found; interpreting shebang options of '{}'", line);
    parse_env_options(rest, &mut shebang)?;
    Ok(shebang)
}

fn parse_env_options(parts: &[String], shebang: &mut Shebang) -> Result<()> {
    let options = &mut shebang.options;
    let mut iter = parts.iter();

    while let Some(next) = iter.next() {
        if let Some((key, value)) = next.split_once('=')
            && !next.starts_with('-')
        {
            options.env.insert(key.to_string(), unquote(value));
            continue;
        }

        if !next.starts_with('-') {
            shebang.shell = Some(next.clone());
            shebang.args.extend(iter.cloned());
            break;
        }

        if let Some(dir) = next.strip_prefix("--chdir=") {
            options.chdir = Some(unquote(dir));
            continue;
        }
        if let Some(name) = next.strip_prefix("--unset=") {
            options.unset.push(unquote(name));
            continue;
        }

        match next.as_str() {
            "-i" | "--ignore-environment" | "-" => options.ignore = true,
            "-u" => options.unset.push(value_of(next, iter.next())?),
            "-C" => options.chdir = Some(value_of(next, iter.next())?),
            "-S" | "-vS" => {
                options.split = true;
                options.verbose = next == "-vS";
                for token in iter.by_ref() {
                    if shebang.shell.is_some() {
                        shebang.args.push(token.clone());
                    } else if let Some((key, value)) = token.split_once('=') {
                        options.env.insert(key.to_string(), unquote(value));
                    } else {
                        shebang.shell = Some(token.clone());
                    }
                }
            }
            other => {
                return Err(Error::invalid_argument(format!(
                    "Unsupported env option '{other}' in shebang."
                )));
            }
        }
    }
    Ok(())
}

fn value_of(option: &str, value: Option<&String>) -> Result<String> {
    value
        .cloned()
        .ok_or_else(|| Error::invalid_argument(format!("Option '{option}' requires a value.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::{MapEnvironment, Platform};
    use crate::error::ErrorKind;
    use std::sync::Arc;

    fn bare_registry(platform: Platform) -> Registry {
        Registry::new(platform, Arc::new(MapEnvironment::new()))
    }

    #[test]
    fn test_plain_interpreter_unresolved_keeps_path() {
        let registry = bare_registry(Platform::Linux);
        let sb = parse_shebang("#!/opt/custom/interp -x -y", &registry).unwrap();
        assert_eq!(sb.shell.as_deref(), Some("/opt/custom/interp"));
        assert_eq!(sb.args, ["-x", "-y"]);
    }

    #[test]
    fn test_env_with_single_exe() {
        let registry = bare_registry(Platform::Linux);
        let sb = parse_shebang("#!/usr/bin/env deno", &registry).unwrap();
        assert_eq!(sb.shell.as_deref(), Some("/usr/bin/env"));
        assert_eq!(sb.args, ["deno"]);
    }

    #[test]
    fn test_env_options_parsed_when_env_missing() {
        // --- Setup ---
        let registry = bare_registry(Platform::Linux);

        // --- Execute ---
        let sb = parse_shebang(
            "#!/usr/bin/env -i -u HOME --chdir=/tmp FOO='bar' node --inspect",
            &registry,
        )
        .unwrap();

        // --- Assert ---
        assert!(sb.options.ignore);
        assert_eq!(sb.options.unset, ["HOME"]);
        assert_eq!(sb.options.chdir.as_deref(), Some("/tmp"));
        assert_eq!(sb.options.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(sb.shell.as_deref(), Some("node"));
        assert_eq!(sb.args, ["--inspect"]);
    }

    #[test]
    fn test_split_string_option() {
        let registry = bare_registry(Platform::Linux);
        let sb = parse_shebang("#!/usr/bin/env -S A=1 deno run -A", &registry).unwrap();
        assert!(sb.options.split);
        assert!(!sb.options.verbose);
        assert_eq!(sb.options.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(sb.shell.as_deref(), Some("deno"));
        assert_eq!(sb.args, ["run", "-A"]);
    }

    #[test]
    fn test_unsupported_option() {
        let registry = bare_registry(Platform::Linux);
        let err = parse_shebang("#!/usr/bin/env --bogus deno", &registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_missing_option_value() {
        let registry = bare_registry(Platform::Linux);
        let err = parse_shebang("#!/usr/bin/env -i -C", &registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_empty_line() {
        let registry = bare_registry(Platform::Linux);
        assert_eq!(parse_shebang("#!", &registry).unwrap(), Shebang::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_env_found_passes_remainder_as_one_argument() {
        let registry = Registry::system();
        if which::which_sync(&registry, "env", &[]).is_none() {
            return;
        }
        let sb = parse_shebang("#!/usr/bin/env deno run -A", &registry).unwrap();
        assert!(sb.shell.as_deref().is_some_and(|s| s.ends_with("env")));
        assert_eq!(sb.args, ["deno run -A"]);
    }
}
