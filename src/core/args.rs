// src/core/args.rs

//! Conversion of argument specifications into argv.
//!
//! Three shapes are accepted: a ready-made list, a single command-line string
//! that is tokenized with quote and line-continuation awareness, and a
//! structured key/value map ("splat") that is turned into flags.

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// An argument specification.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSpec {
    List(Vec<String>),
    Line(String),
    Splat(Map<String, Value>),
}

impl From<Vec<String>> for ArgSpec {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<&[&str]> for ArgSpec {
    fn from(value: &[&str]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ArgSpec {
    fn from(value: [&str; N]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&str> for ArgSpec {
    fn from(value: &str) -> Self {
        Self::Line(value.to_string())
    }
}

impl From<String> for ArgSpec {
    fn from(value: String) -> Self {
        Self::Line(value)
    }
}

impl From<Map<String, Value>> for ArgSpec {
    fn from(value: Map<String, Value>) -> Self {
        Self::Splat(value)
    }
}

/// Matches a splat key either literally or by pattern.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    Exact(String),
    Pattern(Regex),
}

impl KeyFilter {
    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Pattern(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyFilter {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<Regex> for KeyFilter {
    fn from(value: Regex) -> Self {
        Self::Pattern(value)
    }
}

/// Controls how a key/value map is converted into flags.
#[derive(Debug, Clone)]
pub struct SplatOptions {
    /// Tokens emitted before everything else (e.g. a subcommand).
    pub command: Vec<String>,
    /// Keys consumed as positional arguments, in this order.
    pub positionals: Vec<String>,
    /// Place positionals after the flags instead of before them.
    pub append_positionals: bool,
    /// Single-character keys become `-k` instead of `--k`.
    pub short_flag: bool,
    pub prefix: String,
    /// When set, values are joined to flags (`--key=value`).
    pub assign: Option<String>,
    /// Skip kebab-case conversion of keys.
    pub preserve_case: bool,
    pub ignore_true: bool,
    pub ignore_false: bool,
    pub includes: Vec<KeyFilter>,
    pub excludes: Vec<KeyFilter>,
    /// Renames a key and emits it with a single dash, verbatim.
    pub aliases: HashMap<String, String>,
}

impl Default for SplatOptions {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            positionals: Vec::new(),
            append_positionals: false,
            short_flag: true,
            prefix: "--".to_string(),
            assign: None,
            preserve_case: false,
            ignore_true: false,
            ignore_false: false,
            includes: Vec::new(),
            excludes: Vec::new(),
            aliases: HashMap::new(),
        }
    }
}

/// Converts any argument specification into argv.
pub fn normalize(spec: &ArgSpec, options: &SplatOptions) -> Result<Vec<String>> {
    match spec {
        ArgSpec::List(list) => Ok(list.clone()),
        ArgSpec::Line(line) => Ok(split_arguments(line)),
        ArgSpec::Splat(map) => splat(map, options),
    }
}

/// Converts a key/value map into flags.
///
/// Output order: command tokens, positionals (unless appended), `_` extras,
/// flags, appended positionals, then `--` followed by the separated values.
pub fn splat(map: &Map<String, Value>, options: &SplatOptions) -> Result<Vec<String>> {
    let mut flags: Vec<String> = Vec::new();
    let mut extras: Vec<String> = Vec::new();
    let mut separated: Vec<String> = Vec::new();
    let mut positional_slots: Vec<Option<&Value>> = vec![None; options.positionals.len()];

    for (key, value) in map {
        if let Some(index) = options.positionals.iter().position(|p| p == key) {
            if let Some(slot) = positional_slots.get_mut(index) {
                *slot = Some(value);
            }
            continue;
        }

        if options.excludes.iter().any(|f| f.matches(key)) {
            continue;
        }
        if !options.includes.is_empty() && !options.includes.iter().any(|f| f.matches(key)) {
            continue;
        }

        if key == "--" {
            let Value::Array(items) = value else {
                return Err(Error::invalid_argument(format!(
                    "Expected key `--` to be an array, got {}.",
                    type_name(value)
                )));
            };
            separated = items.iter().filter_map(scalar_to_string).collect();
            continue;
        }

        if key == "_" {
            extras = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
                other => {
                    return Err(Error::invalid_argument(format!(
                        "Expected key `_` to be a string or an array, got {}.",
                        type_name(other)
                    )));
                }
            };
            continue;
        }

        let flag = match options.aliases.get(key) {
            Some(alias) => FlagName::Alias(alias.as_str()),
            None => FlagName::Key(key.as_str()),
        };

        match value {
            Value::Null => {}
            Value::Bool(true) => {
                if !options.ignore_true {
                    push_flag(&mut flags, options, &flag, None, false);
                }
            }
            Value::Bool(false) => {
                if !options.ignore_false {
                    push_flag(&mut flags, options, &flag, None, true);
                }
            }
            Value::Array(items) => {
                for item in items {
                    let item = scalar_to_string(item);
                    push_flag(&mut flags, options, &flag, item.as_deref(), false);
                }
            }
            Value::Object(_) => {
                return Err(Error::invalid_argument(format!(
                    "Value of key `{key}` cannot be an object."
                )));
            }
            scalar => {
                let text = scalar_to_string(scalar);
                push_flag(&mut flags, options, &flag, text.as_deref(), false);
            }
        }
    }

    let mut positionals: Vec<String> = Vec::new();
    for slot in positional_slots.into_iter().flatten() {
        match slot {
            Value::Array(items) => positionals.extend(items.iter().filter_map(scalar_to_string)),
            other if is_truthy(other) => positionals.extend(scalar_to_string(other)),
            _ => {}
        }
    }

    let mut argv = options.command.clone();
    if !options.append_positionals {
        argv.append(&mut positionals);
    }
    argv.append(&mut extras);
    argv.append(&mut flags);
    argv.append(&mut positionals);
    if !separated.is_empty() {
        argv.push("--".to_string());
        argv.append(&mut separated);
    }
    Ok(argv)
}

enum FlagName<'a> {
    Key(&'a str),
    Alias(&'a str),
}

fn push_flag(
    out: &mut Vec<String>,
    options: &SplatOptions,
    name: &FlagName<'_>,
    value: Option<&str>,
    negated: bool,
) {
    let flag = match name {
        FlagName::Alias(alias) => {
            if negated {
                format!("-no-{alias}")
            } else {
                format!("-{alias}")
            }
        }
        FlagName::Key(key) => {
            let name = if options.preserve_case {
                key.to_string()
            } else {
                to_kebab_case(key)
            };
            let name = if negated { format!("no-{name}") } else { name };
            let prefix = if options.short_flag && key.chars().count() == 1 && !negated {
                "-"
            } else {
                options.prefix.as_str()
            };
            format!("{prefix}{name}")
        }
    };

    let value = value.filter(|v| !v.is_empty());
    match (&options.assign, value, name) {
        (Some(assign), Some(v), FlagName::Key(_)) => out.push(format!("{flag}{assign}{v}")),
        (_, Some(v), _) => {
            out.push(flag);
            out.push(v.to_string());
        }
        (_, None, _) => out.push(flag),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Converts `camelCase`, `PascalCase` and `snake_case` keys to `kebab-case`.
pub fn to_kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in key.chars() {
        if c == '_' || c == ' ' {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
            prev_lower_or_digit = false;
        } else if c.is_uppercase() {
            if prev_lower_or_digit && !out.ends_with('-') {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Splits a command line into arguments.
///
/// A `'` or `"` at the start of a token opens a quoted token that ends at the
/// matching quote; the quotes are stripped and the token is kept even when
/// empty. Unquoted whitespace separates tokens. A backslash or backtick
/// immediately followed by a line break is a line continuation and is dropped.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote = Quote::None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single if c == '\'' => {
                quote = Quote::None;
                tokens.push(std::mem::take(&mut token));
                continue;
            }
            Quote::Double if c == '"' => {
                quote = Quote::None;
                tokens.push(std::mem::take(&mut token));
                continue;
            }
            Quote::Single | Quote::Double => {
                token.push(c);
                continue;
            }
            Quote::None => {}
        }

        if c == '\\' || c == '`' {
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    continue;
                }
                Some('\r') => {
                    let mut ahead = chars.clone();
                    ahead.next();
                    if ahead.peek() == Some(&'\n') {
                        chars.next();
                        chars.next();
                        continue;
                    }
                }
                _ => {}
            }
        }

        if c.is_whitespace() {
            if !token.is_empty() {
                tokens.push(std::mem::take(&mut token));
            }
            continue;
        }

        if token.is_empty() {
            if c == '\'' {
                quote = Quote::Single;
                continue;
            }
            if c == '"' {
                quote = Quote::Double;
                continue;
            }
        }

        token.push(c);
    }

    if !token.is_empty() {
        tokens.push(token);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn splat_default(value: Value) -> Vec<String> {
        splat(&obj(value), &SplatOptions::default()).unwrap()
    }

    // --- `split_arguments` Tests ---
    #[test]
    fn test_split_plain_and_quoted() {
        assert_eq!(split_arguments("--foo bar"), ["--foo", "bar"]);
        assert_eq!(split_arguments("hello 'dog world'"), ["hello", "dog world"]);
        assert_eq!(split_arguments("hello \"cat world\""), ["hello", "cat world"]);
    }

    #[test]
    fn test_split_line_continuations() {
        assert_eq!(split_arguments("--hello \\\n\"world\""), ["--hello", "world"]);
        assert_eq!(split_arguments("--hello `\r\n  world"), ["--hello", "world"]);
    }

    #[test]
    fn test_split_empty_quoted_token_is_kept() {
        assert_eq!(split_arguments("a '' b"), ["a", "", "b"]);
    }

    #[test]
    fn test_split_quote_inside_token_is_literal() {
        assert_eq!(split_arguments("it's here"), ["it's", "here"]);
        assert!(split_arguments("   \t\n").is_empty());
    }

    // --- `splat` Tests ---
    #[test]
    fn test_splat_basic_values() {
        assert_eq!(splat_default(json!({"version": true})), ["--version"]);
        assert_eq!(splat_default(json!({"foo": "bar"})), ["--foo", "bar"]);
        assert_eq!(splat_default(json!({"depth": 3})), ["--depth", "3"]);
        assert_eq!(splat_default(json!({"color": false})), ["--no-color"]);
        assert!(splat_default(json!({"skip": null})).is_empty());
    }

    #[test]
    fn test_splat_keys_are_kebab_cased() {
        assert_eq!(
            splat_default(json!({"dryRun": true, "max_count": 2})),
            ["--dry-run", "--max-count", "2"]
        );
    }

    #[test]
    fn test_splat_short_flags_and_arrays() {
        assert_eq!(
            splat_default(json!({"v": true, "include": ["a", "b"]})),
            ["-v", "--include", "a", "--include", "b"]
        );
    }

    #[test]
    fn test_splat_extras_and_separator() {
        let argv = splat_default(json!({
            "force": true,
            "_": ["one", "two"],
            "--": ["--raw", "x"],
        }));
        assert_eq!(argv, ["one", "two", "--force", "--", "--raw", "x"]);
    }

    #[test]
    fn test_splat_positionals_keep_declared_order() {
        let options = SplatOptions {
            command: vec!["clone".to_string()],
            positionals: vec!["repo".to_string(), "dir".to_string()],
            ..Default::default()
        };
        let map = obj(json!({"dir": "out", "depth": 1, "repo": "https://x"}));
        assert_eq!(
            splat(&map, &options).unwrap(),
            ["clone", "https://x", "out", "--depth", "1"]
        );

        let appended = SplatOptions {
            append_positionals: true,
            ..options
        };
        assert_eq!(
            splat(&map, &appended).unwrap(),
            ["clone", "--depth", "1", "https://x", "out"]
        );
    }

    #[test]
    fn test_splat_missing_positionals_are_skipped() {
        let options = SplatOptions {
            positionals: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let map = obj(json!({"b": "second", "a": ""}));
        assert_eq!(splat(&map, &options).unwrap(), ["second"]);
    }

    #[test]
    fn test_splat_assign_and_aliases() {
        let mut aliases = HashMap::new();
        aliases.insert("recurse".to_string(), "r".to_string());
        let options = SplatOptions {
            assign: Some("=".to_string()),
            aliases,
            ..Default::default()
        };
        let map = obj(json!({"name": "x", "recurse": true, "empty": ""}));
        assert_eq!(splat(&map, &options).unwrap(), ["--name=x", "-r", "--empty"]);
    }

    #[test]
    fn test_splat_filters() {
        let options = SplatOptions {
            excludes: vec![KeyFilter::Pattern(Regex::new("^secret").unwrap())],
            ..Default::default()
        };
        let map = obj(json!({"secretToken": "t", "user": "me"}));
        assert_eq!(splat(&map, &options).unwrap(), ["--user", "me"]);

        let options = SplatOptions {
            includes: vec!["secretToken".into()],
            ..Default::default()
        };
        assert_eq!(splat(&map, &options).unwrap(), ["--secret-token", "t"]);
    }

    #[test]
    fn test_splat_rejects_malformed_reserved_keys() {
        let err = splat(&obj(json!({"--": "x"})), &SplatOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        let err = splat(&obj(json!({"_": 1})), &SplatOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    // --- `normalize` Tests ---
    #[test]
    fn test_normalize_dispatches_on_shape() {
        let opts = SplatOptions::default();
        assert_eq!(
            normalize(&ArgSpec::from(["--foo", "bar"]), &opts).unwrap(),
            ["--foo", "bar"]
        );
        assert_eq!(normalize(&"--foo bar".into(), &opts).unwrap(), ["--foo", "bar"]);
        assert_eq!(
            normalize(&ArgSpec::Splat(obj(json!({"foo": "bar"}))), &opts).unwrap(),
            ["--foo", "bar"]
        );
    }

    #[test]
    fn test_kebab_case() {
        assert_eq!(to_kebab_case("fooBar"), "foo-bar");
        assert_eq!(to_kebab_case("foo_bar"), "foo-bar");
        assert_eq!(to_kebab_case("HTTPProxy"), "httpproxy");
        assert_eq!(to_kebab_case("v2Api"), "v2-api");
    }
}
