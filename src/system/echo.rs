// src/system/echo.rs

use colored::Colorize;
use std::io::{self, Write};
use std::sync::{PoisonError, RwLock};

/// Replacement written in place of a registered secret.
pub const MASK: &str = "***";

/// Hides registered secret values in echoed command lines.
#[derive(Debug, Default)]
pub struct SecretMasker {
    secrets: RwLock<Vec<String>>,
}

impl SecretMasker {
    /// Registers a secret. Empty values are ignored.
    pub fn add(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        if !secrets.contains(&secret) {
            secrets.push(secret);
            // Longest first, so a secret containing another one is fully hidden.
            secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        }
    }

    pub fn mask(&self, text: &str) -> String {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }
}

/// Formats a command line for display. Arguments containing spaces are quoted.
pub fn format_command(file: &str, args: &[String], masker: &SecretMasker) -> String {
    let mut line = file.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(' ') {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    masker.mask(&line)
}

/// Writes the masked command line in cyan, followed by a newline.
pub fn write_command<W: Write>(
    out: &mut W,
    file: &str,
    args: &[String],
    masker: &SecretMasker,
) -> io::Result<()> {
    let line = format_command(file, args, masker);
    writeln!(out, "{}", line.cyan())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_format_quotes_args_with_spaces() {
        let masker = SecretMasker::default();
        assert_eq!(
            format_command("git", &args(&["commit", "-m", "first commit"]), &masker),
            "git commit -m \"first commit\""
        );
    }

    #[test]
    fn test_secrets_are_masked() {
        let masker = SecretMasker::default();
        masker.add("hunter2");
        masker.add("hunter2-extended");
        masker.add("");
        assert_eq!(
            format_command("login", &args(&["--token", "hunter2-extended", "hunter2"]), &masker),
            "login --token *** ***"
        );
    }

    #[test]
    fn test_write_command_ends_with_newline() {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        write_command(&mut buf, "echo", &args(&["hi"]), &SecretMasker::default()).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "echo hi\n");
    }
}
