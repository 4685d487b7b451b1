// src/models.rs

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncRead;

/// How a standard stream of a child process is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Capture the stream so the caller can read or write it.
    Piped,
    /// Discard the stream.
    Null,
}

impl StdioMode {
    pub(crate) fn to_stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Piped => Stdio::piped(),
            Self::Null => Stdio::null(),
        }
    }
}

/// Data written to a child's standard input before its output is read.
pub enum StdInput {
    Bytes(Vec<u8>),
    Text(String),
    /// A streamed source; only supported by the async consumption paths.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for StdInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<&str> for StdInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StdInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for StdInput {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for StdInput {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Feeds the captured stdout of a finished process into the next one.
impl From<ProcessOutcome> for StdInput {
    fn from(value: ProcessOutcome) -> Self {
        Self::Bytes(value.stdout)
    }
}

impl From<&ProcessOutcome> for StdInput {
    fn from(value: &ProcessOutcome) -> Self {
        Self::Bytes(value.stdout.clone())
    }
}

/// Everything needed to start one process.
///
/// `file` may be a logical name; it is resolved to an absolute path when the
/// process is spawned.
#[derive(Debug, Default)]
pub struct StartInfo {
    pub file: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overrides merged on top of the inherited environment.
    pub env: HashMap<String, String>,
    pub stdin: StdioMode,
    pub stdout: StdioMode,
    pub stderr: StdioMode,
    pub input: Option<StdInput>,
    /// Write the command line to stdout before spawning.
    pub echo: bool,
}

impl StartInfo {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    /// Sets the input payload. Stdin is switched to [`StdioMode::Piped`].
    pub fn set_input(&mut self, input: StdInput) {
        self.stdin = StdioMode::Piped;
        self.input = Some(input);
    }

    /// Takes the input payload, dropping it if stdin is not captured.
    pub(crate) fn take_input(&mut self) -> Option<StdInput> {
        let input = self.input.take();
        if input.is_some() && self.stdin != StdioMode::Piped {
            log::debug!(
                "Ignoring input for '{}': stdin is {:?}, not piped.",
                self.file,
                self.stdin
            );
            return None;
        }
        input
    }
}

/// Binary output of a process, cheap to clone.
pub type Blob = Arc<[u8]>;

/// The final state of a finished process and whatever output was captured.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Resolved executable path.
    pub file: String,
    pub args: Vec<String>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    /// Exit code; `128 + signo` when the process was killed by a signal.
    pub code: i32,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    text: OnceLock<String>,
    error_text: OnceLock<String>,
    lines: OnceLock<Vec<String>>,
}

impl ProcessOutcome {
    pub fn new(
        file: impl Into<String>,
        args: Vec<String>,
        started_at: SystemTime,
        ended_at: SystemTime,
        code: i32,
        signal: Option<i32>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    ) -> Self {
        Self {
            file: file.into(),
            args,
            started_at,
            ended_at,
            code,
            signal,
            stdout,
            stderr,
            text: OnceLock::new(),
            error_text: OnceLock::new(),
            lines: OnceLock::new(),
        }
    }

    /// Decoded stdout. Invalid UTF-8 is replaced; decoded once, then cached.
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.stdout).into_owned())
    }

    /// Decoded stderr.
    pub fn error_text(&self) -> &str {
        self.error_text
            .get_or_init(|| String::from_utf8_lossy(&self.stderr).into_owned())
    }

    /// Stdout split on `\r\n` or `\n`. Output ending in a newline yields a
    /// trailing empty line.
    pub fn lines(&self) -> &[String] {
        self.lines.get_or_init(|| {
            self.text()
                .split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.stdout)?)
    }

    pub fn blob(&self) -> Blob {
        Arc::from(self.stdout.as_slice())
    }

    /// `true` when the process exited with code 0 and was not signalled.
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }

    /// Success decided by a caller-supplied predicate.
    pub fn success_with<F>(&self, validate: F) -> bool
    where
        F: FnOnce(&Self) -> bool,
    {
        validate(self)
    }

    /// Converts an unsuccessful outcome into a `ProcessFailed` error.
    pub fn ensure_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure())
        }
    }

    pub fn ensure_success_with<F>(self, validate: F) -> Result<Self>
    where
        F: FnOnce(&Self) -> bool,
    {
        if validate(&self) {
            Ok(self)
        } else {
            Err(self.failure())
        }
    }

    pub fn duration(&self) -> Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    fn failure(&self) -> Error {
        let mut err = Error::process_failed(&self.file, self.code, self.signal);
        let stderr = self.error_text().trim();
        if !stderr.is_empty() {
            err = err.with_source(std::io::Error::other(stderr.to_string()));
        }
        err
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Splits an exit status into `(code, signal)`.
///
/// A process killed by signal `n` reports code `128 + n`, matching POSIX shells.
pub(crate) fn decode_status(status: &ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, Some(signal));
        }
    }
    (-1, None)
}

/// Conventional name of a POSIX signal number.
pub fn signal_name(signal: i32) -> Option<&'static str> {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        6 => "SIGABRT",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(code: i32, stdout: &str) -> ProcessOutcome {
        let now = SystemTime::now();
        ProcessOutcome::new(
            "/bin/echo",
            vec![],
            now,
            now,
            code,
            None,
            stdout.as_bytes().to_vec(),
            Vec::new(),
        )
    }

    #[test]
    fn test_text_and_lines_are_cached() {
        let out = outcome(0, "one\r\ntwo\n");
        assert_eq!(out.text(), "one\r\ntwo\n");
        assert_eq!(out.lines(), ["one", "two", ""]);
        // Same allocation on the second call.
        assert!(std::ptr::eq(out.text(), out.text()));
    }

    #[test]
    fn test_ensure_success() {
        assert!(outcome(0, "").ensure_success().is_ok());
        let err = outcome(3, "").ensure_success().unwrap_err();
        assert_eq!(err.code(), Some(3));
        assert!(outcome(3, "").success_with(|o| o.code == 3));
    }

    #[test]
    fn test_json_output() {
        let out = outcome(0, r#"{"name":"plumb","n":2}"#);
        let value: serde_json::Value = out.json().unwrap();
        assert_eq!(value["n"], 2);
        assert!(outcome(0, "not json").json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_input_is_dropped_without_piped_stdin() {
        let mut info = StartInfo::new("cat");
        info.set_input("hello".into());
        info.stdin = StdioMode::Inherit;
        assert!(info.take_input().is_none());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(15), Some("SIGTERM"));
        assert_eq!(signal_name(64), None);
    }
}
