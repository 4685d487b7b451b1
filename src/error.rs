// src/error.rs

use std::fmt;
use thiserror::Error as ThisError;

/// The recognized failure categories of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No executable matched a logical name.
    ExecutableNotFound,
    /// A process exited unsuccessfully, or a pipe link failed.
    ProcessFailed,
    /// An argument specification or option was malformed.
    InvalidArgument,
    /// A process handle was consumed twice, or used after being piped.
    DoubleConsumption,
    /// A non-terminal operation was attempted on a finished process.
    ProcessAlreadyClosed,
    /// A shell id has no registered descriptor.
    UnregisteredShell,
    /// A shell session was run with neither an inline script nor a file.
    MissingScript,
    /// An underlying I/O failure.
    Io,
    /// Output could not be decoded as JSON.
    Json,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExecutableNotFound => "ExecutableNotFound",
            Self::ProcessFailed => "ProcessFailed",
            Self::InvalidArgument => "InvalidArgument",
            Self::DoubleConsumption => "DoubleConsumption",
            Self::ProcessAlreadyClosed => "ProcessAlreadyClosed",
            Self::UnregisteredShell => "UnregisteredShell",
            Self::MissingScript => "MissingScript",
            Self::Io => "Io",
            Self::Json => "Json",
        };
        f.write_str(name)
    }
}

/// The single error type of the crate.
///
/// Every failure carries an [`ErrorKind`] and a message. Process failures also
/// carry the exit code and signal; pipe failures carry the identity of the
/// failing link as `target` and may aggregate several member errors.
#[derive(ThisError, Debug)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    target: Option<String>,
    code: Option<i32>,
    signal: Option<i32>,
    errors: Vec<Error>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Creates an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            target: None,
            code: None,
            signal: None,
            errors: Vec::new(),
            source: None,
        }
    }

    pub fn executable_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::ExecutableNotFound,
            format!("Executable '{name}' could not be found."),
        )
        .with_target(name)
    }

    /// A process finished with a non-zero code or was killed by a signal.
    pub fn process_failed(file: &str, code: i32, signal: Option<i32>) -> Self {
        let message = match signal.and_then(crate::models::signal_name) {
            Some(name) => format!("Process '{file}' was terminated by {name} (exit code {code})."),
            None => format!("Process '{file}' exited with code {code}."),
        };
        let mut err = Self::new(ErrorKind::ProcessFailed, message).with_target(file);
        err.code = Some(code);
        err.signal = signal;
        err
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// `operation` was called on a handle that was already consumed or piped.
    pub fn double_consumption(file: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::DoubleConsumption,
            format!("Cannot call {operation} on process '{file}': it was already consumed or piped."),
        )
        .with_target(file)
    }

    pub fn process_already_closed(file: &str) -> Self {
        Self::new(
            ErrorKind::ProcessAlreadyClosed,
            format!("Process '{file}' is already closed."),
        )
        .with_target(file)
    }

    pub fn unregistered_shell(id: &str) -> Self {
        Self::new(
            ErrorKind::UnregisteredShell,
            format!("Shell '{id}' is not registered."),
        )
        .with_target(id)
    }

    pub fn missing_script() -> Self {
        Self::new(
            ErrorKind::MissingScript,
            "No inline script or script file was provided.",
        )
    }

    /// Wraps an I/O error with a context message.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        Self::new(ErrorKind::Io, format!("{context}: {source}")).with_source(source)
    }

    /// Groups several failures under one `ProcessFailed` error.
    pub fn aggregate(message: impl Into<String>, errors: Vec<Error>) -> Self {
        let mut err = Self::new(ErrorKind::ProcessFailed, message);
        err.errors = errors;
        err
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Shorthand for `self.kind() == kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The file, shell id or pipe link the error refers to.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Member errors of an aggregate.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Visits aggregate members and chained causes depth-first, then `self`.
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&Error),
    {
        for member in &self.errors {
            member.walk(visit);
        }
        if let Some(inner) = self
            .source
            .as_deref()
            .and_then(|s| s.downcast_ref::<Error>())
        {
            inner.walk(visit);
        }
        visit(self);
    }

    /// Collects every error reachable through [`Error::walk`].
    pub fn flatten(&self) -> Vec<&Error> {
        let mut out: Vec<&Error> = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a Error>) {
        for member in &self.errors {
            member.collect_into(out);
        }
        if let Some(inner) = self
            .source
            .as_deref()
            .and_then(|s| s.downcast_ref::<Error>())
        {
            inner.collect_into(out);
        }
        out.push(self);
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Json, format!("Invalid JSON output: {err}")).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_carries_code_and_target() {
        let err = Error::process_failed("grep", 1, None);
        assert!(err.is(ErrorKind::ProcessFailed));
        assert_eq!(err.code(), Some(1));
        assert_eq!(err.target(), Some("grep"));
        assert_eq!(err.to_string(), "Process 'grep' exited with code 1.");
    }

    #[test]
    fn test_signal_is_named_in_message() {
        let err = Error::process_failed("sleep", 137, Some(9));
        assert_eq!(err.signal(), Some(9));
        assert!(err.to_string().contains("SIGKILL"));
    }

    #[test]
    fn test_walk_visits_members_then_causes_then_self() {
        let chained = Error::missing_script()
            .with_source(Error::unregistered_shell("zsh"));
        let agg = Error::aggregate(
            "pipe failed",
            vec![Error::process_failed("a", 2, None), chained],
        );

        let mut kinds = Vec::new();
        agg.walk(&mut |e| kinds.push(e.kind()));
        assert_eq!(
            kinds,
            vec![
                ErrorKind::ProcessFailed,
                ErrorKind::UnregisteredShell,
                ErrorKind::MissingScript,
                ErrorKind::ProcessFailed,
            ]
        );
        assert_eq!(agg.flatten().len(), 4);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
