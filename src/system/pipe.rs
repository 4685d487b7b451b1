// src/system/pipe.rs

use crate::error::{Error, ErrorKind, Result};
use crate::models::{ProcessOutcome, StdioMode};
use crate::system::child::{ChildProcess, Detached, drain_stream, feed_stdin, ignore_broken_pipe};
use crate::system::executor::Command;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::task::JoinHandle;

/// What a process can be piped into.
#[derive(Debug)]
pub enum PipeTarget {
    /// Spawned with a piped stdin and stdout when the link is made.
    Command(Box<Command>),
    /// Already running; must have been spawned with a piped stdin.
    Process(Box<ChildProcess>),
}

impl From<Command> for PipeTarget {
    fn from(value: Command) -> Self {
        Self::Command(Box::new(value))
    }
}

impl From<ChildProcess> for PipeTarget {
    fn from(value: ChildProcess) -> Self {
        Self::Process(Box::new(value))
    }
}

impl PipeTarget {
    pub(crate) fn into_process(self) -> Result<ChildProcess> {
        match self {
            Self::Command(cmd) => (*cmd)
                .stdin(StdioMode::Piped)
                .stdout(StdioMode::Piped)
                .spawn(),
            Self::Process(process) => Ok(*process),
        }
    }
}

/// Upstream status reported by a finished link.
#[derive(Debug, Clone, Copy)]
struct LinkExit {
    code: i32,
    signal: Option<i32>,
}

#[derive(Debug)]
struct Link {
    upstream: String,
    task: JoinHandle<Result<LinkExit>>,
}

/// Processes chained stdout → stdin, like a shell pipeline.
///
/// Each link runs as a background task that copies the upstream's stdout
/// into the downstream's stdin, closes that stdin, drains the upstream's
/// stderr and reaps the upstream. The outcome of the chain is the outcome of
/// its last process.
#[derive(Debug)]
pub struct PipeChain {
    current: ChildProcess,
    links: Vec<Link>,
}

impl PipeChain {
    pub(crate) fn from_link(
        upstream: Detached,
        sink: ChildStdin,
        downstream: ChildProcess,
    ) -> Result<Self> {
        let mut chain = Self {
            current: downstream,
            links: Vec::new(),
        };
        chain.links.push(spawn_link(upstream, sink));
        Ok(chain)
    }

    /// Appends another process to the chain.
    ///
    /// On failure the last process is killed. Earlier links then see their
    /// downstream close and wind down on their own.
    pub fn pipe(mut self, target: impl Into<PipeTarget>) -> Result<Self> {
        match self.current.link_into(target) {
            Ok((upstream, sink, next)) => {
                self.links.push(spawn_link(upstream, sink));
                self.current = next;
                Ok(self)
            }
            Err(e) => {
                self.current.abandon();
                Err(e)
            }
        }
    }

    /// Number of processes in the chain.
    pub fn len(&self) -> usize {
        self.links.len() + 1
    }

    /// Always false: a chain holds at least two processes.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Waits for the whole chain and returns the last process's outcome.
    ///
    /// I/O failures of any link are reported together as one aggregate
    /// `ProcessFailed` error, after every link has been awaited.
    pub async fn output(self) -> Result<ProcessOutcome> {
        let Self { mut current, links } = self;
        let last = current.output().await;

        let mut errors = Vec::new();
        for link in links {
            match link.task.await {
                Ok(Ok(exit)) => log::debug!(
                    "Pipe link '{}' exited with code {} (signal {:?})",
                    link.upstream,
                    exit.code,
                    exit.signal
                ),
                Ok(Err(e)) => errors.push(e),
                Err(join) => errors.push(
                    Error::new(
                        ErrorKind::ProcessFailed,
                        format!("Pipe link '{}' did not complete: {join}", link.upstream),
                    )
                    .with_target(link.upstream.clone()),
                ),
            }
        }

        match last {
            Ok(outcome) if errors.is_empty() => Ok(outcome),
            Ok(_) => Err(Error::aggregate("Pipe chain failed.", errors)),
            Err(e) => {
                errors.push(e);
                Err(Error::aggregate("Pipe chain failed.", errors))
            }
        }
    }

    /// Stdout of the last process as text.
    pub async fn text(self) -> Result<String> {
        Ok(self.output().await?.text().to_string())
    }
}

fn spawn_link(upstream: Detached, sink: ChildStdin) -> Link {
    let name = upstream.file.clone();
    log::debug!("Linking stdout of '{}' into the next process", name);
    Link {
        upstream: name,
        task: tokio::spawn(run_link(upstream, sink)),
    }
}

async fn run_link(upstream: Detached, mut sink: ChildStdin) -> Result<LinkExit> {
    let Detached {
        mut child,
        input,
        file,
        script,
    } = upstream;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let copy = async move {
        let Some(mut stdout) = stdout else {
            return Ok(());
        };
        let copied = match tokio::io::copy(&mut stdout, &mut sink).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                // Downstream stopped reading; let the upstream finish.
                drain_stream(Some(stdout)).await
            }
            Err(e) => Err(e),
        };
        let closed = ignore_broken_pipe(sink.shutdown().await);
        drop(sink);
        copied.and(closed)
    };

    let (fed, copied, drained) =
        tokio::join!(feed_stdin(stdin, input), copy, drain_stream(stderr));
    let status = child.wait().await;
    if let Some(script) = script {
        script.close();
    }

    let failure = |what: &str, e: io::Error| {
        Error::new(
            ErrorKind::ProcessFailed,
            format!("Pipe link '{file}' failed to {what}: {e}"),
        )
        .with_target(file.clone())
        .with_source(e)
    };
    fed.map_err(|e| failure("write its input", e))?;
    copied.map_err(|e| failure("forward its output", e))?;
    drained.map_err(|e| failure("drain its stderr", e))?;
    let status = status.map_err(|e| failure("exit", e))?;

    let (code, signal) = crate::models::decode_status(&status);
    Ok(LinkExit { code, signal })
}
