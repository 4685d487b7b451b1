// src/system/child.rs

use crate::constants::READ_CHUNK_SIZE;
use crate::core::lines::LineDecoder;
use crate::error::{Error, Result};
use crate::models::{Blob, ProcessOutcome, StdInput, decode_status};
use crate::system::pipe::{PipeChain, PipeTarget};
use crate::system::shell::TempScript;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::io;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

/// Lifecycle of a [`ChildProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Running; output not yet consumed.
    Spawned,
    /// A terminal operation is in progress.
    Consuming,
    /// Handed to a [`PipeChain`].
    Piped,
    /// Output consumed and process reaped.
    Closed,
}

/// A spawned process.
///
/// Output can be consumed exactly once, through one of the terminal methods
/// (`output`, `text`, `bytes`, `blob`, `json`, `lines`) or by piping it into
/// another process. A second terminal call fails with `DoubleConsumption`.
#[derive(Debug)]
pub struct ChildProcess {
    child: Option<Child>,
    pid: Option<u32>,
    file: String,
    args: Vec<String>,
    started_at: SystemTime,
    input: Option<StdInput>,
    stdout_piped: bool,
    state: ProcessState,
    script: Option<TempScript>,
}

/// The parts of an upstream process moved into a pipe link.
pub(crate) struct Detached {
    pub(crate) child: Child,
    pub(crate) input: Option<StdInput>,
    pub(crate) file: String,
    pub(crate) script: Option<TempScript>,
}

impl ChildProcess {
    pub(crate) fn new(
        child: Child,
        file: String,
        args: Vec<String>,
        started_at: SystemTime,
        input: Option<StdInput>,
        stdout_piped: bool,
    ) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
            file,
            args,
            started_at,
            input,
            stdout_piped,
            state: ProcessState::Spawned,
            script: None,
        }
    }

    /// Keeps a temporary script alive until the process has been consumed.
    pub(crate) fn attach_script(&mut self, script: Option<TempScript>) {
        self.script = script;
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolved executable path.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Sends a kill signal. The next terminal call reports the signal.
    pub fn kill(&mut self) -> Result<()> {
        let child = match (self.state, self.child.as_mut()) {
            (ProcessState::Spawned, Some(child)) => child,
            _ => return Err(Error::process_already_closed(&self.file)),
        };
        log::debug!("Killing process '{}' (PID: {:?})", self.file, self.pid);
        child
            .start_kill()
            .map_err(|e| Error::io(format!("Failed to kill '{}'", self.file), e))
    }

    /// Waits for the process and returns everything it wrote to captured streams.
    pub async fn output(&mut self) -> Result<ProcessOutcome> {
        self.collect("output", true).await
    }

    /// Stdout decoded as UTF-8 (lossy). Captured stderr is discarded.
    pub async fn text(&mut self) -> Result<String> {
        let outcome = self.collect("text", false).await?;
        Ok(String::from_utf8_lossy(&outcome.stdout).into_owned())
    }

    pub async fn bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.collect("bytes", false).await?.stdout)
    }

    pub async fn blob(&mut self) -> Result<Blob> {
        Ok(Blob::from(self.collect("blob", false).await?.stdout))
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.collect("json", false).await?.json()
    }

    /// Streams stdout line by line. Requires a piped stdout.
    pub fn lines(&mut self) -> Result<LineStream> {
        if self.state == ProcessState::Spawned && !self.stdout_piped {
            return Err(Error::invalid_argument(format!(
                "Cannot read lines from '{}': stdout is not piped.",
                self.file
            )));
        }
        let mut child = self.begin("lines")?;

        let stdin = child.stdin.take();
        let input = self.input.take();
        let feeder = stdin.map(|stdin| tokio::spawn(feed_stdin(Some(stdin), input)));
        let drainer = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stream(Some(stderr))));
        let stdout = child.stdout.take();
        self.state = ProcessState::Closed;

        Ok(LineStream {
            file: self.file.clone(),
            child: Some(child),
            stdout,
            decoder: Some(LineDecoder::new()),
            queue: VecDeque::new(),
            buf: vec![0; READ_CHUNK_SIZE],
            feeder,
            drainer,
            script: self.script.take(),
            exit: None,
        })
    }

    /// Feeds this process's stdout into `target`'s stdin.
    ///
    /// If the target cannot be started or has no piped stdin, the target is
    /// killed and this process stays untouched.
    pub fn pipe(&mut self, target: impl Into<PipeTarget>) -> Result<PipeChain> {
        let (upstream, sink, next) = self.link_into(target)?;
        PipeChain::from_link(upstream, sink, next)
    }

    /// Starts `target` and detaches this process to feed it.
    pub(crate) fn link_into(
        &mut self,
        target: impl Into<PipeTarget>,
    ) -> Result<(Detached, ChildStdin, ChildProcess)> {
        self.ensure_pipeable()?;
        let mut next = target.into().into_process()?;
        let linked = next
            .take_stdin_for_pipe()
            .and_then(|sink| Ok((self.detach()?, sink)));
        match linked {
            Ok((upstream, sink)) => Ok((upstream, sink, next)),
            Err(e) => {
                next.abandon();
                Err(e)
            }
        }
    }

    /// Kills a process whose output nobody will consume, and reaps it in the
    /// background.
    pub(crate) fn abandon(&mut self) {
        if self.state != ProcessState::Spawned {
            return;
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.state = ProcessState::Closed;
        log::debug!("Abandoning process '{}' (PID: {:?})", self.file, self.pid);
        if let Err(e) = child.start_kill() {
            log::debug!("Failed to kill '{}': {}", self.file, e);
        }
        reap_in_background(child, self.file.clone(), self.script.take());
    }

    pub(crate) fn ensure_pipeable(&self) -> Result<()> {
        if self.state != ProcessState::Spawned {
            return Err(Error::double_consumption(&self.file, "pipe"));
        }
        if !self.stdout_piped {
            return Err(Error::invalid_argument(format!(
                "Cannot pipe '{}': stdout is not piped.",
                self.file
            )));
        }
        Ok(())
    }

    /// Moves the running process out for a pipe link.
    pub(crate) fn detach(&mut self) -> Result<Detached> {
        self.ensure_pipeable()?;
        let child = self.begin("pipe")?;
        self.state = ProcessState::Piped;
        Ok(Detached {
            child,
            input: self.input.take(),
            file: self.file.clone(),
            script: self.script.take(),
        })
    }

    /// The stdin a pipe link writes into. Any input payload is dropped.
    pub(crate) fn take_stdin_for_pipe(&mut self) -> Result<ChildStdin> {
        if self.state != ProcessState::Spawned {
            return Err(Error::double_consumption(&self.file, "pipe"));
        }
        if self.input.take().is_some() {
            log::debug!("Input of '{}' is replaced by the upstream pipe.", self.file);
        }
        self.child
            .as_mut()
            .and_then(|c| c.stdin.take())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Cannot pipe into '{}': stdin is not piped.",
                    self.file
                ))
            })
    }

    fn begin(&mut self, operation: &str) -> Result<Child> {
        if self.state != ProcessState::Spawned {
            return Err(Error::double_consumption(&self.file, operation));
        }
        let child = self
            .child
            .take()
            .ok_or_else(|| Error::double_consumption(&self.file, operation))?;
        self.state = ProcessState::Consuming;
        Ok(child)
    }

    async fn collect(&mut self, operation: &str, keep_stderr: bool) -> Result<ProcessOutcome> {
        let mut child = self.begin(operation)?;
        let input = self.input.take();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_task = async move {
            if keep_stderr {
                read_stream(stderr).await
            } else {
                drain_stream(stderr).await.map(|()| Vec::new())
            }
        };
        let (fed, out, err) =
            tokio::join!(feed_stdin(stdin, input), read_stream(stdout), stderr_task);
        let status = child.wait().await;
        self.state = ProcessState::Closed;
        if let Some(script) = self.script.take() {
            script.close();
        }

        let file = self.file.as_str();
        fed.map_err(|e| Error::io(format!("Failed to write input to '{file}'"), e))?;
        let stdout = out.map_err(|e| Error::io(format!("Failed to read stdout of '{file}'"), e))?;
        let stderr = err.map_err(|e| Error::io(format!("Failed to read stderr of '{file}'"), e))?;
        let status = status.map_err(|e| Error::io(format!("Failed to wait for '{file}'"), e))?;

        let (code, signal) = decode_status(&status);
        log::debug!("Process '{}' exited with code {} (signal {:?})", file, code, signal);
        Ok(ProcessOutcome::new(
            file,
            self.args.clone(),
            self.started_at,
            SystemTime::now(),
            code,
            signal,
            stdout,
            stderr,
        ))
    }
}

/// Writes the input payload, then closes stdin.
///
/// A child that exits without reading all of its input is not an error.
pub(crate) async fn feed_stdin(stdin: Option<ChildStdin>, input: Option<StdInput>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let written = match input {
        Some(StdInput::Bytes(bytes)) => stdin.write_all(&bytes).await,
        Some(StdInput::Text(text)) => stdin.write_all(text.as_bytes()).await,
        Some(StdInput::Reader(mut reader)) => tokio::io::copy(&mut reader, &mut stdin).await.map(|_| ()),
        None => Ok(()),
    };
    let closed = stdin.shutdown().await;
    drop(stdin);
    ignore_broken_pipe(written)?;
    ignore_broken_pipe(closed)
}

pub(crate) fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

pub(crate) async fn read_stream<R>(stream: Option<R>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Reads a stream to its end and throws the data away.
pub(crate) async fn drain_stream<R>(stream: Option<R>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    if let Some(mut stream) = stream {
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    }
    Ok(())
}

/// Lines of a process's stdout, read lazily.
///
/// Yields every line, the trailing partial line if any, then one final empty
/// string, then `None`. Dropping the stream early closes stdout and reaps the
/// process in a background task.
#[derive(Debug)]
pub struct LineStream {
    file: String,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    decoder: Option<LineDecoder>,
    queue: VecDeque<String>,
    buf: Vec<u8>,
    feeder: Option<JoinHandle<io::Result<()>>>,
    drainer: Option<JoinHandle<io::Result<()>>>,
    script: Option<TempScript>,
    exit: Option<(i32, Option<i32>)>,
}

impl LineStream {
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.queue.pop_front() {
                return Ok(Some(line));
            }
            if self.decoder.is_none() {
                return Ok(None);
            }

            let read = match self.stdout.as_mut() {
                Some(stdout) => stdout.read(&mut self.buf).await,
                None => Ok(0),
            };
            let n = read.map_err(|e| {
                Error::io(format!("Failed to read stdout of '{}'", self.file), e)
            })?;

            if n == 0 {
                if let Some(decoder) = self.decoder.take() {
                    self.queue.extend(decoder.finish());
                }
                self.stdout = None;
                self.finish().await?;
            } else if let (Some(decoder), Some(chunk)) = (self.decoder.as_mut(), self.buf.get(..n)) {
                self.queue.extend(decoder.push(chunk));
            }
        }
    }

    /// Reads every remaining line.
    pub async fn collect(mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Sends a kill signal to the producing process. Lines it already wrote
    /// can still be read; the stream then ends with the signal in
    /// [`LineStream::exit_status`].
    pub fn kill(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(Error::process_already_closed(&self.file));
        };
        log::debug!("Killing line producer '{}'", self.file);
        child
            .start_kill()
            .map_err(|e| Error::io(format!("Failed to kill '{}'", self.file), e))
    }

    /// Exit code and signal, once the stream has ended.
    pub fn exit_status(&self) -> Option<(i32, Option<i32>)> {
        self.exit
    }

    async fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await;

        let fed = match self.feeder.take() {
            Some(task) => task.await.unwrap_or_else(|e| Err(io::Error::other(e))),
            None => Ok(()),
        };
        if let Some(task) = self.drainer.take()
            && let Ok(Err(e)) = task.await
        {
            log::debug!("Draining stderr of '{}' failed: {}", self.file, e);
        }
        if let Some(script) = self.script.take() {
            script.close();
        }

        fed.map_err(|e| Error::io(format!("Failed to write input to '{}'", self.file), e))?;
        let status =
            status.map_err(|e| Error::io(format!("Failed to wait for '{}'", self.file), e))?;
        self.exit = Some(decode_status(&status));
        Ok(())
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        // Closing the read end lets an endless producer die on EPIPE.
        drop(self.stdout.take());
        reap_in_background(child, std::mem::take(&mut self.file), self.script.take());
    }
}

/// Waits for `child` on the current runtime, then removes its script.
fn reap_in_background(mut child: Child, file: String, script: Option<TempScript>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = child.wait().await {
                    log::warn!("Failed to reap '{}': {}", file, e);
                }
                if let Some(script) = script {
                    script.close();
                }
            });
        }
        Err(_) => {
            log::debug!("No runtime to reap abandoned process '{}'.", file);
            drop(script);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::StdioMode;
    use crate::system::executor::Command;

    fn has(exe: &str) -> bool {
        crate::core::which::which_sync(&crate::core::registry::Registry::system(), exe, &[]).is_some()
    }

    #[tokio::test]
    async fn test_text_then_second_call_is_double_consumption() {
        if !has("echo") {
            return;
        }
        let mut child = Command::new("echo")
            .arg("hello")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        assert_eq!(child.text().await.unwrap(), "hello\n");
        assert_eq!(child.state(), ProcessState::Closed);

        let err = child.text().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleConsumption);
        let err = child.output().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleConsumption);
        assert_eq!(child.kill().unwrap_err().kind(), ErrorKind::ProcessAlreadyClosed);
    }

    #[tokio::test]
    async fn test_input_is_written_then_closed() {
        if !has("cat") {
            return;
        }
        let mut child = Command::new("cat")
            .input("line one\nline two")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        let outcome = child.output().await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.text(), "line one\nline two");
    }

    #[tokio::test]
    async fn test_lines_stream_ends_with_flush() {
        if !has("printf") {
            return;
        }
        let mut child = Command::new("printf")
            .arg("a\\nb\\nc")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        let mut lines = child.lines().unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("c"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert_eq!(lines.exit_status(), Some((0, None)));
        assert!(child.lines().is_err());
    }

    #[tokio::test]
    async fn test_abandoned_line_stream_is_cleaned_up() {
        if !has("yes") {
            return;
        }
        let mut child = Command::new("yes").stdout(StdioMode::Piped).spawn().unwrap();
        let mut lines = child.lines().unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("y"));
        drop(lines);
    }

    #[tokio::test]
    async fn test_line_producer_can_be_killed() {
        if !has("yes") {
            return;
        }
        // --- Setup ---
        let mut child = Command::new("yes").stdout(StdioMode::Piped).spawn().unwrap();
        let mut lines = child.lines().unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("y"));

        // --- Execute ---
        lines.kill().unwrap();
        while lines.next_line().await.unwrap().is_some() {}

        // --- Assert ---
        assert_eq!(lines.exit_status(), Some((137, Some(9))));
        assert_eq!(lines.kill().unwrap_err().kind(), ErrorKind::ProcessAlreadyClosed);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_target_without_piped_stdin_is_killed() {
        if !has("echo") || !has("sleep") {
            return;
        }
        // --- Setup ---
        let downstream = Command::new("sleep")
            .arg("30")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        let proc_entry = std::path::PathBuf::from(format!("/proc/{}", downstream.pid().unwrap()));
        let mut upstream = Command::new("echo")
            .arg("x")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();

        // --- Execute ---
        let err = upstream.pipe(downstream).unwrap_err();

        // --- Assert ---
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let mut reaped = false;
        for _ in 0..100 {
            if !proc_entry.exists() {
                reaped = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(reaped, "downstream was left running");
        assert_eq!(upstream.state(), ProcessState::Spawned);
        assert_eq!(upstream.text().await.unwrap(), "x\n");
    }

    #[tokio::test]
    async fn test_kill_reports_signal() {
        if !has("sleep") {
            return;
        }
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        child.kill().unwrap();
        let outcome = child.output().await.unwrap();
        assert_eq!(outcome.signal, Some(9));
        assert_eq!(outcome.code, 137);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_json_output() {
        if !has("echo") {
            return;
        }
        let mut child = Command::new("echo")
            .arg(r#"{"ok":true}"#)
            .stdout(StdioMode::Piped)
            .spawn()
            .unwrap();
        let value: serde_json::Value = child.json().await.unwrap();
        assert_eq!(value["ok"], true);
    }
}
