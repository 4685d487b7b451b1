// src/system/executor.rs

use crate::core::args::{self, ArgSpec, SplatOptions};
use crate::core::registry::Registry;
use crate::core::which::{self, ResolveOptions};
use crate::error::{Error, Result};
use crate::models::{Blob, ProcessOutcome, StartInfo, StdInput, StdioMode, decode_status};
use crate::system::child::{ChildProcess, LineStream};
use crate::system::echo;
use crate::system::pipe::{PipeChain, PipeTarget};
use crate::system::shell::TempScript;
use serde::de::DeserializeOwned;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command as StdCommand};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

/// Builder for a single process invocation.
///
/// The executable is resolved when the command is spawned, not when the
/// builder is created. Arguments may be added in any [`ArgSpec`] shape; they
/// are normalized in the order they were added.
#[derive(Debug)]
pub struct Command {
    registry: Arc<Registry>,
    info: StartInfo,
    pieces: Vec<ArgSpec>,
    splat: SplatOptions,
    stdout_set: bool,
    stderr_set: bool,
    exe: Option<PathBuf>,
    script: Option<TempScript>,
}

impl Command {
    /// A command resolved through [`Registry::global`].
    pub fn new(file: impl Into<String>) -> Self {
        Self::with_registry(Registry::global(), file)
    }

    pub fn with_registry(registry: Arc<Registry>, file: impl Into<String>) -> Self {
        Self {
            registry,
            info: StartInfo::new(file),
            pieces: Vec::new(),
            splat: SplatOptions::default(),
            stdout_set: false,
            stderr_set: false,
            exe: None,
            script: None,
        }
    }

    /// Skips resolution and runs `exe`, deleting `script` once consumed.
    pub(crate) fn resolved(mut self, exe: PathBuf, script: Option<TempScript>) -> Self {
        self.exe = Some(exe);
        self.script = script;
        self
    }

    /// Adds one literal argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.pieces.push(ArgSpec::List(vec![arg.into()]));
        self
    }

    /// Adds arguments from a list, a command-line string or a splat map.
    pub fn args(mut self, spec: impl Into<ArgSpec>) -> Self {
        self.pieces.push(spec.into());
        self
    }

    /// Options used for every splat map added with [`Command::args`].
    pub fn splat_options(mut self, options: SplatOptions) -> Self {
        self.splat = options;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.info.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.info
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Data written to stdin. Stdin becomes piped.
    pub fn input(mut self, input: impl Into<StdInput>) -> Self {
        self.info.set_input(input.into());
        self
    }

    pub fn stdin(mut self, mode: StdioMode) -> Self {
        self.info.stdin = mode;
        self
    }

    pub fn stdout(mut self, mode: StdioMode) -> Self {
        self.info.stdout = mode;
        self.stdout_set = true;
        self
    }

    pub fn stderr(mut self, mode: StdioMode) -> Self {
        self.info.stderr = mode;
        self.stderr_set = true;
        self
    }

    /// Prints the resolved command line before spawning.
    pub fn echo(mut self, enabled: bool) -> Self {
        self.info.echo = enabled;
        self
    }

    /// Resolves the executable and starts the process with the configured stdio.
    ///
    /// Resolution stats the filesystem on the calling thread; prefer
    /// [`Command::spawn_async`] from async code. Must be called from within a
    /// tokio runtime. Use [`Command::output_sync`] from plain threads.
    pub fn spawn(self) -> Result<ChildProcess> {
        let (registry, info, exe, script) = self.prepare()?;
        spawn_resolved(&registry, info, &exe, script)
    }

    /// Like [`Command::spawn`], but resolves the executable without blocking
    /// the runtime.
    pub async fn spawn_async(self) -> Result<ChildProcess> {
        let (registry, info, exe, script) = self.prepare_async().await?;
        spawn_resolved(&registry, info, &exe, script)
    }

    /// Captures stdout and stderr (unless set explicitly) and waits.
    pub async fn output(self) -> Result<ProcessOutcome> {
        self.capture_all(false).spawn_async().await?.output().await
    }

    /// Blocking form of [`Command::output`]. Streamed input is not supported.
    pub fn output_sync(self) -> Result<ProcessOutcome> {
        let (registry, info, exe, script) = self.capture_all(false).prepare()?;
        output_blocking(&registry, info, &exe, script)
    }

    /// Captures both streams, regardless of earlier settings.
    pub async fn quiet(self) -> Result<ProcessOutcome> {
        self.capture_all(true).spawn_async().await?.output().await
    }

    pub async fn text(self) -> Result<String> {
        self.capture_stdout().spawn_async().await?.text().await
    }

    pub async fn bytes(self) -> Result<Vec<u8>> {
        self.capture_stdout().spawn_async().await?.bytes().await
    }

    pub async fn blob(self) -> Result<Blob> {
        self.capture_stdout().spawn_async().await?.blob().await
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        self.capture_stdout().spawn_async().await?.json().await
    }

    /// Spawns and streams stdout line by line.
    pub async fn lines(self) -> Result<LineStream> {
        self.capture_stdout().spawn_async().await?.lines()
    }

    /// Spawns with a piped stdout and feeds it into `target`.
    ///
    /// If the link cannot be made, the spawned process is killed.
    pub fn pipe(self, target: impl Into<PipeTarget>) -> Result<PipeChain> {
        let mut upstream = self.stdout(StdioMode::Piped).spawn()?;
        let chain = upstream.pipe(target);
        if chain.is_err() {
            upstream.abandon();
        }
        chain
    }

    fn capture_stdout(mut self) -> Self {
        self.info.stdout = StdioMode::Piped;
        if !self.stderr_set {
            self.info.stderr = StdioMode::Null;
        }
        self
    }

    fn capture_all(mut self, force: bool) -> Self {
        if force || !self.stdout_set {
            self.info.stdout = StdioMode::Piped;
        }
        if force || !self.stderr_set {
            self.info.stderr = StdioMode::Piped;
        }
        self
    }

    /// Normalizes the arguments. The executable is `None` until resolved.
    fn normalize(self) -> Result<Prepared<Option<PathBuf>>> {
        let Self {
            registry,
            mut info,
            pieces,
            splat,
            exe,
            script,
            ..
        } = self;
        for piece in &pieces {
            info.args.extend(args::normalize(piece, &splat)?);
        }
        Ok((registry, info, exe, script))
    }

    fn prepare(self) -> Result<Prepared> {
        let (registry, info, exe, script) = self.normalize()?;
        let exe = match exe {
            Some(exe) => exe,
            None => {
                let found = which::resolve_sync(&registry, &info.file, &ResolveOptions::default());
                resolved_or_not_found(&info.file, found)?
            }
        };
        Ok((registry, info, exe, script))
    }

    async fn prepare_async(self) -> Result<Prepared> {
        let (registry, info, exe, script) = self.normalize()?;
        let exe = match exe {
            Some(exe) => exe,
            None => {
                let found =
                    which::resolve(&registry, &info.file, &ResolveOptions::default()).await;
                resolved_or_not_found(&info.file, found)?
            }
        };
        Ok((registry, info, exe, script))
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn current_dir(&self) -> Option<&Path> {
        self.info.cwd.as_deref()
    }
}

type Prepared<E = PathBuf> = (Arc<Registry>, StartInfo, E, Option<TempScript>);

fn resolved_or_not_found(file: &str, found: Option<PathBuf>) -> Result<PathBuf> {
    let exe = found.ok_or_else(|| Error::executable_not_found(file))?;
    log::debug!("Resolved '{}' to '{}'", file, exe.display());
    Ok(exe)
}

/// Runs a command with inherited stdio and waits for it.
pub async fn run(file: &str, args: impl Into<ArgSpec>) -> Result<ProcessOutcome> {
    inherited(file, args).output().await
}

/// Runs a command with both streams captured and waits for it.
pub async fn quiet_run(file: &str, args: impl Into<ArgSpec>) -> Result<ProcessOutcome> {
    Command::new(file).args(args).quiet().await
}

/// Blocking form of [`run`].
pub fn run_sync(file: &str, args: impl Into<ArgSpec>) -> Result<ProcessOutcome> {
    inherited(file, args).output_sync()
}

/// Blocking form of [`quiet_run`].
pub fn quiet_run_sync(file: &str, args: impl Into<ArgSpec>) -> Result<ProcessOutcome> {
    Command::new(file)
        .args(args)
        .stdout(StdioMode::Piped)
        .stderr(StdioMode::Piped)
        .output_sync()
}

fn inherited(file: &str, args: impl Into<ArgSpec>) -> Command {
    Command::new(file)
        .args(args)
        .stdout(StdioMode::Inherit)
        .stderr(StdioMode::Inherit)
}

fn echo_command(registry: &Registry, info: &StartInfo, file: &str) -> Result<()> {
    if !(info.echo || registry.echo_enabled()) {
        return Ok(());
    }
    let mut out = io::stdout().lock();
    echo::write_command(&mut out, file, &info.args, registry.masker())
        .and_then(|()| out.flush())
        .map_err(|e| Error::io("Failed to echo command", e))
}

fn std_command(info: &StartInfo, exe: &Path) -> StdCommand {
    let mut command = StdCommand::new(exe);
    command
        .args(&info.args)
        .envs(&info.env)
        .stdin(info.stdin.to_stdio())
        .stdout(info.stdout.to_stdio())
        .stderr(info.stderr.to_stdio());
    if let Some(cwd) = &info.cwd {
        command.current_dir(dunce::simplified(cwd));
    }
    command
}

/// Starts an already resolved executable on the tokio runtime.
pub(crate) fn spawn_resolved(
    registry: &Registry,
    mut info: StartInfo,
    exe: &Path,
    script: Option<TempScript>,
) -> Result<ChildProcess> {
    let file = exe.to_string_lossy().into_owned();
    echo_command(registry, &info, &file)?;
    let input = info.take_input();

    let mut command = tokio::process::Command::from(std_command(&info, exe));
    let started_at = SystemTime::now();
    let child = command.spawn().map_err(|e| {
        Error::io(format!("Failed to spawn '{file}'"), e).with_target(file.clone())
    })?;
    log::debug!("Spawned '{}' (PID: {:?}) with args {:?}", file, child.id(), info.args);

    let mut process = ChildProcess::new(
        child,
        file,
        info.args,
        started_at,
        input,
        info.stdout == StdioMode::Piped,
    );
    process.attach_script(script);
    Ok(process)
}

/// Starts an already resolved executable and blocks until it exits.
///
/// Input is written from a scoped thread while stdout and stderr are read,
/// so a child that fills a pipe cannot stall the writer.
pub(crate) fn output_blocking(
    registry: &Registry,
    mut info: StartInfo,
    exe: &Path,
    script: Option<TempScript>,
) -> Result<ProcessOutcome> {
    let _script = scopeguard::guard(script, |script| {
        if let Some(script) = script {
            script.close();
        }
    });
    let file = exe.to_string_lossy().into_owned();
    let input = match info.take_input() {
        Some(StdInput::Reader(_)) => {
            return Err(Error::invalid_argument(format!(
                "Streamed input is not supported when running '{file}' synchronously."
            )));
        }
        Some(StdInput::Bytes(bytes)) => Some(bytes),
        Some(StdInput::Text(text)) => Some(text.into_bytes()),
        None => None,
    };
    echo_command(registry, &info, &file)?;

    let started_at = SystemTime::now();
    let mut child = std_command(&info, exe).spawn().map_err(|e| {
        Error::io(format!("Failed to spawn '{file}'"), e).with_target(file.clone())
    })?;
    log::debug!("Spawned '{}' (PID: {}) with args {:?}", file, child.id(), info.args);

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (fed, out, err) = thread::scope(|scope| {
        let feeder = scope.spawn(move || write_blocking(stdin, input));
        let errors = scope.spawn(move || read_blocking(stderr));
        let out = read_blocking(stdout);
        (join_io(feeder.join()), out, join_io(errors.join()))
    });
    let status = child.wait();

    fed.map_err(|e| Error::io(format!("Failed to write input to '{file}'"), e))?;
    let stdout = out.map_err(|e| Error::io(format!("Failed to read stdout of '{file}'"), e))?;
    let stderr = err.map_err(|e| Error::io(format!("Failed to read stderr of '{file}'"), e))?;
    let status = status.map_err(|e| Error::io(format!("Failed to wait for '{file}'"), e))?;

    let (code, signal) = decode_status(&status);
    log::debug!("Process '{}' exited with code {} (signal {:?})", file, code, signal);
    Ok(ProcessOutcome::new(
        &file,
        info.args,
        started_at,
        SystemTime::now(),
        code,
        signal,
        stdout,
        stderr,
    ))
}

fn write_blocking(stdin: Option<ChildStdin>, input: Option<Vec<u8>>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let written = match input {
        Some(bytes) => stdin.write_all(&bytes),
        None => Ok(()),
    };
    drop(stdin);
    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn read_blocking<R: Read>(stream: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn join_io<T>(joined: thread::Result<io::Result<T>>) -> io::Result<T> {
    joined.unwrap_or_else(|_| Err(io::Error::other("stream thread panicked")))
}
