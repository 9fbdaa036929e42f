//! Spawning external tools.
//!
//! Every external tool (the container engine, the helper container, the
//! conversion engine) goes through [`Cmd`]. Children are spawned with
//! `kill_on_drop` so that dropping an in-flight step (Ctrl+C, SIGTERM)
//! terminates the subprocess instead of leaving it running.
//!
//! Pipeline components take a [`ProcessRunner`] rather than calling
//! [`Cmd`] directly, so tests can record invocations without spawning
//! anything.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Number of trailing stderr lines kept from a streamed command for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of a finished child.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    /// Empty when stdout went to the terminal.
    pub stdout: String,
    /// Only the tail for streamed commands.
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code; -1 when the child was killed by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// An external tool invocation, assembled before anything is spawned.
///
/// Comparable and cloneable so runners and tests can inspect exactly what
/// would be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    /// Non-zero exit is returned as a result rather than an error.
    allow_fail: bool,
    /// Replaces "'<program>' failed" in error messages.
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Paths are passed lossily; the engine CLIs only take UTF-8 anyway.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_owned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self) -> String {
        format!("Failed to execute '{}'. Is it installed?", self.program)
    }

    fn failure(&self, code: i32, stderr: &str) -> anyhow::Error {
        let prefix = match self.error_prefix {
            Some(ref prefix) => prefix.clone(),
            None => format!("'{}' failed", self.program),
        };
        match stderr {
            "" => anyhow!("{} (exit code {})", prefix, code),
            stderr => anyhow!("{} (exit code {}):\n{}", prefix, code, stderr),
        }
    }

    /// Capture stdout and stderr; stdin is closed.
    pub async fn run(self) -> Result<CommandResult> {
        tracing::debug!("exec: {}", self);
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| self.spawn_error())?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            return Err(self.failure(result.code(), result.stderr_trimmed()));
        }

        Ok(result)
    }

    /// Run the command with stdout inherited and stderr echoed to the terminal.
    ///
    /// Use for long-running tools whose progress the user should see (image
    /// builds). The last stderr lines are kept so a failure still carries the
    /// tool's diagnostic.
    pub async fn run_streaming(self) -> Result<CommandResult> {
        tracing::debug!("exec (streaming): {}", self);
        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| self.spawn_error())?;

        let stderr = child
            .stderr
            .take()
            .context("child stderr was not captured")?;
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .with_context(|| format!("Failed to read stderr of '{}'", self.program))?;
            if read == 0 {
                break;
            }
            // Tools may print in any locale; decode lossily like `run` does.
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(|c: char| c == '\n' || c == '\r')
                .to_string();
            eprintln!("{}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        let result = CommandResult {
            status,
            stdout: String::new(),
            stderr: Vec::from(tail).join("\n"),
        };

        if !self.allow_fail && !result.success() {
            return Err(self.failure(result.code(), result.stderr_trimmed()));
        }

        Ok(result)
    }

    /// Hand the terminal to the child. Nothing is captured, so a failure
    /// carries only the exit code.
    pub async fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!("exec (interactive): {}", self);
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| self.spawn_error())?;

        if !self.allow_fail && !status.success() {
            return Err(self.failure(status.code().unwrap_or(-1), ""));
        }

        Ok(status)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// =============================================================================
// Runner abstraction
// =============================================================================

/// Executes [`Cmd`]s on behalf of the pipeline.
///
/// Every call blocks the pipeline until the child exits; the only
/// difference between the methods is where the child's stdio goes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Capture stdout and stderr.
    async fn run(&self, cmd: Cmd) -> Result<CommandResult>;

    /// Inherit stdout, echo stderr and keep its tail.
    async fn run_streaming(&self, cmd: Cmd) -> Result<CommandResult>;

    /// Inherit all stdio.
    async fn run_interactive(&self, cmd: Cmd) -> Result<ExitStatus>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        cmd.run().await
    }

    async fn run_streaming(&self, cmd: Cmd) -> Result<CommandResult> {
        cmd.run_streaming().await
    }

    async fn run_interactive(&self, cmd: Cmd) -> Result<ExitStatus> {
        cmd.run_interactive().await
    }
}

/// Whether `program` resolves through PATH.
pub fn exists(program: &str) -> bool {
    which::which(program).is_ok()
}

// =============================================================================
// Tests
// =============================================================================
