//! Shared test utilities for d2vm pipeline tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use d2vm::commands::build::Router;
use d2vm::config::Config;
use d2vm::convert::ImageConverter;
use d2vm::environment::InvokingUserContext;
use d2vm::image::TaggedImage;
use d2vm::process::{Cmd, CommandResult, ProcessRunner};
use d2vm::request::{BuildRequest, ConversionOptions};
use d2vm::Error;

// =============================================================================
// Process runner doubles
// =============================================================================

/// Records every command and answers with a scripted outcome instead of
/// spawning anything.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Cmd>>,
    fail_with: Option<String>,
    helper_exit: i32,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured and streamed commands fail with `stderr` as their diagnostic.
    pub fn failing(stderr: &str) -> Self {
        Self {
            fail_with: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    /// Interactive commands (the helper) exit with `code`.
    pub fn helper_exit(code: i32) -> Self {
        Self {
            helper_exit: code,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, cmd: &Cmd) {
        self.calls.lock().unwrap().push(cmd.clone());
    }

    fn captured(&self, cmd: Cmd) -> Result<CommandResult> {
        self.record(&cmd);
        match self.fail_with {
            Some(ref stderr) => Err(anyhow!("{} failed: {}", cmd.program(), stderr)),
            None => Ok(CommandResult {
                status: ExitStatus::from_raw(0),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        self.captured(cmd)
    }

    async fn run_streaming(&self, cmd: Cmd) -> Result<CommandResult> {
        self.captured(cmd)
    }

    async fn run_interactive(&self, cmd: Cmd) -> Result<ExitStatus> {
        self.record(&cmd);
        // Raw wait status: exit code in the second byte.
        Ok(ExitStatus::from_raw(self.helper_exit << 8))
    }
}

/// A runner whose interactive commands never finish.
#[derive(Default)]
pub struct HangingRunner {
    pub started: AtomicUsize,
}

#[async_trait]
impl ProcessRunner for HangingRunner {
    async fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        Err(anyhow!("unexpected captured command: {}", cmd))
    }

    async fn run_streaming(&self, cmd: Cmd) -> Result<CommandResult> {
        Err(anyhow!("unexpected streamed command: {}", cmd))
    }

    async fn run_interactive(&self, _cmd: Cmd) -> Result<ExitStatus> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Result<ExitStatus>>().await
    }
}

// =============================================================================
// Conversion engine double
// =============================================================================

/// Writes a small placeholder disk and remembers which images it saw.
#[derive(Default)]
pub struct FakeConverter {
    tags: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.tags.lock().unwrap().len()
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageConverter for FakeConverter {
    async fn convert(
        &self,
        image: &TaggedImage,
        options: &ConversionOptions,
    ) -> Result<PathBuf, Error> {
        self.tags.lock().unwrap().push(image.tag().to_string());
        let failure = |detail: String| Error::ConversionFailure {
            tag: image.tag().to_string(),
            output: options.output.clone(),
            detail,
        };
        if self.fail {
            return Err(failure("no space left on device".to_string()));
        }
        fs::write(&options.output, b"disk").map_err(|e| failure(e.to_string()))?;
        Ok(options.output.clone())
    }
}

// =============================================================================
// Test environment
// =============================================================================

/// Temporary working directory holding a build context with a Dockerfile.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Working directory the router resolves relative paths against
    pub cwd: PathBuf,
    /// Build context
    pub context: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cwd = temp_dir.path().to_path_buf();
        let context = cwd.join("app");

        fs::create_dir_all(&context).expect("Failed to create context dir");
        fs::write(context.join("Dockerfile"), "FROM ubuntu:22.04\n")
            .expect("Failed to write Dockerfile");

        Self {
            _temp_dir: temp_dir,
            cwd,
            context,
        }
    }

    /// Request for the default Dockerfile with the output under the working directory.
    pub fn request(&self, output: &str) -> BuildRequest {
        BuildRequest::new(self.context.clone(), None, self.cwd.join(output))
    }

    pub fn router(
        &self,
        runner: Arc<dyn ProcessRunner>,
        converter: Arc<dyn ImageConverter>,
        user: InvokingUserContext,
    ) -> Router {
        self.router_with_config(runner, converter, user, Config::default())
    }

    pub fn router_with_config(
        &self,
        runner: Arc<dyn ProcessRunner>,
        converter: Arc<dyn ImageConverter>,
        user: InvokingUserContext,
        config: Config,
    ) -> Router {
        Router {
            runner,
            converter,
            config,
            user,
            cwd: self.cwd.clone(),
            verbosity: 0,
        }
    }

    /// Shell script that appends its arguments to `log`, usable as an engine.
    pub fn logging_engine(&self, log: &Path) -> PathBuf {
        let script = self.cwd.join("fake-engine.sh");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display()),
        )
        .expect("Failed to write fake engine");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake engine executable");
        script
    }
}

/// Position of `value` in the command's arguments.
pub fn arg_index(cmd: &Cmd, value: &str) -> Option<usize> {
    cmd.get_args().iter().position(|a| a == value)
}

/// The argument following `flag`.
pub fn arg_after<'a>(cmd: &'a Cmd, flag: &str) -> Option<&'a str> {
    let idx = arg_index(cmd, flag)?;
    cmd.get_args().get(idx + 1).map(String::as_str)
}
