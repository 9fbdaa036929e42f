//! Relaunch the build inside a privileged helper container.
//!
//! Used whenever this process cannot build disks itself (not Linux, or not
//! root). The helper gets:
//! - the host engine socket at [`HELPER_ENGINE_SOCKET`]
//! - the build context at `/in` and the output directory at `/out`
//! - the caller's uid in `SUDO_UID`, so it can chown the result back
//! - the `build` sub-command with path arguments rewritten for `/in` and `/out`
//!
//! The container runs with `--rm` and a unique name. If the launch is
//! dropped before the helper exits (Ctrl+C, SIGTERM) a guard force-removes
//! the container by that name.

use async_trait::async_trait;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use uuid::Uuid;

use super::{EnvironmentExecutor, Outcome};
use crate::config::Config;
use crate::environment::SUDO_UID_ENV;
use crate::error::Error;
use crate::paths::{PathMapping, CONTAINER_CONTEXT_MOUNT, CONTAINER_OUTPUT_MOUNT};
use crate::process::{Cmd, ProcessRunner};
use crate::request::BuildRequest;

/// Engine socket path inside the helper.
pub const HELPER_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Working directory inside the helper.
pub const HELPER_WORKDIR: &str = "/d2vm";

/// Prefix of helper container names.
pub const HELPER_NAME_PREFIX: &str = "d2vm-helper-";

/// Sub-command forwarded to the helper.
const SUBCOMMAND: &str = "build";

pub struct HelperExecutor {
    runner: Arc<dyn ProcessRunner>,
    config: Config,
    cwd: PathBuf,
    forwarded_uid: Option<u32>,
    verbosity: u8,
    tty: bool,
}

impl HelperExecutor {
    /// `forwarded_uid` ends up in the helper's `SUDO_UID`.
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        config: Config,
        cwd: PathBuf,
        forwarded_uid: Option<u32>,
    ) -> Self {
        Self {
            runner,
            config,
            cwd,
            forwarded_uid,
            verbosity: 0,
            tty: std::io::stdin().is_terminal(),
        }
    }

    /// Forward `-v` this many times.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Allocate a pseudo-terminal for the helper.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Arguments following the sub-command name inside the helper.
    pub fn helper_args(&self, request: &BuildRequest, mapping: &PathMapping) -> Vec<String> {
        let mut args: Vec<String> = (0..self.verbosity).map(|_| "-v".to_string()).collect();
        args.extend(mapping.rewrite(&request.tagged_args()));
        args
    }

    /// The `<engine> run` invocation for one helper launch.
    pub fn command(&self, mapping: &PathMapping, args: &[String], name: &str) -> Cmd {
        let mut cmd = Cmd::new(&self.config.engine).args(["run", "--rm", "-i"]);
        if self.tty {
            cmd = cmd.arg("-t");
        }
        cmd = cmd.args(["--privileged", "--name", name]);
        if let Some(uid) = self.forwarded_uid {
            cmd = cmd.arg("-e").arg(format!("{}={}", SUDO_UID_ENV, uid));
        }
        cmd.arg("-v")
            .arg(format!(
                "{}:{}",
                self.config.engine_socket.display(),
                HELPER_ENGINE_SOCKET
            ))
            .arg("-v")
            .arg(format!(
                "{}:{}",
                mapping.host_context_dir.display(),
                CONTAINER_CONTEXT_MOUNT
            ))
            .arg("-v")
            .arg(format!(
                "{}:{}",
                mapping.host_output_dir.display(),
                CONTAINER_OUTPUT_MOUNT
            ))
            .args(["-w", HELPER_WORKDIR])
            .arg(self.config.helper_reference())
            .arg(SUBCOMMAND)
            .args(args)
            .allow_fail()
    }
}

#[async_trait]
impl EnvironmentExecutor for HelperExecutor {
    fn name(&self) -> &'static str {
        "helper"
    }

    async fn execute(&self, request: &BuildRequest) -> Result<Outcome, Error> {
        let mapping = PathMapping::translate(request, &self.cwd)?;
        let args = self.helper_args(request, &mapping);
        let name = format!("{}{}", HELPER_NAME_PREFIX, Uuid::new_v4());

        println!(
            "Privileged build not available here, running inside {}",
            self.config.helper_reference()
        );
        tracing::debug!(container = %name, ?args, "launching helper");

        let guard = HelperGuard::new(&self.config.engine, &name);
        let status = self
            .runner
            .run_interactive(self.command(&mapping, &args, &name))
            .await
            .map_err(|e| Error::HelperLaunchFailure {
                code: None,
                detail: format!("{:#}", e),
            })?;
        // The helper exited on its own; --rm has already removed it.
        guard.disarm();

        if status.success() {
            return Ok(Outcome::Delegated);
        }
        let detail = match status.code() {
            Some(code) => format!("{} exited with code {}", self.config.helper_reference(), code),
            None => format!("{} was terminated by a signal", self.config.helper_reference()),
        };
        Err(Error::HelperLaunchFailure {
            code: status.code(),
            detail,
        })
    }
}

/// Force-removes a helper container unless disarmed.
struct HelperGuard {
    engine: String,
    name: String,
    armed: bool,
}

impl HelperGuard {
    fn new(engine: &str, name: &str) -> Self {
        Self {
            engine: engine.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HelperGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("removing helper container {}", self.name);
        let removed = std::process::Command::new(&self.engine)
            .args(["rm", "-f"])
            .arg(&self.name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = removed {
            tracing::warn!("failed to remove helper container {}: {}", self.name, e);
        }
    }
}
