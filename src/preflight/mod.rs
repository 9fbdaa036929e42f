//! Host readiness checks.
//!
//! What is required depends on the capability the probe reports: a native
//! build needs the engine and the conversion engine on this host, a helper
//! build only needs the engine CLI and its socket.

mod types;

pub use types::{CheckResult, CheckStatus, PreflightReport};

use std::path::Path;

use crate::config::Config;
use crate::environment::{Capability, InvokingUserContext};
use crate::process;

/// Run every check for the given capability.
pub fn run_preflight(
    config: &Config,
    capability: Capability,
    user: &InvokingUserContext,
) -> PreflightReport {
    let mut report = PreflightReport::default();

    report.checks.push(match capability {
        Capability::Native => CheckResult::pass_with("Execution mode", "native (Linux, root)"),
        Capability::NeedsHelper => CheckResult::pass_with(
            "Execution mode",
            format!("helper container {}", config.helper_reference()),
        ),
    });

    report.checks.push(check_tool(&config.engine, "Container engine", true));
    report.checks.push(check_socket(&config.engine_socket));

    if capability == Capability::Native {
        report
            .checks
            .push(check_tool(&config.converter, "Conversion engine", true));
        report.checks.push(match user.original_uid {
            Some(uid) => CheckResult::pass_with("Output owner", format!("restored to uid {}", uid)),
            None => CheckResult::warn(
                "Output owner",
                "SUDO_UID not set, images will stay owned by root",
            ),
        });
    }

    report
}

/// Check that `program` resolves in PATH.
pub fn check_tool(program: &str, name: &str, required: bool) -> CheckResult {
    if process::exists(program) {
        return CheckResult::pass_with(name, program);
    }
    let details = format!("'{}' not found in PATH", program);
    if required {
        CheckResult::fail(name, details)
    } else {
        CheckResult::warn(name, details)
    }
}

/// Check that the engine control socket exists.
pub fn check_socket(socket: &Path) -> CheckResult {
    if socket.exists() {
        CheckResult::pass_with("Engine socket", socket.display().to_string())
    } else {
        CheckResult::fail(
            "Engine socket",
            format!("{} not found - is the daemon running?", socket.display()),
        )
    }
}
