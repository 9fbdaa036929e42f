//! Preflight command - verify the host can run builds.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::environment::{self, InvokingUserContext};
use crate::preflight::run_preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    config.print();
    println!();

    let report = run_preflight(config, environment::probe(), &InvokingUserContext::from_env());
    report.print();

    if strict && !report.all_passed() {
        bail!("{} preflight check(s) failed", report.fail_count());
    }
    Ok(())
}
