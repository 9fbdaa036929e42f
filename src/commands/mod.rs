//! CLI command handlers.
//!
//! - `build` - Build a VM disk image from a Dockerfile
//! - `preflight` - Check host readiness

pub mod build;
mod preflight;

pub use build::{cmd_build, BuildOpts};
pub use preflight::cmd_preflight;
