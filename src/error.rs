//! Pipeline error taxonomy.
//!
//! Each variant names the stage that failed. Variants wrapping an external
//! tool carry its diagnostic text in `detail`.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when a failure carries no more specific code.
pub const FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Dockerfile {} must be inside the context directory {}",
        dockerfile.display(),
        context.display()
    )]
    InvalidDockerfileLocation { dockerfile: PathBuf, context: PathBuf },

    #[error("{} already exists (use --force to overwrite)", .0.display())]
    OutputExists(PathBuf),

    #[error("failed to build image {tag}: {detail}")]
    BuildFailure { tag: String, detail: String },

    #[error("failed to convert {tag} to {}: {detail}", output.display())]
    ConversionFailure {
        tag: String,
        output: PathBuf,
        detail: String,
    },

    #[error("failed to change owner of {} to uid {uid}: {detail}", path.display())]
    OwnershipFixFailure {
        path: PathBuf,
        uid: u32,
        detail: String,
    },

    #[error("failed to resolve {what} path {}: {detail}", path.display())]
    PathResolutionFailure {
        what: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("helper environment failed: {detail}")]
    HelperLaunchFailure { code: Option<i32>, detail: String },
}

impl Error {
    /// Process exit code for this failure.
    ///
    /// A helper that exited non-zero hands its own code back verbatim.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::HelperLaunchFailure {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => FAILURE_EXIT_CODE,
        }
    }
}
