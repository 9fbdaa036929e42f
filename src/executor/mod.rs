//! Where the pipeline runs.
//!
//! The capability probe picks one executor per invocation:
//! - `native` - build, convert and fix ownership in this process
//! - `helper` - relaunch the whole command inside a privileged container

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Error;
use crate::image::TaggedImage;
use crate::request::BuildRequest;

pub mod helper;
pub mod native;

pub use helper::HelperExecutor;
pub use native::NativeExecutor;

/// What an executor did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The image was built and converted here.
    Built {
        image: TaggedImage,
        output: PathBuf,
        /// uid the output was handed back to, if any.
        owner: Option<u32>,
    },
    /// The helper container ran the pipeline and exited successfully.
    Delegated,
}

#[async_trait]
pub trait EnvironmentExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, request: &BuildRequest) -> Result<Outcome, Error>;
}
