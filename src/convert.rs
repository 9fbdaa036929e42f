//! Boundary to the disk conversion engine.
//!
//! The engine that partitions the disk, installs the bootloader and
//! populates the filesystem lives outside this crate. The pipeline only
//! hands it a tagged image plus fully resolved [`ConversionOptions`] and
//! treats any error as fatal. Partial output is left in place.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;
use crate::image::TaggedImage;
use crate::process::{Cmd, ProcessRunner};
use crate::request::ConversionOptions;

/// Turns a tagged image into a bootable disk at `options.output`.
#[async_trait]
pub trait ImageConverter: Send + Sync {
    /// Returns the path of the written disk image.
    async fn convert(
        &self,
        image: &TaggedImage,
        options: &ConversionOptions,
    ) -> Result<PathBuf, Error>;
}

/// Drives the external conversion engine executable.
pub struct EngineConverter {
    runner: Arc<dyn ProcessRunner>,
    program: String,
}

impl EngineConverter {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    pub fn command(&self, image: &TaggedImage, options: &ConversionOptions) -> Cmd {
        let mut cmd = Cmd::new(&self.program)
            .args(["--image", image.tag(), "--output"])
            .arg_path(&options.output)
            .args(["--format", options.format.as_str()])
            .arg("--size")
            .arg(options.size_bytes.to_string());
        if let Some(ref password) = options.password {
            cmd = cmd.arg("--password").arg(password);
        }
        if let Some(ref extra) = options.cmdline_extra {
            cmd = cmd.arg("--append-to-cmdline").arg(extra);
        }
        if let Some(network_manager) = options.network_manager {
            cmd = cmd.args(["--network-manager", network_manager.as_str()]);
        }
        if options.raw {
            cmd = cmd.arg("--raw");
        }
        cmd.error_msg("disk conversion failed")
    }
}

#[async_trait]
impl ImageConverter for EngineConverter {
    async fn convert(
        &self,
        image: &TaggedImage,
        options: &ConversionOptions,
    ) -> Result<PathBuf, Error> {
        tracing::info!(
            tag = image.tag(),
            format = options.format.as_str(),
            size = options.size_bytes,
            "converting image to {}",
            options.output.display()
        );
        self.runner
            .run_streaming(self.command(image, options))
            .await
            .map_err(|e| Error::ConversionFailure {
                tag: image.tag().to_string(),
                output: options.output.clone(),
                detail: format!("{:#}", e),
            })?;
        Ok(options.output.clone())
    }
}
