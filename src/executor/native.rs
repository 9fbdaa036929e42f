//! In-process pipeline: build, convert, restore ownership.

use async_trait::async_trait;
use std::sync::Arc;

use super::{EnvironmentExecutor, Outcome};
use crate::convert::ImageConverter;
use crate::environment::InvokingUserContext;
use crate::error::Error;
use crate::image::ImageBuilder;
use crate::ownership;
use crate::process::ProcessRunner;
use crate::request::BuildRequest;
use crate::timing::Timer;

pub struct NativeExecutor {
    builder: ImageBuilder,
    converter: Arc<dyn ImageConverter>,
    engine: String,
    user: InvokingUserContext,
}

impl NativeExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        converter: Arc<dyn ImageConverter>,
        engine: impl Into<String>,
        user: InvokingUserContext,
    ) -> Self {
        let engine = engine.into();
        Self {
            builder: ImageBuilder::new(runner, engine.clone()),
            converter,
            engine,
            user,
        }
    }
}

#[async_trait]
impl EnvironmentExecutor for NativeExecutor {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn execute(&self, request: &BuildRequest) -> Result<Outcome, Error> {
        println!("Building image from {}", request.dockerfile.display());
        let t = Timer::start("Image build");
        let image = self.builder.build(request).await?;
        t.finish();

        println!(
            "Converting {} to {} ({})",
            image,
            request.conversion.output.display(),
            request.conversion.format
        );
        let t = Timer::start("Conversion");
        let output = self.converter.convert(&image, &request.conversion).await?;
        t.finish();

        let owner = ownership::fix_ownership(&output, &self.user)?;

        tracing::info!(
            tag = image.tag(),
            "intermediate image kept; remove it with `{} image rm {}`",
            self.engine,
            image
        );
        Ok(Outcome::Built {
            image,
            output,
            owner,
        })
    }
}
