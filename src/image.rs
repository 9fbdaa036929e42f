//! Building the uniquely tagged intermediate image.
//!
//! The tagged image is not removed after conversion. Its tag is logged so
//! the operator can delete it with `<engine> image rm <tag>`.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Error;
use crate::process::{Cmd, ProcessRunner};
use crate::request::BuildRequest;

/// Prefix shared by every image this tool builds.
pub const TAG_PREFIX: &str = "d2vm-";

/// A disposable image built for exactly one build/convert cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaggedImage {
    tag: String,
}

impl TaggedImage {
    /// Fresh tag: [`TAG_PREFIX`] followed by a random UUID.
    pub fn generate() -> Self {
        Self {
            tag: format!("{}{}", TAG_PREFIX, Uuid::new_v4()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for TaggedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// Refuse to clobber an existing output unless `--force` was given.
///
/// Anything at the path counts, including dangling symlinks. A path whose
/// existence cannot be determined is treated as a resolution failure.
pub fn check_output(output: &Path, force: bool) -> Result<(), Error> {
    if force {
        return Ok(());
    }
    match fs::symlink_metadata(output) {
        Ok(_) => Err(Error::OutputExists(output.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::PathResolutionFailure {
            what: "output",
            path: output.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

/// Runs `<engine> image build` for a request.
pub struct ImageBuilder {
    runner: Arc<dyn ProcessRunner>,
    engine: String,
}

impl ImageBuilder {
    pub fn new(runner: Arc<dyn ProcessRunner>, engine: impl Into<String>) -> Self {
        Self {
            runner,
            engine: engine.into(),
        }
    }

    /// The engine invocation that builds `image` from `request`.
    pub fn build_command(&self, request: &BuildRequest, image: &TaggedImage) -> Cmd {
        let mut cmd = Cmd::new(&self.engine)
            .args(["image", "build", "-t", image.tag(), "-f"])
            .arg_path(&request.dockerfile);
        for build_arg in &request.build_args {
            cmd = cmd.arg("--build-arg").arg(build_arg);
        }
        cmd.arg_path(&request.context_dir)
            .error_msg(format!("{} image build failed", self.engine))
    }

    /// Check the output, then build a freshly tagged image.
    pub async fn build(&self, request: &BuildRequest) -> Result<TaggedImage, Error> {
        check_output(&request.output, request.force)?;
        if !request.dockerfile.is_file() {
            return Err(Error::PathResolutionFailure {
                what: "Dockerfile",
                path: request.dockerfile.clone(),
                detail: "no such file".to_string(),
            });
        }

        let image = TaggedImage::generate();
        tracing::info!(tag = image.tag(), "building image from {}", request.dockerfile.display());

        self.runner
            .run_streaming(self.build_command(request, &image))
            .await
            .map_err(|e| Error::BuildFailure {
                tag: image.tag().to_string(),
                detail: format!("{:#}", e),
            })?;

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SystemRunner;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn test_tags_are_unique_and_prefixed() {
        let tags: HashSet<_> = (0..1000).map(|_| TaggedImage::generate()).collect();
        assert_eq!(tags.len(), 1000);
        assert!(tags.iter().all(|t| t.tag().starts_with(TAG_PREFIX)));
    }

    #[test]
    fn test_build_command_layout() {
        let builder = ImageBuilder::new(Arc::new(SystemRunner), "docker");
        let mut request = BuildRequest::new(PathBuf::from("/ctx"), None, PathBuf::from("vm.raw"));
        request.build_args = vec!["A=1".into(), "B".into()];
        let image = TaggedImage::generate();

        let cmd = builder.build_command(&request, &image);
        assert_eq!(cmd.program(), "docker");
        assert_eq!(
            cmd.get_args(),
            [
                "image",
                "build",
                "-t",
                image.tag(),
                "-f",
                "/ctx/Dockerfile",
                "--build-arg",
                "A=1",
                "--build-arg",
                "B",
                "/ctx",
            ]
        );
    }

    #[test]
    fn test_check_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vm.raw");

        assert!(check_output(&output, false).is_ok());

        fs::write(&output, b"old image").unwrap();
        assert!(matches!(check_output(&output, false), Err(Error::OutputExists(_))));
        assert!(check_output(&output, true).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_counts_as_existing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("vm.raw");
        std::os::unix::fs::symlink(dir.path().join("missing"), &output).unwrap();

        assert!(matches!(check_output(&output, false), Err(Error::OutputExists(_))));
    }

    #[tokio::test]
    async fn test_missing_dockerfile_fails_before_build() {
        let dir = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(dir.path().to_path_buf(), None, dir.path().join("vm.raw"));
        // `false` would fail the build; the missing file must be reported first.
        let builder = ImageBuilder::new(Arc::new(SystemRunner), "false");

        let err = builder.build(&request).await.unwrap_err();
        assert!(matches!(err, Error::PathResolutionFailure { what: "Dockerfile", .. }));
    }
}
