//! Host to helper-container path translation.
//!
//! The helper container sees the build context at [`CONTAINER_CONTEXT_MOUNT`]
//! and the directory holding the output image at [`CONTAINER_OUTPUT_MOUNT`].
//! Arguments forwarded to the helper are rewritten by where they came from,
//! never by their text, so an unrelated value that happens to spell a path
//! (a build arg, a password) is passed through untouched.

use std::path::{Component, Path, PathBuf};

use crate::error::Error;
use crate::request::BuildRequest;

/// Mount point of the build context inside the helper.
pub const CONTAINER_CONTEXT_MOUNT: &str = "/in";

/// Mount point of the output directory inside the helper.
pub const CONTAINER_OUTPUT_MOUNT: &str = "/out";

/// The logical field an argument originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOrigin {
    Context,
    BuildFile,
    Output,
    Other,
}

/// A command-line token together with its origin.
///
/// With a `flag` the token renders as `--flag=value`, so a value that starts
/// with `-` is never mistaken for another option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedArg {
    pub origin: ArgOrigin,
    pub flag: Option<&'static str>,
    pub value: String,
}

impl TaggedArg {
    fn new(origin: ArgOrigin, value: impl Into<String>) -> Self {
        Self {
            origin,
            flag: None,
            value: value.into(),
        }
    }

    pub fn other(value: impl Into<String>) -> Self {
        Self::new(ArgOrigin::Other, value)
    }

    /// `--flag=value` for a value that needs no rewriting.
    pub fn option(flag: &'static str, value: impl Into<String>) -> Self {
        Self::other(value).with_flag(flag)
    }

    pub fn context(path: &Path) -> Self {
        Self::new(ArgOrigin::Context, path.to_string_lossy())
    }

    pub fn build_file(path: &Path) -> Self {
        Self::new(ArgOrigin::BuildFile, path.to_string_lossy())
    }

    pub fn output(path: &Path) -> Self {
        Self::new(ArgOrigin::Output, path.to_string_lossy())
    }

    pub fn with_flag(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }

    fn render(&self, value: &str) -> String {
        match self.flag {
            Some(flag) => format!("{}={}", flag, value),
            None => value.to_string(),
        }
    }
}

/// Where the host paths of a request live on both sides of the helper boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub host_context_dir: PathBuf,
    pub host_dockerfile: PathBuf,
    pub host_output: PathBuf,
    pub host_output_dir: PathBuf,
    pub container_dockerfile: PathBuf,
    pub container_output: PathBuf,
}

impl PathMapping {
    /// Translate the request's paths, resolving relative ones against `cwd`.
    ///
    /// Pure: touches neither the filesystem nor the process state.
    pub fn translate(request: &BuildRequest, cwd: &Path) -> Result<Self, Error> {
        require_utf8("context", &request.context_dir)?;
        require_utf8("Dockerfile", &request.dockerfile)?;
        require_utf8("output", &request.output)?;
        require_utf8("working directory", cwd)?;

        let host_context_dir = absolutize(&request.context_dir, cwd);
        let host_dockerfile = absolutize(&request.dockerfile, cwd);
        let host_output = absolutize(&request.output, cwd);

        let relative = match host_dockerfile.strip_prefix(&host_context_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => {
                return Err(Error::InvalidDockerfileLocation {
                    dockerfile: host_dockerfile,
                    context: host_context_dir,
                })
            }
        };

        let (host_output_dir, output_name) = match (host_output.parent(), host_output.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
            _ => {
                return Err(Error::PathResolutionFailure {
                    what: "output",
                    path: request.output.clone(),
                    detail: "output must name a file".to_string(),
                })
            }
        };

        Ok(Self {
            container_dockerfile: Path::new(CONTAINER_CONTEXT_MOUNT).join(relative),
            container_output: Path::new(CONTAINER_OUTPUT_MOUNT).join(output_name),
            host_context_dir,
            host_dockerfile,
            host_output,
            host_output_dir,
        })
    }

    /// Rewrite arguments by origin, preserving order.
    pub fn rewrite(&self, args: &[TaggedArg]) -> Vec<String> {
        args.iter()
            .map(|arg| match arg.origin {
                ArgOrigin::Context => arg.render(CONTAINER_CONTEXT_MOUNT),
                ArgOrigin::BuildFile => arg.render(&self.container_dockerfile.to_string_lossy()),
                ArgOrigin::Output => arg.render(&self.container_output.to_string_lossy()),
                ArgOrigin::Other => arg.render(&arg.value),
            })
            .collect()
    }
}

/// The current working directory, as a pipeline error on failure.
pub fn current_dir() -> Result<PathBuf, Error> {
    std::env::current_dir().map_err(|e| Error::PathResolutionFailure {
        what: "working directory",
        path: PathBuf::from("."),
        detail: e.to_string(),
    })
}

/// Engine CLIs take UTF-8 arguments; anything else would be mangled.
pub fn require_utf8<'a>(what: &'static str, path: &'a Path) -> Result<&'a str, Error> {
    path.to_str().ok_or_else(|| Error::PathResolutionFailure {
        what,
        path: path.to_path_buf(),
        detail: "path is not valid UTF-8".to_string(),
    })
}

/// Make `path` absolute against `cwd` and lexically normalise it
/// (`.` dropped, `..` folded) without consulting the filesystem.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
