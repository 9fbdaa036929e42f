//! The immutable description of one build invocation.
//!
//! A [`BuildRequest`] is assembled once from validated command-line input
//! and handed by reference to every pipeline component.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::paths::TaggedArg;

/// Build file name used when `-f` is not given.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Output image used when `-o` is not given.
pub const DEFAULT_OUTPUT: &str = "disk0.qcow2";

/// Output disk capacity used when `-s` is not given.
pub const DEFAULT_SIZE: &str = "10G";

/// Network integration strategy written into the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkManager {
    None,
    Netplan,
    Ifupdown,
}

impl NetworkManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkManager::None => "none",
            NetworkManager::Netplan => "netplan",
            NetworkManager::Ifupdown => "ifupdown",
        }
    }
}

impl fmt::Display for NetworkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disk image format, named the way qemu-img names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Raw,
    Qcow2,
    Qed,
    Vdi,
    Vpc,
    Vhdx,
    Vmdk,
}

impl OutputFormat {
    /// Recognised output file extensions.
    pub const EXTENSIONS: &'static [(&'static str, OutputFormat)] = &[
        ("raw", OutputFormat::Raw),
        ("img", OutputFormat::Raw),
        ("qcow2", OutputFormat::Qcow2),
        ("qed", OutputFormat::Qed),
        ("vdi", OutputFormat::Vdi),
        ("vhd", OutputFormat::Vpc),
        ("vhdx", OutputFormat::Vhdx),
        ("vmdk", OutputFormat::Vmdk),
    ];

    /// Infer the format from the output extension; raw when unrecognised.
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return OutputFormat::Raw;
        };
        let ext = ext.to_ascii_lowercase();
        Self::EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, format)| *format)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Qcow2 => "qcow2",
            OutputFormat::Qed => "qed",
            OutputFormat::Vdi => "vdi",
            OutputFormat::Vpc => "vpc",
            OutputFormat::Vhdx => "vhdx",
            OutputFormat::Vmdk => "vmdk",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the conversion engine needs to turn an image into a disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub size_bytes: u64,
    pub password: Option<String>,
    pub cmdline_extra: Option<String>,
    /// `None` lets the conversion engine pick per distribution.
    pub network_manager: Option<NetworkManager>,
    pub raw: bool,
    pub output: PathBuf,
    pub format: OutputFormat,
}

impl ConversionOptions {
    /// Options with defaults for everything but the output path.
    pub fn new(output: PathBuf) -> Self {
        let format = OutputFormat::from_path(&output);
        Self {
            size_bytes: 10 * GIB,
            password: None,
            cmdline_extra: None,
            network_manager: None,
            raw: false,
            output,
            format,
        }
    }
}

/// One `build` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Context directory exactly as given on the command line.
    pub context_dir: PathBuf,
    /// Build file; `<context>/Dockerfile` when `-f` was omitted.
    pub dockerfile: PathBuf,
    pub output: PathBuf,
    /// `KEY=VALUE` (or bare `KEY`) build-time variables.
    pub build_args: Vec<String>,
    pub force: bool,
    pub conversion: ConversionOptions,
}

impl BuildRequest {
    /// Request with default conversion options.
    pub fn new(context_dir: PathBuf, dockerfile: Option<PathBuf>, output: PathBuf) -> Self {
        let dockerfile = dockerfile.unwrap_or_else(|| context_dir.join(DEFAULT_DOCKERFILE));
        Self {
            conversion: ConversionOptions::new(output.clone()),
            context_dir,
            dockerfile,
            output,
            build_args: Vec::new(),
            force: false,
        }
    }

    /// The `build` sub-command arguments that reproduce this request,
    /// each tagged with the field it came from.
    ///
    /// The build file and output are always spelled out so the helper
    /// never falls back to defaults relative to its own working directory.
    /// Values travel as `--flag=value`, whatever they start with.
    pub fn tagged_args(&self) -> Vec<TaggedArg> {
        let mut args = vec![
            TaggedArg::build_file(&self.dockerfile).with_flag("--file"),
            TaggedArg::output(&self.output).with_flag("--output"),
            TaggedArg::option("--size", self.conversion.size_bytes.to_string()),
        ];
        for build_arg in &self.build_args {
            args.push(TaggedArg::option("--build-arg", build_arg));
        }
        if let Some(ref password) = self.conversion.password {
            args.push(TaggedArg::option("--password", password));
        }
        if let Some(ref extra) = self.conversion.cmdline_extra {
            args.push(TaggedArg::option("--append-to-cmdline", extra));
        }
        if let Some(network_manager) = self.conversion.network_manager {
            args.push(TaggedArg::option("--network-manager", network_manager.as_str()));
        }
        if self.conversion.raw {
            args.push(TaggedArg::other("--raw"));
        }
        if self.force {
            args.push(TaggedArg::other("--force"));
        }
        args.push(TaggedArg::context(&self.context_dir));
        args
    }
}

// =============================================================================
// Argument parsing helpers
// =============================================================================

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Parse a human readable size ("10G", "512MiB", "2t", "1048576") into bytes.
///
/// Suffixes are binary multiples; a bare number is a byte count.
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        bail!("size cannot be empty");
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "ki" | "kib" => KIB,
        "m" | "mb" | "mi" | "mib" => MIB,
        "g" | "gb" | "gi" | "gib" => GIB,
        "t" | "tb" | "ti" | "tib" => TIB,
        other => bail!("unknown size unit '{}' in '{}'", other, input),
    };

    let number: f64 = number
        .parse()
        .with_context(|| format!("invalid number in size '{}'", input))?;
    let bytes = number * multiplier as f64;
    if bytes < 1.0 || bytes >= u64::MAX as f64 {
        bail!("size '{}' is out of range", input);
    }
    Ok(bytes as u64)
}

/// Validate a `--build-arg` value: `KEY=VALUE` or a bare `KEY`.
pub fn parse_build_arg(input: &str) -> Result<String> {
    let key = input.split_once('=').map_or(input, |(key, _)| key);
    if key.is_empty() {
        bail!("build argument '{}' has an empty name", input);
    }
    if key.chars().any(char::is_whitespace) {
        bail!("build argument name '{}' contains whitespace", key);
    }
    Ok(input.to_string())
}
