//! Build command - turns a Dockerfile into a bootable disk image.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::convert::{EngineConverter, ImageConverter};
use crate::environment::{self, Capability, InvokingUserContext};
use crate::error::Error;
use crate::executor::{EnvironmentExecutor, HelperExecutor, NativeExecutor, Outcome};
use crate::image;
use crate::paths::{self, PathMapping};
use crate::process::{ProcessRunner, SystemRunner};
use crate::request::{
    parse_build_arg, parse_size, BuildRequest, ConversionOptions, NetworkManager, OutputFormat,
    DEFAULT_DOCKERFILE, DEFAULT_OUTPUT, DEFAULT_SIZE,
};

/// Options of `d2vm build`.
#[derive(Debug, Clone, Args)]
#[command(after_help = formats_help())]
pub struct BuildOpts {
    /// Build context directory
    pub context: PathBuf,

    /// Name of the Dockerfile (default: <context>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Set build-time variables
    #[arg(long = "build-arg", value_name = "KEY=VALUE", value_parser = parse_build_arg)]
    pub build_args: Vec<String>,

    /// The output image, the extension determines the image format (raw if none)
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Optional root user password
    #[arg(short, long)]
    pub password: Option<String>,

    /// The output image size
    #[arg(short, long, default_value = DEFAULT_SIZE, value_parser = parse_size)]
    pub size: u64,

    /// Override output image
    #[arg(long)]
    pub force: bool,

    /// Extra kernel cmdline arguments to append to the generated one
    #[arg(long = "append-to-cmdline", value_name = "ARGS")]
    pub append_to_cmdline: Option<String>,

    /// Network manager to use for the image
    #[arg(long, value_enum)]
    pub network_manager: Option<NetworkManager>,

    /// Just convert the container to a virtual machine image without installing anything more
    #[arg(long)]
    pub raw: bool,
}

fn formats_help() -> String {
    let extensions: Vec<&str> = OutputFormat::EXTENSIONS.iter().map(|(ext, _)| *ext).collect();
    format!("Supported output extensions: {}", extensions.join(" "))
}

impl BuildOpts {
    pub fn into_request(self) -> BuildRequest {
        let non_empty = |s: Option<String>| s.filter(|v| !v.is_empty());
        let output = self.output;
        BuildRequest {
            dockerfile: self
                .file
                .unwrap_or_else(|| self.context.join(DEFAULT_DOCKERFILE)),
            context_dir: self.context,
            build_args: self.build_args,
            force: self.force,
            conversion: ConversionOptions {
                size_bytes: self.size,
                password: non_empty(self.password),
                cmdline_extra: non_empty(self.append_to_cmdline),
                network_manager: self.network_manager,
                raw: self.raw,
                ..ConversionOptions::new(output.clone())
            },
            output,
        }
    }
}

/// Composes probe, executor selection and execution.
pub struct Router {
    pub runner: Arc<dyn ProcessRunner>,
    pub converter: Arc<dyn ImageConverter>,
    pub config: Config,
    pub user: InvokingUserContext,
    pub cwd: PathBuf,
    pub verbosity: u8,
}

impl Router {
    /// Router backed by real processes and the process environment.
    pub fn from_env(config: Config, verbosity: u8) -> Result<Self, Error> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        let converter = Arc::new(EngineConverter::new(runner.clone(), config.converter.clone()));
        Ok(Self {
            runner,
            converter,
            config,
            user: InvokingUserContext::from_env(),
            cwd: paths::current_dir()?,
            verbosity,
        })
    }

    /// Pick the executor for a capability.
    pub fn select_executor(&self, capability: Capability) -> Box<dyn EnvironmentExecutor> {
        match capability {
            Capability::Native => Box::new(NativeExecutor::new(
                self.runner.clone(),
                self.converter.clone(),
                self.config.engine.clone(),
                self.user,
            )),
            Capability::NeedsHelper => Box::new(
                HelperExecutor::new(
                    self.runner.clone(),
                    self.config.clone(),
                    self.cwd.clone(),
                    // Under sudo the real uid is root; hand back to the invoker.
                    self.user.original_uid.or_else(environment::real_uid),
                )
                .with_verbosity(self.verbosity),
            ),
        }
    }

    /// Validate the request's paths, then run it on the selected executor.
    ///
    /// Both checks run before any external tool, whichever executor is
    /// picked.
    pub async fn run(&self, capability: Capability, request: &BuildRequest) -> Result<Outcome, Error> {
        let mapping = PathMapping::translate(request, &self.cwd)?;
        image::check_output(&mapping.host_output, request.force)?;

        let executor = self.select_executor(capability);
        tracing::debug!(executor = executor.name(), "selected executor");
        executor.execute(request).await
    }
}

/// Execute the build command.
pub async fn cmd_build(opts: BuildOpts, config: &Config, verbosity: u8) -> Result<()> {
    let request = opts.into_request();
    let router = Router::from_env(config.clone(), verbosity)?;

    match router.run(environment::probe(), &request).await? {
        Outcome::Built { image, output, owner } => {
            println!("\n=== Build Complete ===");
            println!("  Image:  {}", output.display());
            println!("  Format: {}", request.conversion.format);
            if let Some(uid) = owner {
                println!("  Owner:  uid {}", uid);
            }
            println!("  Intermediate image {} was kept", image);
        }
        Outcome::Delegated => {
            println!("Helper build finished: {}", request.output.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        opts: BuildOpts,
    }

    fn parse(args: &[&str]) -> BuildRequest {
        let mut argv = vec!["d2vm"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().opts.into_request()
    }

    #[test]
    fn test_defaults() {
        let request = parse(&["/home/u/app"]);
        assert_eq!(request.dockerfile, PathBuf::from("/home/u/app/Dockerfile"));
        assert_eq!(request.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(request.conversion.size_bytes, 10 * 1024 * 1024 * 1024);
        assert_eq!(request.conversion.format, OutputFormat::Qcow2);
        assert_eq!(request.conversion.network_manager, None);
        assert!(!request.force);
        assert!(!request.conversion.raw);
    }

    #[test]
    fn test_all_flags() {
        let request = parse(&[
            "-f", "ctx/Containerfile", "--build-arg", "A=1", "--build-arg", "B",
            "-o", "out/vm.vmdk", "-p", "root", "-s", "2G", "--force",
            "--append-to-cmdline", "console=ttyS0", "--network-manager", "netplan", "--raw", "ctx",
        ]);
        assert_eq!(request.context_dir, PathBuf::from("ctx"));
        assert_eq!(request.dockerfile, PathBuf::from("ctx/Containerfile"));
        assert_eq!(request.build_args, vec!["A=1", "B"]);
        assert_eq!(request.conversion.output, PathBuf::from("out/vm.vmdk"));
        assert_eq!(request.conversion.format, OutputFormat::Vmdk);
        assert_eq!(request.conversion.password.as_deref(), Some("root"));
        assert_eq!(request.conversion.size_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(request.conversion.cmdline_extra.as_deref(), Some("console=ttyS0"));
        assert_eq!(request.conversion.network_manager, Some(NetworkManager::Netplan));
        assert!(request.force);
        assert!(request.conversion.raw);
    }

    #[test]
    fn test_empty_password_is_none() {
        let request = parse(&["-p", "", "ctx"]);
        assert_eq!(request.conversion.password, None);
    }

    #[test]
    fn test_forwarded_args_reparse_to_same_request() {
        let outer = parse(&[
            "--password=-s3cret",
            "--append-to-cmdline=-quiet console=ttyS0",
            "--build-arg=-X=1",
            "--build-arg",
            "PLAIN",
            "-s",
            "2G",
            "-o",
            "vm.vmdk",
            "--network-manager",
            "ifupdown",
            "--raw",
            "--force",
            "app",
        ]);
        let mapping = PathMapping::translate(&outer, std::path::Path::new("/home/u")).unwrap();

        let mut argv = vec!["d2vm".to_string()];
        argv.extend(mapping.rewrite(&outer.tagged_args()));
        let inner = TestCli::try_parse_from(&argv)
            .unwrap_or_else(|e| panic!("{:?} did not parse: {}", argv, e))
            .opts
            .into_request();

        assert_eq!(inner.context_dir, PathBuf::from("/in"));
        assert_eq!(inner.dockerfile, PathBuf::from("/in/Dockerfile"));
        assert_eq!(inner.output, PathBuf::from("/out/vm.vmdk"));
        assert_eq!(inner.build_args, outer.build_args);
        assert_eq!(inner.force, outer.force);
        assert_eq!(
            inner.conversion,
            ConversionOptions {
                output: PathBuf::from("/out/vm.vmdk"),
                ..outer.conversion.clone()
            }
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(TestCli::try_parse_from(["d2vm", "-s", "lots", "ctx"]).is_err());
        assert!(TestCli::try_parse_from(["d2vm", "--network-manager", "wicked", "ctx"]).is_err());
        assert!(TestCli::try_parse_from(["d2vm", "--build-arg", "=x", "ctx"]).is_err());
        assert!(TestCli::try_parse_from(["d2vm"]).is_err());
    }
}
