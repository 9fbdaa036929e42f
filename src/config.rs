//! Configuration management for d2vm.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Container engine CLI used for builds and the helper container.
pub const DEFAULT_ENGINE: &str = "docker";

/// Image providing the privileged helper environment.
pub const DEFAULT_HELPER_IMAGE: &str = "linkacloud/d2vm";

/// Tag of the helper image.
pub const DEFAULT_HELPER_VERSION: &str = "latest";

/// Conversion engine executable.
pub const DEFAULT_CONVERTER: &str = "d2vm-convert";

/// Engine control socket on the host.
#[cfg(windows)]
pub const DEFAULT_ENGINE_SOCKET: &str = "//var/run/docker.sock";
#[cfg(not(windows))]
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// d2vm configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Container engine CLI (D2VM_ENGINE)
    pub engine: String,
    /// Helper image repository (D2VM_HELPER_IMAGE)
    pub helper_image: String,
    /// Helper image tag (D2VM_HELPER_VERSION)
    pub helper_version: String,
    /// Host path of the engine control socket (D2VM_DOCKER_SOCKET)
    pub engine_socket: PathBuf,
    /// Conversion engine executable (D2VM_CONVERTER)
    pub converter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_vars(&HashMap::new())
    }
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env_vars.insert(key, value);
                            }
                            Err(e) => {
                                tracing::warn!("skipping bad line in {}: {}", env_path.display(), e)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("cannot read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(&env_vars)
    }

    /// Build config from already-merged variables, applying defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            engine: get("D2VM_ENGINE", DEFAULT_ENGINE),
            helper_image: get("D2VM_HELPER_IMAGE", DEFAULT_HELPER_IMAGE),
            helper_version: get("D2VM_HELPER_VERSION", DEFAULT_HELPER_VERSION),
            engine_socket: PathBuf::from(get("D2VM_DOCKER_SOCKET", DEFAULT_ENGINE_SOCKET)),
            converter: get("D2VM_CONVERTER", DEFAULT_CONVERTER),
        }
    }

    /// Full helper image reference (`image:version`).
    pub fn helper_reference(&self) -> String {
        format!("{}:{}", self.helper_image, self.helper_version)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  D2VM_ENGINE: {}", self.engine);
        println!("  D2VM_HELPER_IMAGE: {}", self.helper_reference());
        println!("  D2VM_DOCKER_SOCKET: {}", self.engine_socket.display());
        println!("  D2VM_CONVERTER: {}", self.converter);
    }
}
