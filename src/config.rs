//! Configuration management for the object runtime
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (objects.toml)
//! - Environment variables (OBJECTS__*)
//!
//! ## Example config file (objects.toml):
//! ```toml
//! [registry]
//! namespace = "familiar.objects"
//! definitions = "./definitions"
//!
//! [compat]
//! strip_patch_on_mismatch = true
//! request_backport = true
//!
//! [logging]
//! filter = "familiar_objects=debug"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::DEFAULT_NAMESPACE;

/// Main configuration for the object runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectsConfig {
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Version negotiation settings
    #[serde(default)]
    pub compat: CompatConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Namespace expected on incoming envelopes
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory of declarative schema definitions to register at startup
    #[serde(default)]
    pub definitions: Option<PathBuf>,
}

/// How the serializer reacts to version mismatches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatConfig {
    /// Retry a failed decode with the patch component removed
    #[serde(default = "default_true")]
    pub strip_patch_on_mismatch: bool,

    /// Ask the executor for a backport when the sender is too new
    #[serde(default = "default_true")]
    pub request_backport: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            definitions: None,
        }
    }
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            strip_patch_on_mismatch: true,
            request_backport: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl ObjectsConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["objects.toml", ".objects.toml", "config/objects.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "objects") {
            let xdg_config = config_dir.config_dir().join("objects.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // OBJECTS__REGISTRY__NAMESPACE=...
        builder = builder.add_source(
            Environment::with_prefix("OBJECTS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Definitions directory, resolved against the working directory
    pub fn definitions_path(&self) -> Option<PathBuf> {
        self.registry.definitions.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                std::env::current_dir().unwrap_or_default().join(p)
            }
        })
    }
}
