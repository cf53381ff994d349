// SPDX-License-Identifier: MIT
//! Packer and reader configuration
//!
//! Values come from defaults, `RESPACK_*` environment variables, or a TOML
//! file:
//!
//! ```toml
//! [packer]
//! checksums = true
//! parallel = true
//!
//! [packer.compression]
//! default_method = "lz4"
//! deflate_level = 6
//!
//! [reader]
//! eager_load_threshold = 16777216
//! runtime_version = 21
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::compression_strategy::{CompressionConfig, DefaultMethod};
use crate::error::{ContainerError, Result};

/// Default size below which the data region is read into memory
pub const DEFAULT_EAGER_LOAD_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default runtime version used for overlay lookups
pub const DEFAULT_RUNTIME_VERSION: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    pub compression: CompressionConfig,
    /// Record a content checksum in every entry
    pub checksums: bool,
    /// Compress batches on the rayon pool
    pub parallel: bool,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            checksums: true,
            parallel: true,
        }
    }
}

impl PackerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut compression = defaults.compression;

        if let Ok(method) = std::env::var("RESPACK_DEFAULT_METHOD") {
            compression.default_method = match method.to_ascii_lowercase().as_str() {
                "lz4" | "fast" => DefaultMethod::Lz4,
                _ => DefaultMethod::Deflate,
            };
        }
        compression.deflate_level = env_parse("RESPACK_DEFLATE_LEVEL", compression.deflate_level);
        compression.smart_detection =
            env_parse("RESPACK_SMART_DETECTION", compression.smart_detection);

        Self {
            compression,
            checksums: env_parse("RESPACK_CHECKSUMS", defaults.checksums),
            parallel: env_parse("RESPACK_PARALLEL", defaults.parallel),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.compression.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Data regions smaller than this are read eagerly; larger ones are mapped
    pub eager_load_threshold: u64,
    /// Runtime version used for versioned overlay lookups
    pub runtime_version: u32,
    /// Verify entry checksums on every read
    pub verify_checksums: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            eager_load_threshold: DEFAULT_EAGER_LOAD_THRESHOLD,
            runtime_version: DEFAULT_RUNTIME_VERSION,
            verify_checksums: true,
        }
    }
}

impl ReaderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            eager_load_threshold: env_parse(
                "RESPACK_EAGER_LOAD_THRESHOLD",
                defaults.eager_load_threshold,
            ),
            runtime_version: env_parse("RESPACK_RUNTIME_VERSION", defaults.runtime_version),
            verify_checksums: env_parse("RESPACK_VERIFY_CHECKSUMS", defaults.verify_checksums),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.eager_load_threshold > usize::MAX as u64 {
            return Err(ContainerError::config(
                "eager_load_threshold exceeds addressable memory",
            ));
        }
        Ok(())
    }
}

/// Complete configuration for the command line tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub packer: PackerConfig,
    pub reader: ReaderConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            packer: PackerConfig::from_env(),
            reader: ReaderConfig::from_env(),
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)
            .map_err(|e| ContainerError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source).map_err(|e| match e {
            ContainerError::Config(msg) => {
                ContainerError::config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.packer.validate()?;
        self.reader.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CompressionMethod;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reader.eager_load_threshold, 16 * 1024 * 1024);
        assert!(config.packer.checksums);
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [packer]
            checksums = false

            [packer.compression]
            default_method = "lz4"

            [reader]
            runtime_version = 21
            "#,
        )
        .unwrap();

        assert!(!config.packer.checksums);
        assert!(config.packer.parallel);
        assert_eq!(
            config.packer.compression.default_method.method(),
            CompressionMethod::FastBlock
        );
        assert_eq!(config.packer.compression.deflate_level, 6);
        assert_eq!(config.reader.runtime_version, 21);
        assert!(config.reader.verify_checksums);
    }

    #[test]
    fn test_invalid_toml_values() {
        let err = Config::from_toml_str("[packer.compression]\ndeflate_level = 42\n").unwrap_err();
        assert!(matches!(err, ContainerError::Config(_)));

        let err = Config::from_toml_str("[packer]\nchecksums = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ContainerError::Config(_)));
    }
}
