//! Cache configuration for texture budgets and tile layout.
//!
//! Configuration can be loaded from a file, environment variables, or created
//! programmatically. Sizes are in bytes; the tile size is in pixels.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Configuration for the texture cache and the tiles drawing through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Soft ceiling on resident texture bytes
    pub texture_budget: usize,
    /// The ceiling is never halved below this many bytes
    pub texture_floor: usize,
    /// Nominal tile width in pixels
    pub tile_width: u32,
    /// Nominal tile height in pixels
    pub tile_height: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            texture_budget: Self::DEFAULT_TEXTURE_BUDGET,
            texture_floor: Self::DEFAULT_TEXTURE_FLOOR,
            tile_width: Self::DEFAULT_TILE_SIZE,
            tile_height: Self::DEFAULT_TILE_SIZE,
        }
    }
}

impl CacheConfig {
    /// Default soft ceiling: 200,000,000 bytes
    pub const DEFAULT_TEXTURE_BUDGET: usize = 200_000_000;
    /// Default floor: 100,000 bytes
    pub const DEFAULT_TEXTURE_FLOOR: usize = 100_000;
    /// Default tile edge: 512 pixels
    pub const DEFAULT_TILE_SIZE: u32 = 512;

    /// Sets the texture budget in bytes.
    pub fn with_texture_budget(mut self, bytes: usize) -> Self {
        self.texture_budget = bytes;
        self
    }

    /// Sets the texture floor in bytes.
    pub fn with_texture_floor(mut self, bytes: usize) -> Self {
        self.texture_floor = bytes;
        self
    }

    /// Sets the tile size in pixels.
    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Checks that the values can drive a cache.
    ///
    /// # Errors
    /// Returns an error if the floor is above the budget or the tile size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.texture_floor > self.texture_budget {
            return Err(ConfigError::FloorAboveBudget {
                floor: self.texture_floor,
                budget: self.texture_budget,
            });
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::InvalidValue("tile_size".to_string()));
        }
        Ok(())
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/rasterview/cache.toml
    /// - Linux: ~/.config/rasterview/cache.toml
    /// - Windows: %APPDATA%\rasterview\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rasterview").join("cache.toml")
        } else {
            PathBuf::from("rasterview-cache.toml")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RASTERVIEW_TEXTURE_BUDGET`: texture budget in bytes (default: 200000000)
    /// - `RASTERVIEW_TEXTURE_FLOOR`: texture floor in bytes (default: 100000)
    /// - `RASTERVIEW_TILE_SIZE`: tile edge in pixels (default: 512)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RASTERVIEW_TEXTURE_BUDGET") {
            config.texture_budget = parse_value("RASTERVIEW_TEXTURE_BUDGET", &val)?;
        }

        if let Ok(val) = std::env::var("RASTERVIEW_TEXTURE_FLOOR") {
            config.texture_floor = parse_value("RASTERVIEW_TEXTURE_FLOOR", &val)?;
        }

        if let Ok(val) = std::env::var("RASTERVIEW_TILE_SIZE") {
            let size = parse_value("RASTERVIEW_TILE_SIZE", &val)?;
            config.tile_width = size;
            config.tile_height = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// texture_budget = 200000000
    /// texture_floor = 100000
    /// tile_width = 512
    /// tile_height = 512
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "texture_budget" => config.texture_budget = parse_value(key, value)?,
                    "texture_floor" => config.texture_floor = parse_value(key, value)?,
                    "tile_width" => config.tile_width = parse_value(key, value)?,
                    "tile_height" => config.tile_height = parse_value(key, value)?,
                    "tile_size" => {
                        let size = parse_value(key, value)?;
                        config.tile_width = size;
                        config.tile_height = size;
                    }
                    _ => {}
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        format!(
            "# Raster View Texture Cache Configuration\n\
             texture_budget = {}\n\
             texture_floor = {}\n\
             tile_width = {}\n\
             tile_height = {}\n",
            self.texture_budget, self.texture_floor, self.tile_width, self.tile_height
        )
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// The floor would forbid the budget itself
    #[error("texture floor ({floor} bytes) is above the texture budget ({budget} bytes)")]
    FloorAboveBudget { floor: usize, budget: usize },
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
