//! Platform configuration parsed from the JSON blob handed to the manager.
//!
//! The blob is opaque to everything above the manager. Missing keys fall
//! back to defaults; an empty blob yields the default configuration.
//! Anything that does not parse or validate is a construction-time error.

use crate::{DomainError, DomainResult, Rectangle, ScreenResolution};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default upper bound on concurrently attached clients.
pub const DEFAULT_MAX_CLIENTS: usize = 32;

/// Default bound on a single blocking driver call, in milliseconds.
pub const DEFAULT_DRIVER_TIMEOUT_MS: u64 = 2_000;

/// Hard upper bound on `maxclients`.
const MAX_CLIENTS_LIMIT: usize = 256;

/// Secure video path mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SvpMode {
    /// No secure memory; clients may not request secure graphics.
    #[default]
    None,
    /// Secure video only.
    Regular,
    /// Secure video and graphics.
    Full,
}

impl SvpMode {
    /// Returns true if clients may be granted secure graphics memory.
    #[must_use]
    pub fn allows_secure_graphics(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Configuration of the display platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Output format applied when the server starts
    pub resolution: ScreenResolution,

    /// Board box mode (0 = board default)
    #[serde(rename = "boxmode")]
    pub box_mode: u32,

    /// Graphics heap size in MB (0 = board default)
    #[serde(rename = "graphicsheap")]
    pub graphics_heap_mb: u32,

    /// Secure video path mode
    pub svp: SvpMode,

    /// Framebuffer width; default client geometry width
    #[serde(rename = "framebufferwidth")]
    pub framebuffer_width: u32,

    /// Framebuffer height; default client geometry height
    #[serde(rename = "framebufferheight")]
    pub framebuffer_height: u32,

    /// Maximum concurrently attached clients
    #[serde(rename = "maxclients")]
    pub max_clients: usize,

    /// Bound on each blocking driver call, in milliseconds
    #[serde(rename = "timeout")]
    pub driver_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            resolution: ScreenResolution::R1080p60,
            box_mode: 0,
            graphics_heap_mb: 0,
            svp: SvpMode::None,
            framebuffer_width: 1920,
            framebuffer_height: 1080,
            max_clients: DEFAULT_MAX_CLIENTS,
            driver_timeout_ms: DEFAULT_DRIVER_TIMEOUT_MS,
        }
    }
}

impl PlatformConfig {
    /// Parses and validates a configuration blob.
    ///
    /// # Errors
    ///
    /// - `DomainError::ParseError` if the blob is not a valid configuration object
    /// - `DomainError::InvalidFieldValue` if a value is out of range
    pub fn parse(blob: &str) -> DomainResult<Self> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_json::from_str(blob).map_err(|e| DomainError::parse("configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// - `DomainError::ParseError` if the file cannot be read or parsed
    /// - `DomainError::InvalidFieldValue` if a value is out of range
    pub fn from_file(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let blob = std::fs::read_to_string(path)
            .map_err(|e| DomainError::parse(path.display().to_string(), e))?;
        Self::parse(&blob)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidFieldValue` naming the first bad field.
    pub fn validate(&self) -> DomainResult<()> {
        if self.framebuffer_width == 0 {
            return Err(DomainError::invalid(
                "framebufferwidth",
                self.framebuffer_width,
                "> 0",
            ));
        }
        if self.framebuffer_height == 0 {
            return Err(DomainError::invalid(
                "framebufferheight",
                self.framebuffer_height,
                "> 0",
            ));
        }
        if self.max_clients == 0 || self.max_clients > MAX_CLIENTS_LIMIT {
            return Err(DomainError::invalid(
                "maxclients",
                self.max_clients,
                format!("1..={MAX_CLIENTS_LIMIT}"),
            ));
        }
        if self.driver_timeout_ms == 0 {
            return Err(DomainError::invalid("timeout", self.driver_timeout_ms, "> 0"));
        }
        Ok(())
    }

    /// Geometry a newly attached client starts with.
    pub fn default_geometry(&self) -> Rectangle {
        Rectangle::full(self.framebuffer_width, self.framebuffer_height)
    }

    /// Bound on a single blocking driver call.
    pub fn driver_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_timeout_ms)
    }
}
