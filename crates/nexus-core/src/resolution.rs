//! Display output resolution formats.

use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output format of the primary display.
///
/// Serialized as the short label used in platform configuration
/// (e.g. `"1080p60"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScreenResolution {
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "480i")]
    R480i,
    #[serde(rename = "480p")]
    R480p,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "720p50")]
    R720p50,
    #[serde(rename = "1080p24")]
    R1080p24,
    #[serde(rename = "1080i")]
    R1080i,
    #[serde(rename = "1080p50")]
    R1080p50,
    #[serde(rename = "1080p60")]
    R1080p60,
    #[serde(rename = "2160p50")]
    R2160p50,
    #[serde(rename = "2160p60")]
    R2160p60,
}

impl ScreenResolution {
    /// Every format, `Unknown` first.
    pub const ALL: [ScreenResolution; 11] = [
        Self::Unknown,
        Self::R480i,
        Self::R480p,
        Self::R720p,
        Self::R720p50,
        Self::R1080p24,
        Self::R1080i,
        Self::R1080p50,
        Self::R1080p60,
        Self::R2160p50,
        Self::R2160p60,
    ];

    /// Returns the configuration label for this format.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::R480i => "480i",
            Self::R480p => "480p",
            Self::R720p => "720p",
            Self::R720p50 => "720p50",
            Self::R1080p24 => "1080p24",
            Self::R1080i => "1080i",
            Self::R1080p50 => "1080p50",
            Self::R1080p60 => "1080p60",
            Self::R2160p50 => "2160p50",
            Self::R2160p60 => "2160p60",
        }
    }

    /// Returns the (width, height) in pixels, or `None` for `Unknown`.
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::Unknown => None,
            Self::R480i | Self::R480p => Some((720, 480)),
            Self::R720p | Self::R720p50 => Some((1280, 720)),
            Self::R1080p24 | Self::R1080i | Self::R1080p50 | Self::R1080p60 => {
                Some((1920, 1080))
            }
            Self::R2160p50 | Self::R2160p60 => Some((3840, 2160)),
        }
    }

    /// Returns true for every format except `Unknown`.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ScreenResolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.label() == wanted)
            .ok_or_else(|| DomainError::invalid("resolution", s, "a format such as 1080p60"))
    }
}
