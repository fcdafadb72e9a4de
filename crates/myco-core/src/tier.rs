//! Rendering tiers and the one-shot capability probe result.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rendering tier, ordered from most to least capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Parallel compute dispatch with device-resident fields.
    GpuCompute,
    /// CPU simulation blitted through a 2D canvas.
    Canvas2d,
    /// Static layer only; no simulation runs.
    DomOnly,
}

impl Tier {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::GpuCompute => "gpu-compute",
            Self::Canvas2d => "canvas-2d",
            Self::DomOnly => "dom-only",
        }
    }

    /// The next tier down, if any. Tiers never upgrade.
    #[must_use]
    pub const fn degrade(self) -> Option<Self> {
        match self {
            Self::GpuCompute => Some(Self::Canvas2d),
            Self::Canvas2d => Some(Self::DomOnly),
            Self::DomOnly => None,
        }
    }

    #[must_use]
    pub const fn hosts_engine(self) -> bool {
        !matches!(self, Self::DomOnly)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" | "gpu-compute" | "webgpu" => Ok(Self::GpuCompute),
            "canvas" | "canvas-2d" | "cpu" => Ok(Self::Canvas2d),
            "dom" | "dom-only" | "none" => Ok(Self::DomOnly),
            _ => Err(ConfigError::Invalid("tier must be gpu, canvas or dom")),
        }
    }
}

/// Result of probing the host once at mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub gpu_compute: bool,
    pub canvas_2d: bool,
}

/// Highest tier the capabilities support.
#[must_use]
pub fn select_tier(caps: &Capabilities) -> Tier {
    if caps.gpu_compute {
        Tier::GpuCompute
    } else if caps.canvas_2d {
        Tier::Canvas2d
    } else {
        Tier::DomOnly
    }
}
