use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Broken runtime invariants. Depending on [`crate::InvariantMode`] these halt
/// the backdrop or are logged and tolerated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("field holds {actual} cells but a {width}x{height} grid needs {expected}")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("theme colour token is missing or empty")]
    MissingThemeColor,
    #[error("aggregate has no occupied cells at frame {frame}")]
    EmptyAggregate { frame: u64 },
    #[error("grid fully occupied for {frames} consecutive frames")]
    SaturatedGrid { frames: u64 },
    #[error("grid {width}x{height} exceeds the 16-bit packed walker range")]
    GridTooLarge { width: u32, height: u32 },
}

/// Failures surfaced by engine construction and stepping.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("device error: {0}")]
    Device(String),
    #[error("engine has been disposed")]
    Disposed,
}
