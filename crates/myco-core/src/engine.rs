//! The seam between the lifecycle manager and concrete simulation engines.

use crate::budget::FrameTiming;
use crate::compositor::{Compositor, PixelBuffer};
use crate::dla::DlaEngine;
use crate::error::{EngineError, InvariantViolation};
use crate::field::Field;
use crate::grid::GridSpec;
use crate::physarum::PhysarumEngine;
use crate::settings::{Algorithm, Settings};
use crate::tier::Tier;

/// Summary of one simulated frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frame: u64,
    /// Simulation steps run this frame.
    pub steps: u32,
    /// Occupied cells for DLA, lit cells for Physarum. GPU engines report 0
    /// because their fields never leave the device.
    pub occupied: usize,
    /// Detected but non-fatal degenerate state; the caller decides.
    pub violation: Option<InvariantViolation>,
}

/// A long-lived simulation bound to one grid.
///
/// Engines are built already allocated and seeded. A resize is a new engine.
pub trait SimulationEngine {
    fn algorithm(&self) -> Algorithm;

    fn tier(&self) -> Tier;

    fn grid(&self) -> GridSpec;

    /// Runs one frame of simulation work.
    fn advance(&mut self, timing: FrameTiming) -> Result<FrameStats, EngineError>;

    /// Host-visible presented field. `None` when the field lives on a device.
    fn front(&self) -> Option<&Field>;

    /// Presents device-resident output with the given compositor. Host-side
    /// engines leave presentation to the caller.
    fn present(&mut self, _compositor: &Compositor) -> Result<(), EngineError> {
        Ok(())
    }

    /// Reads the composited layer back to the host. Host-side engines return
    /// `None`; their caller paints [`SimulationEngine::front`] instead.
    fn capture(&mut self, _compositor: &Compositor) -> Result<Option<PixelBuffer>, EngineError> {
        Ok(None)
    }

    /// Releases every buffer. Later calls to `advance` fail with
    /// [`EngineError::Disposed`].
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Builds engines for one tier.
pub trait EngineFactory {
    fn tier(&self) -> Tier;

    fn build(
        &self,
        settings: &Settings,
        grid: GridSpec,
        compositor: &Compositor,
    ) -> Result<Box<dyn SimulationEngine>, EngineError>;
}

/// CPU engines presented through a 2D canvas.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuEngineFactory;

impl EngineFactory for CpuEngineFactory {
    fn tier(&self) -> Tier {
        Tier::Canvas2d
    }

    fn build(
        &self,
        settings: &Settings,
        grid: GridSpec,
        _compositor: &Compositor,
    ) -> Result<Box<dyn SimulationEngine>, EngineError> {
        let scaled = settings.scaled_for(Tier::Canvas2d);
        Ok(match scaled.algorithm {
            Algorithm::Dla => Box::new(DlaEngine::new(scaled, grid)?),
            Algorithm::Slime => Box::new(PhysarumEngine::new(scaled, grid)?),
        })
    }
}
