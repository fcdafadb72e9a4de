//! Mount, resize and teardown of one backdrop layer.
//!
//! A [`Backdrop`] owns exactly one engine at a time. Any change of grid
//! dimensions throws the engine away and builds a new one from scratch; no
//! simulation state is migrated. Hosts that do asynchronous work (GPU device
//! requests, readbacks) take a [`Generation`] ticket first and drop the result
//! if the ticket went stale in the meantime.

use tracing::{error, info, warn};

use crate::budget::FrameTiming;
use crate::compositor::{Compositor, PixelBuffer, ThemeColor};
use crate::engine::{CpuEngineFactory, EngineFactory, FrameStats, SimulationEngine};
use crate::error::{EngineError, InvariantViolation};
use crate::grid::{GridSpec, Viewport};
use crate::invariants::InvariantGuard;
use crate::settings::Settings;
use crate::tier::{Capabilities, Tier, select_tier};

/// Monotonic token identifying one allocation of a backdrop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackdropState {
    Unmounted,
    Running,
    /// Stopped by an enforced invariant; frames are skipped until unmount.
    Halted(InvariantViolation),
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    Reallocated { from: GridSpec, to: GridSpec },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing ran: not mounted, halted, disposed, or DOM-only.
    Skipped,
    Presented(FrameStats),
}

pub struct Backdrop {
    settings: Settings,
    tier: Tier,
    factory: Option<Box<dyn EngineFactory>>,
    fallback: Option<Box<dyn EngineFactory>>,
    compositor: Compositor,
    guard: InvariantGuard,
    engine: Option<Box<dyn SimulationEngine>>,
    pixels: Option<PixelBuffer>,
    viewport: Option<Viewport>,
    grid: Option<GridSpec>,
    generation: u64,
    state: BackdropState,
}

impl Backdrop {
    /// A backdrop rendered by `factory`, or a DOM-only layer when `None`.
    pub fn new(
        settings: Settings,
        color: ThemeColor,
        factory: Option<Box<dyn EngineFactory>>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let tier = factory.as_ref().map_or(Tier::DomOnly, |f| f.tier());
        Ok(Self {
            compositor: Compositor::for_settings(&settings, color),
            guard: InvariantGuard::new(settings.invariants),
            settings,
            tier,
            factory,
            fallback: None,
            engine: None,
            pixels: None,
            viewport: None,
            grid: None,
            generation: 0,
            state: BackdropState::Unmounted,
        })
    }

    /// Picks the tier from one capability probe. `gpu` is the factory used
    /// when compute is available; the canvas tier backs it up once.
    pub fn from_capabilities(
        settings: Settings,
        color: ThemeColor,
        caps: Capabilities,
        gpu: Option<Box<dyn EngineFactory>>,
    ) -> Result<Self, EngineError> {
        let tier = select_tier(&caps);
        let canvas = || Box::new(CpuEngineFactory) as Box<dyn EngineFactory>;
        let backdrop = match (tier, gpu) {
            (Tier::GpuCompute, Some(gpu)) => {
                let backdrop = Self::new(settings, color, Some(gpu))?;
                if caps.canvas_2d {
                    backdrop.with_fallback(canvas())
                } else {
                    backdrop
                }
            }
            (Tier::DomOnly, _) => Self::new(settings, color, None)?,
            (_, _) if caps.canvas_2d => Self::new(settings, color, Some(canvas()))?,
            (_, _) => Self::new(settings, color, None)?,
        };
        info!(tier = %backdrop.tier, ?caps, "render tier selected");
        Ok(backdrop)
    }

    /// Factory tried once if the primary factory fails to build an engine.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Box<dyn EngineFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub const fn grid(&self) -> Option<GridSpec> {
        self.grid
    }

    #[must_use]
    pub const fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    #[must_use]
    pub const fn state(&self) -> &BackdropState {
        &self.state
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    #[must_use]
    pub fn engine(&self) -> Option<&dyn SimulationEngine> {
        self.engine.as_deref()
    }

    /// Latest composited frame on the canvas tier.
    #[must_use]
    pub fn pixels(&self) -> Option<&PixelBuffer> {
        self.pixels.as_ref()
    }

    #[must_use]
    pub const fn ticket(&self) -> Generation {
        Generation(self.generation)
    }

    /// Whether work started under `ticket` may still be applied.
    #[must_use]
    pub fn is_current(&self, ticket: Generation) -> bool {
        ticket.0 == self.generation && self.state == BackdropState::Running
    }

    /// Allocates and seeds an engine for the viewport.
    pub fn mount(&mut self, viewport: Viewport) -> Result<Generation, EngineError> {
        self.release_engine();
        let grid = self.grid_for(viewport);
        self.viewport = Some(viewport);
        self.generation += 1;
        self.allocate(grid)?;
        self.state = BackdropState::Running;
        info!(
            tier = %self.tier,
            algorithm = %self.settings.algorithm,
            width = grid.width(),
            height = grid.height(),
            generation = self.generation,
            "backdrop mounted"
        );
        Ok(self.ticket())
    }

    /// Rebuilds the engine when the grid dimensions change.
    pub fn resize(&mut self, viewport: Viewport) -> Result<ResizeOutcome, EngineError> {
        if self.state != BackdropState::Running {
            return Ok(ResizeOutcome::Unchanged);
        }
        let to = self.grid_for(viewport);
        self.viewport = Some(viewport);
        let from = match self.grid {
            Some(from) if from == to => return Ok(ResizeOutcome::Unchanged),
            Some(from) => from,
            None => to,
        };
        self.release_engine();
        self.generation += 1;
        if let Err(err) = self.allocate(to) {
            self.state = BackdropState::Unmounted;
            return Err(err);
        }
        info!(
            from_width = from.width(),
            from_height = from.height(),
            to_width = to.width(),
            to_height = to.height(),
            generation = self.generation,
            "backdrop reallocated"
        );
        Ok(ResizeOutcome::Reallocated { from, to })
    }

    /// Replaces the settings and reseeds a mounted engine.
    pub fn reconfigure(&mut self, settings: Settings) -> Result<(), EngineError> {
        settings.validate()?;
        self.compositor.set_opacity(settings.opacity);
        self.compositor
            .set_mapping(settings.algorithm.alpha_mapping());
        self.guard = InvariantGuard::new(settings.invariants);
        self.settings = settings;
        let Some(viewport) = self.viewport else {
            return Ok(());
        };
        if !matches!(self.state, BackdropState::Running) {
            return Ok(());
        }
        self.release_engine();
        self.generation += 1;
        let grid = self.grid_for(viewport);
        if let Err(err) = self.allocate(grid) {
            self.state = BackdropState::Unmounted;
            return Err(err);
        }
        info!(
            algorithm = %self.settings.algorithm,
            generation = self.generation,
            "backdrop reconfigured"
        );
        Ok(())
    }

    /// Opacity changes apply from the next frame without reseeding.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.settings.set_opacity(opacity);
        self.compositor.set_opacity(self.settings.opacity);
    }

    /// Advances the engine one frame and presents the result.
    pub fn frame(&mut self, timing: FrameTiming) -> Result<FrameOutcome, EngineError> {
        if self.state != BackdropState::Running {
            return Ok(FrameOutcome::Skipped);
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(FrameOutcome::Skipped);
        };
        if engine.is_disposed() {
            return Ok(FrameOutcome::Skipped);
        }
        let stats = match engine.advance(timing) {
            Ok(stats) => stats,
            Err(EngineError::Invariant(violation)) => {
                self.tolerate(violation)?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };
        if let Some(violation) = stats.violation.clone() {
            self.tolerate(violation)?;
        }

        let painted = match (self.engine.as_mut(), self.pixels.as_mut()) {
            (Some(engine), Some(pixels)) => match engine.front() {
                Some(front) => self.compositor.paint(front, pixels),
                None => Ok(()),
            },
            (Some(engine), None) => {
                engine.present(&self.compositor)?;
                Ok(())
            }
            (None, _) => Ok(()),
        };
        if let Err(violation) = painted {
            self.tolerate(violation)?;
            return Ok(FrameOutcome::Skipped);
        }
        Ok(FrameOutcome::Presented(stats))
    }

    /// Composited layer as host pixels, from whichever tier is active.
    pub fn capture(&mut self) -> Result<Option<PixelBuffer>, EngineError> {
        if let Some(pixels) = &self.pixels {
            return Ok(Some(pixels.clone()));
        }
        match self.engine.as_mut() {
            Some(engine) if !engine.is_disposed() => engine.capture(&self.compositor),
            _ => Ok(None),
        }
    }

    /// Disposes the engine and releases every buffer. Later frames are no-ops.
    pub fn unmount(&mut self) {
        if self.state == BackdropState::Disposed {
            return;
        }
        self.release_engine();
        self.grid = None;
        self.generation += 1;
        self.state = BackdropState::Disposed;
        info!(generation = self.generation, "backdrop unmounted");
    }

    fn grid_for(&self, viewport: Viewport) -> GridSpec {
        GridSpec::from_viewport(
            viewport,
            self.settings.device_pixel_ratio_cap,
            self.settings.grid_align,
        )
    }

    fn release_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.dispose();
        }
        self.pixels = None;
    }

    fn allocate(&mut self, grid: GridSpec) -> Result<(), EngineError> {
        self.grid = Some(grid);
        let Some(factory) = self.factory.as_ref() else {
            return Ok(());
        };
        let engine = match factory.build(&self.settings, grid, &self.compositor) {
            Ok(engine) => engine,
            Err(err) => {
                let Some(fallback) = self.fallback.take() else {
                    return Err(err);
                };
                warn!(
                    error = %err,
                    from = %self.tier,
                    to = %fallback.tier(),
                    "engine build failed; downgrading tier"
                );
                let engine = fallback.build(&self.settings, grid, &self.compositor)?;
                self.tier = fallback.tier();
                self.factory = Some(fallback);
                engine
            }
        };
        if engine.front().is_some() {
            self.pixels = Some(PixelBuffer::new(grid));
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn tolerate(&mut self, violation: InvariantViolation) -> Result<(), EngineError> {
        match self.guard.admit(violation) {
            Ok(()) => Ok(()),
            Err(violation) => {
                error!(%violation, generation = self.generation, "backdrop halted");
                self.state = BackdropState::Halted(violation.clone());
                Err(EngineError::Invariant(violation))
            }
        }
    }
}

impl Drop for Backdrop {
    fn drop(&mut self) {
        self.release_engine();
    }
}
