//! Core simulation types shared across the myco backdrop workspace.
//!
//! Everything in this crate is renderer agnostic: the toroidal grid, the
//! double-buffered intensity fields, the DLA and Physarum engines that run on
//! the CPU, the compositor that turns intensities into RGBA, and the lifecycle
//! manager that hosts one engine behind a page.

pub mod budget;
pub mod compositor;
pub mod dla;
pub mod engine;
pub mod error;
pub mod field;
pub mod frontier;
pub mod grid;
pub mod invariants;
pub mod lifecycle;
pub mod physarum;
pub mod rng;
pub mod settings;
pub mod tier;

pub use budget::{FrameTiming, StepBudget};
pub use compositor::{
    AlphaMapping, CompositeUniform, Compositor, LayerStyle, PixelBuffer, ThemeColor,
};
pub use dla::{AggregateParticle, DlaEngine, Walker};
pub use engine::{CpuEngineFactory, EngineFactory, FrameStats, SimulationEngine};
pub use error::{ConfigError, EngineError, InvariantViolation};
pub use field::{Field, FieldPair};
pub use frontier::{Annulus, FrontierRadius};
pub use grid::{GridSpec, Viewport, wrap_coord, wrap_delta, wrap_f32};
pub use invariants::{DegeneracyMonitor, InvariantGuard};
pub use lifecycle::{Backdrop, BackdropState, FrameOutcome, Generation, ResizeOutcome};
pub use physarum::{PhysarumEngine, SlimeAgent, spawn_agents};
pub use rng::Lcg;
pub use settings::{
    AdaptiveSettings, Algorithm, AnnulusSettings, DegeneracySettings, DeviceClass, DlaSettings,
    InvariantMode, RingSettings, Settings, SlimeParams, SlimeSettings, SlimeSpawn, SpawnStrategy,
};
pub use tier::{Capabilities, Tier, select_tier};
