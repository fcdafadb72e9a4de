//! Compute tier for the myco backdrop.
//!
//! DLA and Physarum run as WGSL compute kernels over device-resident storage
//! textures; a fullscreen pass composites the presented field in the theme
//! colour, either to a surface or to an offscreen target that can be read
//! back.

#![forbid(unsafe_code)]

pub mod composite;
pub mod context;
pub mod dla;
pub mod engine;
pub mod readback;
pub mod slime;

pub use composite::{CompositeParams, CompositePass};
pub use context::{GpuContext, GpuError};
pub use dla::{GpuDla, pack_walker, unpack_walker};
pub use engine::{GpuEngine, GpuEngineFactory, PresentTarget};
pub use readback::{OffscreenTarget, ReadbackRing};
pub use slime::{GpuAgent, GpuSlime};
