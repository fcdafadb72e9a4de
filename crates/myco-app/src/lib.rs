//! Native host for the myco backdrop: probes the GPU once, mounts a
//! [`Backdrop`] on the best tier, drives it for a number of frames and hands
//! back the composited layer.

pub mod config;

use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use myco_core::{
    Backdrop, Capabilities, EngineFactory, FrameOutcome, FrameStats, FrameTiming, GridSpec,
    PixelBuffer, Settings, ThemeColor, Tier, Viewport,
};
use myco_gfx::{GpuContext, GpuEngineFactory};
use tracing::{info, warn};

pub use config::{ConfigLoadError, apply_patch, load_settings};

/// Which tiers the host claims to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierRequest {
    /// Probe the GPU and fall back to the canvas tier.
    #[default]
    Auto,
    Gpu,
    Canvas,
    Dom,
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub settings: Settings,
    pub color: ThemeColor,
    pub viewport: Viewport,
    pub frames: u32,
    pub tier: TierRequest,
    /// Viewport applied halfway through the run.
    pub resize_to: Option<Viewport>,
}

#[derive(Debug, Clone)]
pub struct RenderReport {
    pub tier: Tier,
    pub grid: Option<GridSpec>,
    pub presented: u32,
    pub skipped: u32,
    pub last_stats: Option<FrameStats>,
    pub elapsed: Duration,
    pub pixels: Option<PixelBuffer>,
}

/// Probes once and returns the capabilities plus a GPU factory when the
/// compute tier is usable.
pub fn probe(request: TierRequest) -> (Capabilities, Option<Box<dyn EngineFactory>>) {
    let want_gpu = matches!(request, TierRequest::Auto | TierRequest::Gpu);
    let gpu = if want_gpu {
        match GpuContext::probe_blocking() {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                warn!(error = %err, "GPU probe failed");
                None
            }
        }
    } else {
        None
    };
    let caps = Capabilities {
        gpu_compute: gpu.is_some(),
        canvas_2d: request != TierRequest::Dom,
    };
    let factory = gpu.map(|ctx| {
        info!(adapter = %ctx.adapter_name(), "using GPU compute tier");
        Box::new(GpuEngineFactory::offscreen(Rc::new(ctx))) as Box<dyn EngineFactory>
    });
    (caps, factory)
}

/// Mounts, runs and captures one backdrop session.
pub fn render(job: RenderJob) -> Result<RenderReport> {
    let (caps, gpu) = probe(job.tier);
    let mut backdrop = Backdrop::from_capabilities(job.settings, job.color, caps, gpu)
        .context("failed to create backdrop")?;
    backdrop
        .mount(job.viewport)
        .context("failed to mount backdrop")?;

    let started = Instant::now();
    let resize_at = job.frames / 2;
    let mut timing = FrameTiming::unknown();
    let mut presented = 0;
    let mut skipped = 0;
    let mut last_stats = None;
    for frame in 0..job.frames {
        if frame == resize_at
            && let Some(viewport) = job.resize_to
        {
            let outcome = backdrop.resize(viewport).context("resize failed")?;
            info!(frame, ?outcome, "viewport resized");
        }
        let tick = Instant::now();
        match backdrop.frame(timing).context("frame failed")? {
            FrameOutcome::Presented(stats) => {
                presented += 1;
                last_stats = Some(stats);
            }
            FrameOutcome::Skipped => skipped += 1,
        }
        timing = FrameTiming::from_duration(tick.elapsed());
    }
    let elapsed = started.elapsed();
    let pixels = backdrop.capture().context("capture failed")?;
    info!(
        tier = %backdrop.tier(),
        presented,
        skipped,
        elapsed_ms = elapsed.as_millis() as u64,
        "render finished"
    );
    let report = RenderReport {
        tier: backdrop.tier(),
        grid: backdrop.grid(),
        presented,
        skipped,
        last_stats,
        elapsed,
        pixels,
    };
    backdrop.unmount();
    Ok(report)
}

/// Writes straight-alpha pixels as a PNG.
pub fn write_png(pixels: &PixelBuffer, path: &std::path::Path) -> Result<()> {
    image::save_buffer_with_format(
        path,
        pixels.as_bytes(),
        pixels.width(),
        pixels.height(),
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use myco_core::{Algorithm, InvariantMode};

    fn job(algorithm: Algorithm, tier: TierRequest) -> RenderJob {
        RenderJob {
            settings: Settings {
                algorithm,
                rng_seed: Some(3),
                invariants: InvariantMode::Enforce,
                ..Settings::default()
            },
            color: ThemeColor::WHITE,
            viewport: Viewport::new(256.0, 192.0, 1.0),
            frames: 6,
            tier,
            resize_to: None,
        }
    }

    #[test]
    fn canvas_render_captures_the_seed() {
        let report = render(job(Algorithm::Dla, TierRequest::Canvas)).expect("render");
        assert_eq!(report.tier, Tier::Canvas2d);
        assert_eq!(report.presented, 6);
        let pixels = report.pixels.expect("pixels");
        let grid = report.grid.expect("grid");
        let (cx, cy) = grid.center();
        assert_eq!(pixels.pixel(cx, cy), Some([255, 255, 255, 255]));
    }

    #[test]
    fn dom_tier_presents_nothing() {
        let report = render(job(Algorithm::Slime, TierRequest::Dom)).expect("render");
        assert_eq!(report.tier, Tier::DomOnly);
        assert_eq!(report.presented, 0);
        assert_eq!(report.skipped, 6);
        assert!(report.pixels.is_none());
    }

    #[test]
    fn midway_resize_changes_grid() {
        let mut job = job(Algorithm::Slime, TierRequest::Canvas);
        job.resize_to = Some(Viewport::new(512.0, 512.0, 1.0));
        let report = render(job).expect("render");
        let grid = report.grid.expect("grid");
        let pixels = report.pixels.expect("pixels");
        assert_eq!((pixels.width(), pixels.height()), (grid.width(), grid.height()));
        assert_eq!(grid, GridSpec::new(256, 256).expect("grid"));
    }
}
