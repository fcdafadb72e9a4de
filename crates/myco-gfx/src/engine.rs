//! [`SimulationEngine`] implementation for the compute tier.

use std::rc::Rc;

use myco_core::{
    Algorithm, Compositor, EngineError, EngineFactory, Field, FrameStats, FrameTiming, GridSpec,
    InvariantViolation, PixelBuffer, Settings, SimulationEngine, StepBudget, Tier,
};
use tracing::{debug, info, warn};

use crate::composite::CompositePass;
use crate::context::{GpuContext, GpuError};
use crate::dla::GpuDla;
use crate::readback::{OFFSCREEN_FORMAT, OffscreenTarget, ReadbackRing};
use crate::slime::GpuSlime;

enum Kernel {
    Dla { sim: GpuDla, budget: StepBudget },
    Slime { sim: GpuSlime, steps: u32 },
}

impl Kernel {
    fn front_view(&self) -> &wgpu::TextureView {
        match self {
            Self::Dla { sim, .. } => sim.front_view(),
            Self::Slime { sim, .. } => sim.front_view(),
        }
    }

    fn destroy(&self) {
        match self {
            Self::Dla { sim, .. } => sim.destroy(),
            Self::Slime { sim, .. } => sim.destroy(),
        }
    }
}

/// Where composited frames go.
pub enum PresentTarget {
    Offscreen(OffscreenTarget),
    Surface {
        surface: Rc<wgpu::Surface<'static>>,
        config: wgpu::SurfaceConfiguration,
    },
}

/// Device-resident DLA or Physarum simulation plus its composite pass.
pub struct GpuEngine {
    ctx: Rc<GpuContext>,
    algorithm: Algorithm,
    grid: GridSpec,
    kernel: Kernel,
    present_pass: CompositePass,
    target: PresentTarget,
    capture_pass: Option<CompositePass>,
    capture_target: Option<OffscreenTarget>,
    readback: Option<ReadbackRing>,
    frame: u64,
    disposed: bool,
}

impl GpuEngine {
    pub fn new(
        ctx: Rc<GpuContext>,
        settings: &Settings,
        grid: GridSpec,
        surface: Option<Rc<wgpu::Surface<'static>>>,
    ) -> Result<Self, GpuError> {
        let kernel = match settings.algorithm {
            Algorithm::Dla => Kernel::Dla {
                sim: GpuDla::new(&ctx, settings, grid),
                budget: StepBudget::new(settings.steps_per_frame, &settings.dla),
            },
            Algorithm::Slime => Kernel::Slime {
                sim: GpuSlime::new(&ctx, settings, grid),
                steps: settings.steps_per_frame.max(1),
            },
        };
        let target = match surface {
            Some(surface) => {
                let config = surface_config(&ctx, &surface, grid)?;
                surface.configure(&ctx.device, &config);
                PresentTarget::Surface { surface, config }
            }
            None => PresentTarget::Offscreen(OffscreenTarget::new(&ctx.device, grid)),
        };
        let format = match &target {
            PresentTarget::Offscreen(_) => OFFSCREEN_FORMAT,
            PresentTarget::Surface { config, .. } => config.format,
        };
        let present_pass = CompositePass::new(&ctx.device, format);
        info!(
            algorithm = settings.algorithm.label(),
            width = grid.width(),
            height = grid.height(),
            walkers = settings.walkers,
            format = ?format,
            "GPU engine allocated"
        );
        Ok(Self {
            algorithm: settings.algorithm,
            grid,
            kernel,
            present_pass,
            target,
            capture_pass: None,
            capture_target: None,
            readback: None,
            frame: 0,
            disposed: false,
            ctx,
        })
    }

    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame
    }

    fn draw(
        &self,
        pass: &CompositePass,
        target: &wgpu::TextureView,
        size: (u32, u32),
        compositor: &Compositor,
    ) {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("myco.composite"),
            });
        pass.encode(
            &self.ctx.device,
            &self.ctx.queue,
            &mut encoder,
            self.kernel.front_view(),
            target,
            size,
            compositor,
        );
        self.ctx.queue.submit(Some(encoder.finish()));
    }
}

fn surface_config(
    ctx: &GpuContext,
    surface: &wgpu::Surface<'static>,
    grid: GridSpec,
) -> Result<wgpu::SurfaceConfiguration, GpuError> {
    let caps = surface.get_capabilities(&ctx.adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| !f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .ok_or_else(|| GpuError::Surface("surface is not supported by the adapter".into()))?;
    let alpha_mode = if caps
        .alpha_modes
        .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
    {
        wgpu::CompositeAlphaMode::PreMultiplied
    } else {
        caps.alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto)
    };
    Ok(wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: grid.width(),
        height: grid.height(),
        present_mode: wgpu::PresentMode::Fifo,
        desired_maximum_frame_latency: 2,
        alpha_mode,
        view_formats: vec![],
    })
}

impl SimulationEngine for GpuEngine {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn tier(&self) -> Tier {
        Tier::GpuCompute
    }

    fn grid(&self) -> GridSpec {
        self.grid
    }

    fn advance(&mut self, timing: FrameTiming) -> Result<FrameStats, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("myco.step"),
            });
        let frame = self.frame as u32;
        let steps = match &mut self.kernel {
            Kernel::Dla { sim, budget } => {
                let steps = budget.next_frame(timing);
                sim.encode(&self.ctx.queue, &mut encoder, frame, steps);
                steps
            }
            Kernel::Slime { sim, steps } => {
                sim.encode(&self.ctx.queue, &mut encoder, *steps);
                *steps
            }
        };
        // Submitted without waiting; the presented texture is ready by the
        // time the composite pass samples it.
        self.ctx.queue.submit(Some(encoder.finish()));
        self.frame += 1;
        if self.frame.is_multiple_of(60) {
            debug!(
                frame = self.frame,
                steps,
                algorithm = self.algorithm.label(),
                "GPU heartbeat"
            );
        }
        Ok(FrameStats {
            frame: self.frame,
            steps,
            occupied: 0,
            violation: None,
        })
    }

    fn front(&self) -> Option<&Field> {
        None
    }

    fn present(&mut self, compositor: &Compositor) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        match &self.target {
            PresentTarget::Offscreen(target) => {
                self.draw(&self.present_pass, target.view(), target.size(), compositor);
                Ok(())
            }
            PresentTarget::Surface { surface, config } => {
                let frame = match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        warn!("surface lost; reconfiguring and skipping frame");
                        surface.configure(&self.ctx.device, config);
                        return Ok(());
                    }
                    Err(wgpu::SurfaceError::Timeout) => return Ok(()),
                    Err(err) => return Err(GpuError::Surface(err.to_string()).into()),
                };
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                self.draw(
                    &self.present_pass,
                    &view,
                    (config.width, config.height),
                    compositor,
                );
                frame.present();
                Ok(())
            }
        }
    }

    fn capture(&mut self, compositor: &Compositor) -> Result<Option<PixelBuffer>, EngineError> {
        if self.disposed {
            return Ok(None);
        }
        let device = &self.ctx.device;
        let target = self
            .capture_target
            .get_or_insert_with(|| OffscreenTarget::new(device, self.grid));
        let pass = self
            .capture_pass
            .get_or_insert_with(|| CompositePass::new(device, OFFSCREEN_FORMAT));
        let ring = self
            .readback
            .get_or_insert_with(|| ReadbackRing::new(device, (self.grid.width(), self.grid.height())));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("myco.capture"),
        });
        pass.encode(
            device,
            &self.ctx.queue,
            &mut encoder,
            self.kernel.front_view(),
            target.view(),
            target.size(),
            compositor,
        );
        self.ctx.queue.submit(Some(encoder.finish()));
        let pixels = ring.capture(device, &self.ctx.queue, target.texture(), self.grid)?;
        Ok(Some(pixels))
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.kernel.destroy();
        self.present_pass.destroy();
        if let PresentTarget::Offscreen(target) = &self.target {
            target.destroy();
        }
        if let Some(pass) = self.capture_pass.take() {
            pass.destroy();
        }
        if let Some(target) = self.capture_target.take() {
            target.destroy();
        }
        if let Some(ring) = self.readback.take() {
            ring.destroy();
        }
        debug!(frames = self.frame, "GPU engine disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for GpuEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Builds [`GpuEngine`]s on a probed device, optionally presenting to a
/// surface.
pub struct GpuEngineFactory {
    ctx: Rc<GpuContext>,
    surface: Option<Rc<wgpu::Surface<'static>>>,
}

impl GpuEngineFactory {
    #[must_use]
    pub fn offscreen(ctx: Rc<GpuContext>) -> Self {
        Self { ctx, surface: None }
    }

    #[must_use]
    pub fn with_surface(ctx: Rc<GpuContext>, surface: Rc<wgpu::Surface<'static>>) -> Self {
        Self {
            ctx,
            surface: Some(surface),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Rc<GpuContext> {
        &self.ctx
    }
}

impl EngineFactory for GpuEngineFactory {
    fn tier(&self) -> Tier {
        Tier::GpuCompute
    }

    fn build(
        &self,
        settings: &Settings,
        grid: GridSpec,
        _compositor: &Compositor,
    ) -> Result<Box<dyn SimulationEngine>, EngineError> {
        let scaled = settings.scaled_for(Tier::GpuCompute);
        scaled.validate()?;
        if !grid.fits_packed() {
            return Err(InvariantViolation::GridTooLarge {
                width: grid.width(),
                height: grid.height(),
            }
            .into());
        }
        let limit = self.ctx.max_texture_dimension();
        if grid.width() > limit || grid.height() > limit {
            return Err(GpuError::TextureLimit {
                width: grid.width(),
                height: grid.height(),
                limit,
            }
            .into());
        }
        let engine = GpuEngine::new(Rc::clone(&self.ctx), &scaled, grid, self.surface.clone())?;
        Ok(Box::new(engine))
    }
}
